//! Modscan: mod archive scanning and tag resolution pipeline
//!
//! This crate reads directories of ZIP-format game-mod archives (`*.jar`,
//! `*.zip`) and turns them into canonical, per-namespace identifier lists:
//!
//! 1. **Scan Pass** -- Open archives in batches on a worker pool, classify entries by
//!    path, parse tag and recipe JSON, and append raw per-namespace / per-tag files
//! 2. **Clean Pass** -- Merge raw files into sorted, deduplicated outputs; asset names are
//!    normalized by stripping extensions and state/orientation affixes to a fixpoint
//! 3. **Resolve Pass** -- Close every tag over its `#namespace:path` references, locating
//!    unknown tags on disk on demand
//! 4. **Index Pass** -- Derive an item → tags reverse index and tag-pattern
//!    categories from the closed tags
//! 5. **Aggregate Pass** -- Stream the finished outputs back into per-namespace
//!    block, item and fluid collections
//!
//! # Architecture
//!
//! - **Bounded descriptors** -- Append handles live for one batch and are closed by an RAII
//!   scope before the next batch opens
//! - **Non-interleaved appends** -- One lock per output path for the whole run; each worker
//!   writes one contiguous block per path
//! - **Fault isolation** -- Corrupt archives, unreadable entries, malformed JSON and worker
//!   panics are skipped, logged and counted; siblings continue
//! - **Worklist resolver** -- Only tags whose referenced tags changed are revisited
//! - **Atomic operations** -- Lock-free counters for every failure category and record kind
//!
//! # Key Modules
//!
//! - [`archive`] -- ZIP entry listing, on-demand reads and mod id detection
//! - [`normalize`] -- Convergence-based identifier cleaner with the ordered affix table
//! - [`extract`] -- Entry classification and tag/recipe record parsing
//! - [`writer`] -- Lock map and per-batch handle pool
//! - [`scan`] -- Batched concurrent scan orchestration
//! - [`merge`] -- Raw file cleaning and deduplication
//! - [`resolve`] -- Tag graph fixpoint resolution
//! - [`index`] -- Item → tags index and tag-pattern categories
//! - [`aggregate`] -- Per-namespace collections
//! - [`pipeline`] -- Stage sequencing
//! - [`layout`] -- On-disk file naming
//! - [`models`] -- Core data types (Identifier, TagRecord, RecipeRecord)
//! - [`error`] -- Failure taxonomy
//! - [`stats`] -- Thread-safe atomic counters
//! - [`config`] -- Constants and run configuration
//!
//! # Example Usage
//!
//! ```bash
//! # Scan a mods folder with 8 workers, keeping only one namespace
//! modscan scan -i mods/ -o scan_output/ -t 8 --namespace create
//!
//! # Re-run tag resolution against unpacked vanilla data
//! modscan resolve -o scan_output/ --tag-root vanilla_data/
//! ```

pub mod aggregate;
pub mod archive;
pub mod config;
pub mod error;
pub mod extract;
pub mod index;
pub mod layout;
pub mod merge;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod resolve;
pub mod scan;
pub mod stats;
pub mod writer;

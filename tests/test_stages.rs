//! Runs the pipeline stages one at a time, the way the `clean`, `resolve` and
//! `aggregate` subcommands do, against hand-written raw files.

use anyhow::Result;
use modscan::config::ScanConfig;
use modscan::layout;
use modscan::merge::merge_raw_outputs;
use modscan::models::{AssetKind, TagKind, TagRef};
use modscan::pipeline::{aggregate_outputs, resolve_tags};
use modscan::stats::ScanStats;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(path: &Path, content: &str) -> Result<()> {
    fs::create_dir_all(path.parent().unwrap())?;
    fs::write(path, content)?;
    Ok(())
}

fn raw_fixture(raw: &Path) -> Result<()> {
    write(
        &layout::raw_asset_file(raw, AssetKind::Block, "moda"),
        "moda:lamp_lit_on\nmoda:crop_stage3\nmoda:lamp\n",
    )?;
    let gears = TagRef::parse("moda:gears").unwrap().in_kind(TagKind::Items);
    write(
        &layout::raw_tag_file(raw, &gears),
        "#TAG:moda:gears\nmoda:iron_gear\n#moda:gears/gold\n#TAG:moda:gears\n#moda:gears\n",
    )?;
    let gold = TagRef::parse("moda:gears/gold").unwrap().in_kind(TagKind::Items);
    write(
        &layout::raw_tag_file(raw, &gold),
        "#TAG:moda:gears/gold\nmoda:gold_gear\n",
    )?;
    Ok(())
}

#[test]
fn test_clean_is_idempotent_across_runs() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let raw = temp_dir.path().join("raw");
    let out = temp_dir.path().join("out");
    raw_fixture(&raw)?;

    merge_raw_outputs(&raw, &out, true, &ScanStats::new())?;
    let first = fs::read_to_string(layout::asset_file(&out, AssetKind::Block, "moda"))?;
    assert_eq!(first, "moda:crop\nmoda:lamp\n");

    merge_raw_outputs(&raw, &out, true, &ScanStats::new())?;
    let second = fs::read_to_string(layout::asset_file(&out, AssetKind::Block, "moda"))?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn test_resolve_then_aggregate() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let raw = temp_dir.path().join("raw");
    let out = temp_dir.path().join("out");
    raw_fixture(&raw)?;

    let stats = ScanStats::new();
    merge_raw_outputs(&raw, &out, true, &stats)?;
    let (report, written) = resolve_tags(&raw, &out, &[], &stats)?;
    assert_eq!(written, 2);
    assert!(report.converged);
    assert_eq!(report.unresolved, 0);

    let gears = TagRef::parse("moda:gears").unwrap().in_kind(TagKind::Items);
    let closed = fs::read_to_string(layout::tag_file(&out, &gears))?;
    assert_eq!(closed, "#TAG:moda:gears\nmoda:gold_gear\nmoda:iron_gear\n");

    let aggregate = aggregate_outputs(&ScanConfig::new(temp_dir.path(), &out))?;
    assert_eq!(aggregate.namespaces, 1);
    let collection = modscan::aggregate::load_collection(&out, "moda")?;
    assert_eq!(collection.items.len(), 2);
    assert_eq!(collection.blocks.len(), 2);
    assert!(collection.fluids.is_empty());
    Ok(())
}

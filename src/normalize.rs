//! Convergence-based identifier cleaning.
//!
//! Texture and model file names carry extensions and state suffixes
//! (`stone_top_side.png`). [`clean`] peels them off one at a time until the
//! name stops changing, so `stone_top_side.png` becomes `stone`.
//!
//! The affix table is order-sensitive: each pass removes the first affix in
//! table order that the name ends with. Changing the order changes output.

use crate::config::CLEAN_MAX_ITERATIONS;
use crate::models::Identifier;
use once_cell::sync::Lazy;

/// Affixes grouped by meaning. Applied as one flat list in this order.
pub const AFFIX_GROUPS: &[(&str, &[&str])] = &[
    (
        "orientation_faces",
        &[
            "_bottom", "_top", "_front", "_back", "_left", "_right", "_side", "_reverse", "_base",
        ],
    ),
    (
        "orientation_corners",
        &["_corner", "_inner", "_outer", "_noside", "_nosides", "_inside"],
    ),
    (
        "orientation_vertical",
        &[
            "_up", "_down", "_upper", "_lower", "_middle", "_mid", "_center", "_centered", "_main",
            "_full",
        ],
    ),
    ("orientation_horizontal", &["_horizontal", "_ew", "_ns", "_x", "_z"]),
    (
        "orientation_end",
        &["_end", "_post", "_even", "_odd", "_foot", "_head", "_far", "_gate_wall"],
    ),
    ("orientation_size", &["_single", "_double", "_tall", "_plus", "_adv"]),
    (
        "state_binary",
        &[
            "_open", "_opened", "_close", "_closed", "_on", "_off", "_pressed", "_extended",
            "_connected", "_occupied", "_empty", "_filled", "_drained", "_activated", "_lit",
            "_weak", "_supported", "_support", "_moist", "_unused", "_alt", "_wet", "_decorated",
            "_tied", "_extrudes", "_garnish", "_leftover", "_active", "_inactive", "_monster",
            "_player", "_emissive", "_body", "_bone", "_stabilized", "_unlinked",
        ],
    ),
    (
        "state_progression",
        &[
            "_new", "_old", "_one", "_two", "_three", "_four", "_five", "_0", "_1", "_2", "_3",
            "_4", "_5", "_6", "_7", "_8", "_9", "_10", "0", "1", "2", "3", "4", "5", "6", "7", "8",
            "9", "10", "_age0", "_age1", "_age2", "_age3", "_age4", "_age5", "_age6", "_age7",
            "_age8", "_age9", "_age10", "_stage", "_stage0", "_stage1", "_stage2", "_stage3",
            "_stage4", "_stage5", "_stage6", "_stage7", "_stage8", "_stage9", "_stage10",
            "_slice0", "_slice1", "_slice2", "_slice3", "_slice4", "_slice5", "_slice6",
            "_slice7", "_slice8", "_slice9", "_slice10", "_level", "_level0", "_level1",
            "_level2", "_level3", "_level4", "_level5", "_level6", "_level7", "_level8",
            "_level9", "_level10",
        ],
    ),
    ("state_content", &["_honey", "_water"]),
    ("inventory", &["_inventory", "_slot"]),
    ("ctm_meta", &["-ctm"]),
    ("misc_suffixes", &["_with", "_t"]),
];

pub static AFFIXES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    AFFIX_GROUPS
        .iter()
        .flat_map(|(_, affixes)| affixes.iter().copied())
        .collect()
});

/// Extensions stripped from block and item names.
pub const DEFAULT_EXTENSIONS: &[&str] = &[".png", ".jpeg", ".jpg", ".gif"];

/// Fluid assets are usually JSON definitions, so `.json` is stripped too.
pub const FLUID_EXTENSIONS: &[&str] = &[".png", ".jpeg", ".jpg", ".gif", ".json"];

#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    extensions: &'static [&'static str],
    max_iterations: u32,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS)
    }
}

impl Normalizer {
    pub fn new(extensions: &'static [&'static str]) -> Self {
        Self {
            extensions,
            max_iterations: CLEAN_MAX_ITERATIONS,
        }
    }

    pub fn fluids() -> Self {
        Self::new(FLUID_EXTENSIONS)
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn clean(&self, raw: &str) -> String {
        let mut current = raw;
        for _ in 0..self.max_iterations {
            let before = current.len();
            if let Some(ext) = self.extensions.iter().find(|ext| current.ends_with(*ext)) {
                current = &current[..current.len() - ext.len()];
            }
            if let Some(affix) = AFFIXES.iter().find(|affix| current.ends_with(*affix)) {
                current = &current[..current.len() - affix.len()];
            }
            if current.len() == before {
                break;
            }
        }
        current.to_string()
    }

    /// Cleans the object half of a `ns:object` line.
    ///
    /// Returns `None` for blank lines, lines without a namespace, and objects
    /// that clean down to nothing.
    pub fn clean_line(&self, line: &str) -> Option<Identifier> {
        let (namespace, object_id) = line.trim().split_once(':')?;
        Identifier::new(namespace, &self.clean(object_id))
    }
}

/// Cleans `raw` with the default block/item extensions.
pub fn clean(raw: &str) -> String {
    Normalizer::default().clean(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affix_table_is_pinned() {
        assert_eq!(AFFIXES.len(), 161);
        assert_eq!(AFFIXES[0], "_bottom");
        assert_eq!(AFFIXES[1], "_top");
        assert_eq!(AFFIXES[6], "_side");
        assert_eq!(AFFIXES[AFFIXES.len() - 1], "_t");

        let position = |a: &str| AFFIXES.iter().position(|x| *x == a).unwrap();
        assert!(position("_top") < position("_side"));
        assert!(position("_10") < position("0"));
        assert!(position("_stage") < position("_stage0"));
        assert!(position("_open") < position("_opened"));
        assert_eq!(position("-ctm"), 158);

        let groups: Vec<&str> = AFFIX_GROUPS.iter().map(|(name, _)| *name).collect();
        assert_eq!(
            groups,
            vec![
                "orientation_faces",
                "orientation_corners",
                "orientation_vertical",
                "orientation_horizontal",
                "orientation_end",
                "orientation_size",
                "state_binary",
                "state_progression",
                "state_content",
                "inventory",
                "ctm_meta",
                "misc_suffixes",
            ]
        );
    }

    #[test]
    fn strips_extension_and_stacked_affixes() {
        assert_eq!(clean("stone_top_side.png"), "stone");
        assert_eq!(clean("dirt_top_side"), "dirt");
        assert_eq!(clean("oak_door_bottom.png"), "oak_door");
    }

    #[test]
    fn strips_progression_markers() {
        assert_eq!(clean("wheat_stage7.png"), "wheat");
        assert_eq!(clean("furnace_on"), "furnace");
        assert_eq!(clean("crop10"), "crop");
        assert_eq!(clean("glass-ctm"), "glass");
    }

    #[test]
    fn leaves_plain_names_alone() {
        assert_eq!(clean("iron_ingot"), "iron_ingot");
        assert_eq!(clean("ore"), "ore");
        assert_eq!(clean(""), "");
    }

    #[test]
    fn clean_is_idempotent() {
        let samples = [
            "stone_top_side.png",
            "lamp_lit_on",
            "piston_head_extended.jpg",
            "crop_stage10",
            "_top",
            "copper_block",
            "level_10",
            "bed_foot_left",
            "x.gif.png",
        ];
        for s in samples {
            let once = clean(s);
            assert_eq!(clean(&once), once, "not idempotent for {s}");
        }
    }

    #[test]
    fn fluid_cleaner_strips_json() {
        assert_eq!(Normalizer::fluids().clean("molten_iron.json"), "molten_iron");
        assert_eq!(clean("molten_iron.json"), "molten_iron.json");
    }

    #[test]
    fn iteration_cap_bounds_work() {
        let capped = Normalizer::default().with_max_iterations(1);
        assert_eq!(capped.clean("dirt_top_side"), "dirt_top");
    }

    #[test]
    fn clean_line_drops_empty_and_invalid() {
        let n = Normalizer::default();
        assert_eq!(
            n.clean_line("mymod:ore.png\n").map(|id| id.to_string()),
            Some("mymod:ore".to_string())
        );
        assert_eq!(n.clean_line("mymod:_top"), None);
        assert_eq!(n.clean_line("no_namespace"), None);
        assert_eq!(n.clean_line("   "), None);
    }
}

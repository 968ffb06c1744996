//! Program cache keys and defaults presets.

use crate::options::PresetOptions;

/// Prefix shared by every generated slice-plane rule.
pub const SLICE_PLANE_RULE_PREFIX: &str = "SLICE_PLANE_";

/// Which preset rule list is appended to a program request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShaderReplacementDefaults {
    /// Rules for ordinary scene geometry, slice planes included.
    #[default]
    SceneObject,
    /// Scene-object rules minus every slice-plane rule.
    SceneObjectNoSlice,
    /// Rules for picking passes.
    Pick,
    /// Rules for full-screen processing passes.
    Process,
    /// Only the explicitly requested rules.
    None,
}

impl ShaderReplacementDefaults {
    /// Rule names this preset contributes, in order.
    #[must_use]
    pub fn expand(self, presets: &PresetOptions) -> Vec<&str> {
        let list: &[String] = match self {
            Self::SceneObject | Self::SceneObjectNoSlice => &presets.scene_object,
            Self::Pick => &presets.pick,
            Self::Process => &presets.process,
            Self::None => &[],
        };
        list.iter()
            .map(String::as_str)
            .filter(|rule| {
                self != Self::SceneObjectNoSlice
                    || !rule.starts_with(SLICE_PLANE_RULE_PREFIX)
            })
            .collect()
    }
}

/// Identity of a compiled program.
///
/// `rules` is the full ordered rule list with empty names and repeats
/// removed, so requests that differ only in duplicates share a program.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramKey {
    /// Registered program name.
    pub program: String,
    /// Requested rules followed by the preset's rules, deduplicated.
    pub rules: Vec<String>,
    /// Preset the rules were expanded from.
    pub defaults: ShaderReplacementDefaults,
}

impl ProgramKey {
    /// Key for `program` with `custom` rules and the expansion of
    /// `defaults` under `presets`.
    #[must_use]
    pub fn new<S: AsRef<str>>(
        program: &str,
        custom: &[S],
        defaults: ShaderReplacementDefaults,
        presets: &PresetOptions,
    ) -> Self {
        let mut rules: Vec<String> = Vec::new();
        let requested = custom
            .iter()
            .map(AsRef::as_ref)
            .chain(defaults.expand(presets));
        for rule in requested {
            if !rule.is_empty() && !rules.iter().any(|r| r == rule) {
                rules.push(rule.to_owned());
            }
        }
        Self {
            program: program.to_owned(),
            rules,
            defaults,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presets() -> PresetOptions {
        PresetOptions {
            scene_object: vec![
                "GLSL_VERSION".to_owned(),
                "SLICE_PLANE_CULL_a".to_owned(),
            ],
            ..PresetOptions::default()
        }
    }

    #[test]
    fn repeats_and_empty_names_collapse() {
        let p = presets();
        let a = ProgramKey::new(
            "MESH",
            &["X", "", "X", "GLSL_VERSION"],
            ShaderReplacementDefaults::SceneObject,
            &p,
        );
        let b = ProgramKey::new(
            "MESH",
            &["X"],
            ShaderReplacementDefaults::SceneObject,
            &p,
        );
        assert_eq!(a, b);
        assert_eq!(a.rules, ["X", "GLSL_VERSION", "SLICE_PLANE_CULL_a"]);
    }

    #[test]
    fn order_and_preset_distinguish_keys() {
        let p = presets();
        let none = ShaderReplacementDefaults::None;
        assert_ne!(
            ProgramKey::new("MESH", &["A", "B"], none, &p),
            ProgramKey::new("MESH", &["B", "A"], none, &p)
        );
        assert_ne!(
            ProgramKey::new("MESH", &["A"], none, &p),
            ProgramKey::new("MESH", &["A"], ShaderReplacementDefaults::Pick, &p)
        );
    }

    #[test]
    fn no_slice_preset_drops_slice_rules() {
        let p = presets();
        assert_eq!(
            ShaderReplacementDefaults::SceneObjectNoSlice.expand(&p),
            ["GLSL_VERSION"]
        );
        assert!(ShaderReplacementDefaults::None.expand(&p).is_empty());
    }
}

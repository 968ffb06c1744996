//! Engine options with TOML file support.
//!
//! Error-check policy, shader logging, the shared shader preamble and the
//! rule lists behind each defaults preset. Every struct uses
//! `#[serde(default)]` so partial files (e.g. only `[errors]`) work.

use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::RenderError;

/// What happens when the device error flag is found set.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default,
    JsonSchema,
)]
pub enum ErrorMode {
    /// Log, then fail the current operation.
    #[default]
    Fatal,
    /// Log only.
    LogOnly,
}

/// Device error polling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(default)]
pub struct ErrorOptions {
    /// Poll the device error flag after batches of calls.
    pub checks_enabled: bool,
    /// Fatal or log-only.
    pub mode: ErrorMode,
}

impl Default for ErrorOptions {
    fn default() -> Self {
        Self {
            checks_enabled: true,
            mode: ErrorMode::Fatal,
        }
    }
}

/// Shader compilation settings.
#[derive(
    Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema,
)]
#[serde(default)]
pub struct ShaderOptions {
    /// Log every compiled stage's source at debug level.
    pub log_source: bool,
    /// Preamble appended to every stage before compilation.
    pub common_source: String,
}

/// Rule lists expanded by the defaults presets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(default)]
pub struct PresetOptions {
    /// Rules applied to generic scene objects.
    pub scene_object: Vec<String>,
    /// Rules applied to picking passes.
    pub pick: Vec<String>,
    /// Rules applied to post-processing passes.
    pub process: Vec<String>,
}

impl Default for PresetOptions {
    fn default() -> Self {
        Self {
            scene_object: vec![
                "GLSL_VERSION".to_owned(),
                "GLOBAL_FRAGMENT_FILTER".to_owned(),
            ],
            pick: vec![
                "GLSL_VERSION".to_owned(),
                "GLOBAL_FRAGMENT_FILTER".to_owned(),
            ],
            process: vec!["GLSL_VERSION".to_owned()],
        }
    }
}

/// Top-level engine options.
#[derive(
    Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema,
)]
#[serde(default)]
pub struct EngineOptions {
    /// Device error handling.
    pub errors: ErrorOptions,
    /// Shader compilation.
    pub shaders: ShaderOptions,
    /// Defaults preset rule lists.
    pub presets: PresetOptions,
}

impl EngineOptions {
    /// Generate JSON Schema describing the options file.
    #[must_use]
    pub fn json_schema() -> schemars::Schema {
        schemars::schema_for!(EngineOptions)
    }

    /// Load options from a TOML file. Missing fields use defaults.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Io`] if the file cannot be read and
    /// [`RenderError::OptionsParse`] if it is not valid options TOML.
    pub fn load(path: &Path) -> Result<Self, RenderError> {
        let content = std::fs::read_to_string(path).map_err(RenderError::Io)?;
        let options: Self = toml::from_str(&content)
            .map_err(|e| RenderError::OptionsParse(e.to_string()))?;
        log::info!("loaded engine options from {}", path.display());
        Ok(options)
    }

    /// Save options to a TOML file (pretty-printed).
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::OptionsParse`] if serialization fails and
    /// [`RenderError::Io`] if the file or its directory cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), RenderError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RenderError::OptionsParse(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(RenderError::Io)?;
        }
        std::fs::write(path, content).map_err(RenderError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_round_trips_through_toml() {
        let opts = EngineOptions::default();
        let toml_str = toml::to_string_pretty(&opts).unwrap();
        let parsed: EngineOptions = toml::from_str(&toml_str).unwrap();
        assert_eq!(opts, parsed);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let toml_str = r#"
[errors]
mode = "LogOnly"
"#;
        let opts: EngineOptions = toml::from_str(toml_str).unwrap();
        assert_eq!(opts.errors.mode, ErrorMode::LogOnly);
        // Everything else should be default
        assert!(opts.errors.checks_enabled);
        assert_eq!(opts.presets, PresetOptions::default());
        assert!(opts.shaders.common_source.is_empty());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let dir = std::env::temp_dir().join("scivis-render-options-test");
        let path = dir.join("broken.toml");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&path, "[errors\nmode = 3").unwrap();
        assert!(matches!(
            EngineOptions::load(&path),
            Err(RenderError::OptionsParse(_))
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = std::env::temp_dir().join("scivis-render-options-test");
        let path = dir.join("saved.toml");
        let mut opts = EngineOptions::default();
        opts.shaders.common_source = "float helper() { return 1.0; }".to_owned();
        opts.presets.process.clear();
        opts.save(&path).unwrap();
        assert_eq!(EngineOptions::load(&path).unwrap(), opts);
    }

    #[test]
    fn schema_has_expected_properties() {
        let schema = EngineOptions::json_schema();
        let props = schema.get("properties").unwrap();
        assert!(props.get("errors").is_some());
        assert!(props.get("shaders").is_some());
        assert!(props.get("presets").is_some());
    }
}

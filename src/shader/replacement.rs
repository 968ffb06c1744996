//! Text-substitution rules applied to stage sources before compilation.
//!
//! Stage sources carry markers of the form `${ TAG }$`. Applying a rule list
//! replaces every marker with the texts all rules register for that tag,
//! concatenated in rule order, and merges each rule's extra interface
//! declarations into every stage.

use rustc_hash::FxHashMap;

use super::spec::{
    ShaderSpecAttribute, ShaderSpecTexture, ShaderSpecUniform,
    ShaderStageSpecification,
};
use crate::error::{NameKind, RenderError};
use crate::gpu::data_type::RenderDataType;

const MARKER_OPEN: &str = "${";
const MARKER_CLOSE: &str = "}$";

/// A named bundle of marker replacements and interface additions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShaderReplacementRule {
    /// Registered name.
    pub name: String,
    /// `(tag, text)` pairs, applied in order.
    pub replacements: Vec<(String, String)>,
    /// Uniforms the inserted text needs.
    pub uniforms: Vec<ShaderSpecUniform>,
    /// Attributes the inserted text needs.
    pub attributes: Vec<ShaderSpecAttribute>,
    /// Textures the inserted text needs.
    pub textures: Vec<ShaderSpecTexture>,
}

impl ShaderReplacementRule {
    /// Empty rule.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder: insert `text` at every `${ tag }$`.
    #[must_use]
    pub fn with_replacement(
        mut self,
        tag: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.replacements.push((tag.into(), text.into()));
        self
    }

    /// Builder: require a uniform.
    #[must_use]
    pub fn with_uniform(
        mut self,
        name: impl Into<String>,
        data_type: RenderDataType,
    ) -> Self {
        self.uniforms.push(ShaderSpecUniform::new(name, data_type));
        self
    }

    /// Builder: require an attribute.
    #[must_use]
    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        data_type: RenderDataType,
    ) -> Self {
        self.attributes.push(ShaderSpecAttribute::new(name, data_type));
        self
    }

    /// Builder: require a texture.
    #[must_use]
    pub fn with_texture(mut self, name: impl Into<String>, dim: u32) -> Self {
        self.textures.push(ShaderSpecTexture::new(name, dim));
        self
    }
}

/// Look up `requested` rule names in `registry`.
///
/// The first occurrence of a name wins and later repeats are skipped; the
/// empty name is ignored. Unregistered names fail with `UnknownName`.
///
/// # Errors
///
/// Returns [`RenderError::UnknownName`] for a name missing from `registry`.
pub fn resolve_rules<'r, S: AsRef<str>>(
    requested: &[S],
    registry: &'r FxHashMap<String, ShaderReplacementRule>,
) -> Result<Vec<&'r ShaderReplacementRule>, RenderError> {
    let mut resolved: Vec<&ShaderReplacementRule> = Vec::new();
    for name in requested {
        let name = name.as_ref();
        if name.is_empty() || resolved.iter().any(|r| r.name == name) {
            continue;
        }
        let rule = registry.get(name).ok_or_else(|| RenderError::UnknownName {
            kind: NameKind::Rule,
            name: name.to_owned(),
        })?;
        resolved.push(rule);
    }
    Ok(resolved)
}

fn line_of(source: &str, byte: usize) -> usize {
    source[..byte].matches('\n').count() + 1
}

/// Replace every marker in `source` with its tag's text from `texts`.
fn substitute(
    source: &str,
    texts: &FxHashMap<&str, String>,
) -> Result<String, RenderError> {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(open) = rest.find(MARKER_OPEN) {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + MARKER_OPEN.len()..];
        let Some(close) = after_open.find(MARKER_CLOSE) else {
            let at = source.len() - rest.len() + open;
            return Err(RenderError::InvalidShaderSource(format!(
                "unterminated replacement marker on line {}",
                line_of(source, at)
            )));
        };
        let tag = after_open[..close].trim();
        if let Some(text) = texts.get(tag) {
            out.push_str(text);
        }
        rest = &after_open[close + MARKER_CLOSE.len()..];
    }
    out.push_str(rest);
    Ok(out)
}

fn push_unique<T: PartialEq + Clone>(list: &mut Vec<T>, extra: &[T]) {
    for item in extra {
        if !list.contains(item) {
            list.push(item.clone());
        }
    }
}

/// Apply resolved `rules` to every stage, returning the rewritten stages.
///
/// # Errors
///
/// Returns [`RenderError::InvalidShaderSource`] if a stage has an
/// unterminated `${` tag.
pub fn apply_shader_replacements(
    stages: &[ShaderStageSpecification],
    rules: &[&ShaderReplacementRule],
) -> Result<Vec<ShaderStageSpecification>, RenderError> {
    let mut texts: FxHashMap<&str, String> = FxHashMap::default();
    for rule in rules {
        for (tag, text) in &rule.replacements {
            texts.entry(tag.as_str()).or_default().push_str(text);
        }
    }

    stages
        .iter()
        .map(|stage| {
            let mut updated = stage.clone();
            updated.src = substitute(&stage.src, &texts)?;
            for rule in rules {
                push_unique(&mut updated.uniforms, &rule.uniforms);
                push_unique(&mut updated.attributes, &rule.attributes);
                push_unique(&mut updated.textures, &rule.textures);
            }
            Ok(updated)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::ShaderStageType;

    fn registry() -> FxHashMap<String, ShaderReplacementRule> {
        let mut map = FxHashMap::default();
        for rule in [
            ShaderReplacementRule::new("A")
                .with_replacement("BODY", "a();")
                .with_uniform("u_a", RenderDataType::Float),
            ShaderReplacementRule::new("B")
                .with_replacement("BODY", "b();")
                .with_replacement("DECL", "uniform float u_b;"),
        ] {
            let _ = map.insert(rule.name.clone(), rule);
        }
        map
    }

    #[test]
    fn resolution_keeps_first_occurrence() {
        let reg = registry();
        let names: Vec<_> = resolve_rules(&["B", "", "A", "B", "A"], &reg)
            .unwrap()
            .into_iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, ["B", "A"]);
    }

    #[test]
    fn unknown_rules_fail() {
        let reg = registry();
        assert!(matches!(
            resolve_rules(&["A", "NOPE"], &reg),
            Err(RenderError::UnknownName {
                kind: NameKind::Rule,
                ..
            })
        ));
    }

    #[test]
    fn markers_concatenate_in_rule_order() {
        let reg = registry();
        let stage = ShaderStageSpecification::new(
            ShaderStageType::Fragment,
            "${ DECL }$\nvoid main() { ${BODY}$ ${ UNUSED }$}",
        );
        let rules = resolve_rules(&["A", "B"], &reg).unwrap();
        let out = apply_shader_replacements(&[stage], &rules).unwrap();
        assert_eq!(
            out[0].src,
            "uniform float u_b;\nvoid main() { a();b(); }"
        );
        assert_eq!(out[0].uniforms, [ShaderSpecUniform::new("u_a", RenderDataType::Float)]);
    }

    #[test]
    fn rule_interface_is_not_duplicated() {
        let reg = registry();
        let stage = ShaderStageSpecification::new(ShaderStageType::Vertex, "")
            .with_uniform("u_a", RenderDataType::Float);
        let rules = resolve_rules(&["A"], &reg).unwrap();
        let out = apply_shader_replacements(&[stage], &rules).unwrap();
        assert_eq!(out[0].uniforms.len(), 1);
    }

    #[test]
    fn unterminated_marker_reports_line() {
        let stage = ShaderStageSpecification::new(
            ShaderStageType::Vertex,
            "void main() {\n  ${ BODY\n}",
        );
        let err = apply_shader_replacements(&[stage], &[]).unwrap_err();
        match err {
            RenderError::InvalidShaderSource(msg) => {
                assert!(msg.contains("line 2"), "{msg}");
            }
            other => panic!("unexpected error {other}"),
        }
    }
}

//! Built-in substitution rules.

use super::replacement::ShaderReplacementRule;
use crate::gpu::data_type::RenderDataType;

/// Version directive every stage starts with.
pub const GLSL_VERSION_DIRECTIVE: &str = "#version 330 core\n";

/// `GLSL_VERSION`: fills the `${ GLSL_VERSION }$` marker.
#[must_use]
pub fn glsl_version() -> ShaderReplacementRule {
    ShaderReplacementRule::new("GLSL_VERSION")
        .with_replacement("GLSL_VERSION", GLSL_VERSION_DIRECTIVE)
}

/// `GLOBAL_FRAGMENT_FILTER`: opens the fragment filter hook that slice
/// planes and other culling rules append `discard` conditions to.
#[must_use]
pub fn global_fragment_filter() -> ShaderReplacementRule {
    ShaderReplacementRule::new("GLOBAL_FRAGMENT_FILTER")
        .with_replacement("GLOBAL_FRAGMENT_FILTER_PREP", "bool fragmentKept = true;\n")
        .with_replacement(
            "GLOBAL_FRAGMENT_FILTER",
            "if (!fragmentKept) { discard; }\n",
        )
}

fn slice_plane_uniforms(postfix: &str) -> (String, String) {
    (
        format!("u_slicePlaneCenter_{postfix}"),
        format!("u_slicePlaneNormal_{postfix}"),
    )
}

/// `SLICE_PLANE_CULL_<postfix>`: discard fragments behind a plane.
#[must_use]
pub fn slice_plane_rule(postfix: &str) -> ShaderReplacementRule {
    let (center, normal) = slice_plane_uniforms(postfix);
    ShaderReplacementRule::new(format!("SLICE_PLANE_CULL_{postfix}"))
        .with_replacement(
            "FRAG_DECLARATIONS",
            format!("uniform vec3 {center};\nuniform vec3 {normal};\n"),
        )
        .with_replacement(
            "GLOBAL_FRAGMENT_FILTER",
            format!(
                "if (dot(cullPos, {normal}) < dot({center}, {normal})) \
                 {{ discard; }}\n"
            ),
        )
        .with_uniform(center, RenderDataType::Vector3Float)
        .with_uniform(normal, RenderDataType::Vector3Float)
}

/// `SLICE_PLANE_VOLUMEGRID_CULL_<postfix>`: cull whole grid cells whose
/// center lies behind a plane.
#[must_use]
pub fn volume_grid_slice_plane_rule(postfix: &str) -> ShaderReplacementRule {
    let (center, normal) = slice_plane_uniforms(postfix);
    ShaderReplacementRule::new(format!("SLICE_PLANE_VOLUMEGRID_CULL_{postfix}"))
        .with_replacement(
            "GEOM_DECLARATIONS",
            format!("uniform vec3 {center};\nuniform vec3 {normal};\n"),
        )
        .with_replacement(
            "GRID_CELL_FILTER",
            format!(
                "if (dot(cellCenter, {normal}) < dot({center}, {normal})) \
                 {{ return; }}\n"
            ),
        )
        .with_uniform(center, RenderDataType::Vector3Float)
        .with_uniform(normal, RenderDataType::Vector3Float)
}

/// Every built-in utility rule.
#[must_use]
pub fn default_rules() -> Vec<ShaderReplacementRule> {
    vec![glsl_version(), global_fragment_filter()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_plane_rules_are_postfixed() {
        let rule = slice_plane_rule("plane0");
        assert_eq!(rule.name, "SLICE_PLANE_CULL_plane0");
        assert!(rule.uniforms.iter().all(|u| u.name.ends_with("_plane0")));
        let grid = volume_grid_slice_plane_rule("plane0");
        assert_eq!(grid.name, "SLICE_PLANE_VOLUMEGRID_CULL_plane0");
        assert_eq!(grid.uniforms, rule.uniforms);
    }
}

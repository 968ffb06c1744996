//! The backend engine: registries, program cache, presets and global state.

mod cache;
mod factories;
mod state;

use std::path::Path;
use std::rc::Rc;

use rustc_hash::FxHashMap;

pub use self::cache::{
    ProgramKey, ShaderReplacementDefaults, SLICE_PLANE_RULE_PREFIX,
};
pub use self::state::{BlendMode, DepthMode, TransparencyMode};
use crate::device::{Device, HeadlessDevice, Rect};
use crate::error::{NameKind, RenderError};
use crate::gpu::{Colormap, FrameBuffer, RenderContext};
use crate::options::EngineOptions;
use crate::shader::library::{
    default_rules, slice_plane_rule, volume_grid_slice_plane_rule,
};
use crate::shader::{
    apply_shader_replacements, resolve_rules, CompiledProgram, DrawMode,
    ShaderProgram, ShaderReplacementRule, ShaderStageSpecification,
};

#[derive(Debug)]
struct RegisteredProgram {
    stages: Vec<ShaderStageSpecification>,
    draw_mode: DrawMode,
}

/// Owns the render context and everything shared between drawables.
///
/// Programs are registered by name as stage specifications plus a draw
/// mode; substitution rules are registered by name. Requesting a program
/// with a rule list either returns a new instance over a cached compiled
/// program or builds one, keyed by [`ProgramKey`]. The cache is never
/// evicted.
#[derive(Debug)]
pub struct Engine {
    ctx: Rc<RenderContext>,
    options: EngineOptions,
    programs: FxHashMap<String, RegisteredProgram>,
    rules: FxHashMap<String, ShaderReplacementRule>,
    cache: FxHashMap<ProgramKey, Rc<CompiledProgram>>,
    colormaps: FxHashMap<String, Colormap>,
    display: FrameBuffer,
    front_face_ccw: bool,
    transparency_mode: TransparencyMode,
}

impl Engine {
    /// Engine over `device`, with the built-in rules registered.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Device`] if the device reports an error while
    /// the engine sets up.
    pub fn new(
        device: Rc<dyn Device>,
        options: EngineOptions,
    ) -> Result<Self, RenderError> {
        let ctx = RenderContext::new(device);
        ctx.set_checks_enabled(options.errors.checks_enabled);
        ctx.set_error_mode(options.errors.mode);

        let display = FrameBuffer::window(&ctx);
        let (w, h) = display.size();
        display.set_viewport(0, 0, w, h);

        let mut engine = Self {
            ctx,
            options,
            programs: FxHashMap::default(),
            rules: FxHashMap::default(),
            cache: FxHashMap::default(),
            colormaps: FxHashMap::default(),
            display,
            front_face_ccw: true,
            transparency_mode: TransparencyMode::None,
        };
        engine.populate_default_rules();
        engine.ctx.check_error()?;
        log::info!("render engine started with a {w}x{h} display");
        Ok(engine)
    }

    /// Engine over a fresh [`HeadlessDevice`] with default options.
    ///
    /// # Errors
    ///
    /// Same as [`Self::new`].
    pub fn headless() -> Result<Self, RenderError> {
        Self::new(Rc::new(HeadlessDevice::new()), EngineOptions::default())
    }

    /// Engine with options read from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns any [`EngineOptions::load`] error, then any [`Self::new`]
    /// error.
    pub fn from_options_file(
        device: Rc<dyn Device>,
        path: &Path,
    ) -> Result<Self, RenderError> {
        Self::new(device, EngineOptions::load(path)?)
    }

    /// The shared render context.
    #[must_use]
    pub fn context(&self) -> &Rc<RenderContext> {
        &self.ctx
    }

    /// Current options.
    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Replace the options and apply the error policy.
    ///
    /// Programs already in the cache keep the preset rules they were built
    /// with; new requests key on the new presets.
    pub fn set_options(&mut self, options: EngineOptions) {
        self.ctx.set_checks_enabled(options.errors.checks_enabled);
        self.ctx.set_error_mode(options.errors.mode);
        self.options = options;
    }

    /// Shared preamble appended to every stage compiled from now on.
    pub fn set_common_source(&mut self, source: impl Into<String>) {
        self.options.shaders.common_source = source.into();
    }

    // -- registries --

    /// Register stage specifications under `name`. The first registration
    /// of a name wins.
    pub fn register_program(
        &mut self,
        name: &str,
        stages: Vec<ShaderStageSpecification>,
        draw_mode: DrawMode,
    ) {
        if self.programs.contains_key(name) {
            log::warn!("shader program [{name}] is already registered");
            return;
        }
        let _ = self
            .programs
            .insert(name.to_owned(), RegisteredProgram { stages, draw_mode });
    }

    /// Register a substitution rule under its own name. The first
    /// registration of a name wins.
    pub fn register_rule(&mut self, rule: ShaderReplacementRule) {
        if self.rules.contains_key(&rule.name) {
            log::warn!("shader replacement rule [{}] is already registered", rule.name);
            return;
        }
        let _ = self.rules.insert(rule.name.clone(), rule);
    }

    /// Register the built-in utility rules.
    pub fn populate_default_rules(&mut self) {
        for rule in default_rules() {
            self.register_rule(rule);
        }
    }

    /// Whether a rule of that name is registered.
    #[must_use]
    pub fn has_rule(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Register the slice-plane culling rules for `postfix` and add the
    /// fragment rule to the scene-object preset.
    pub fn add_slice_plane(&mut self, postfix: &str) {
        let rule = slice_plane_rule(postfix);
        let name = rule.name.clone();
        self.register_rule(rule);
        self.register_rule(volume_grid_slice_plane_rule(postfix));
        let preset = &mut self.options.presets.scene_object;
        if !preset.contains(&name) {
            preset.push(name);
        }
    }

    /// Remove the slice-plane rule for `postfix` from the scene-object
    /// preset. The rules stay registered for programs already built.
    pub fn remove_slice_plane(&mut self, postfix: &str) {
        let name = slice_plane_rule(postfix).name;
        self.options.presets.scene_object.retain(|r| *r != name);
    }

    // -- program cache --

    /// The compiled program for a request, building it on a cache miss.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::UnknownName`] for an unregistered program or
    /// rule, plus any error from substitution or [`CompiledProgram::new`].
    pub fn compiled_program<S: AsRef<str>>(
        &mut self,
        name: &str,
        rules: &[S],
        defaults: ShaderReplacementDefaults,
    ) -> Result<Rc<CompiledProgram>, RenderError> {
        let key = ProgramKey::new(name, rules, defaults, &self.options.presets);
        if let Some(program) = self.cache.get(&key) {
            log::debug!("program cache hit for {key:?}");
            return Ok(Rc::clone(program));
        }

        log::debug!("compiling shader program {key:?}");
        let registered = self.programs.get(name).ok_or_else(|| {
            RenderError::UnknownName {
                kind: NameKind::Program,
                name: name.to_owned(),
            }
        })?;
        let resolved = resolve_rules(&key.rules, &self.rules)?;
        let stages = apply_shader_replacements(&registered.stages, &resolved)?;
        let program = Rc::new(CompiledProgram::new(
            &self.ctx,
            &stages,
            registered.draw_mode,
            &self.options.shaders.common_source,
            self.options.shaders.log_source,
        )?);
        let _ = self.cache.insert(key, Rc::clone(&program));
        Ok(program)
    }

    /// A fresh instance over the cached (or newly built) program.
    ///
    /// # Errors
    ///
    /// Same as [`Self::compiled_program`], plus [`ShaderProgram::new`]
    /// errors.
    pub fn request_shader<S: AsRef<str>>(
        &mut self,
        name: &str,
        rules: &[S],
        defaults: ShaderReplacementDefaults,
    ) -> Result<ShaderProgram, RenderError> {
        ShaderProgram::new(self.compiled_program(name, rules, defaults)?)
    }

    /// Number of distinct compiled programs.
    #[must_use]
    pub fn cached_program_count(&self) -> usize {
        self.cache.len()
    }

    // -- colormaps --

    /// Register a colormap under its name, replacing any previous one.
    pub fn register_colormap(&mut self, colormap: Colormap) {
        let _ = self
            .colormaps
            .insert(colormap.name().to_owned(), colormap);
    }

    /// Look up a registered colormap.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::UnknownName`] if no colormap has that name.
    pub fn colormap(&self, name: &str) -> Result<&Colormap, RenderError> {
        self.colormaps.get(name).ok_or_else(|| RenderError::UnknownName {
            kind: NameKind::Colormap,
            name: name.to_owned(),
        })
    }

    // -- display --

    /// The window framebuffer.
    #[must_use]
    pub fn display_buffer(&self) -> &FrameBuffer {
        &self.display
    }

    /// Track a new window size.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Device`] if the device raises an error.
    pub fn resize_display(
        &self,
        width: u32,
        height: u32,
    ) -> Result<(), RenderError> {
        self.display.resize(width, height)?;
        self.display.set_viewport(0, 0, width, height);
        Ok(())
    }

    /// RGBA8 pixels of the current viewport, rows bottom-up.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Device`] if the device raises an error.
    pub fn read_display_buffer(&self) -> Result<Vec<u8>, RenderError> {
        let device = self.ctx.device();
        device.flush();
        device.finish();
        let viewport = self.ctx.viewport();
        let rect = Rect::sized(viewport.width, viewport.height);
        let mut pixels = vec![0; rect.area() * 4];
        device.read_pixels_u8(rect, &mut pixels);
        self.ctx.check_error()?;
        Ok(pixels)
    }

    /// Drain the device error flag under the configured policy.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Device`] in fatal mode when the flag is set.
    pub fn check_error(&self) -> Result<(), RenderError> {
        self.ctx.check_error()
    }
}

#[cfg(test)]
mod tests {
    use glam::{Vec3, Vec4};

    use super::*;
    use crate::gpu::data_type::RenderDataType;
    use crate::options::ErrorMode;
    use crate::shader::ShaderStageType;

    const VERT: &str = "${ GLSL_VERSION }$\nin vec3 a_position;\n\
        void main() { gl_Position = vec4(a_position, 1.0); }";
    const FRAG: &str = "${ GLSL_VERSION }$\nuniform vec4 u_color;\n\
        ${ FRAG_DECLARATIONS }$\nout vec4 o;\nvec3 cullPos;\n\
        void main() {\n${ GLOBAL_FRAGMENT_FILTER_PREP }$\n\
        ${ GLOBAL_FRAGMENT_FILTER }$\no = u_color;\n}";

    fn engine() -> Engine {
        let mut engine = Engine::headless().unwrap();
        engine.register_program(
            "FLAT",
            vec![
                ShaderStageSpecification::new(ShaderStageType::Vertex, VERT)
                    .with_attribute("a_position", RenderDataType::Vector3Float),
                ShaderStageSpecification::new(ShaderStageType::Fragment, FRAG)
                    .with_uniform("u_color", RenderDataType::Vector4Float),
            ],
            DrawMode::Triangles,
        );
        engine
    }

    #[test]
    fn requests_share_compiled_programs() {
        let mut engine = engine();
        let none = ShaderReplacementDefaults::None;
        let a = engine.compiled_program("FLAT", &["GLSL_VERSION"], none).unwrap();
        let b = engine
            .compiled_program("FLAT", &["GLSL_VERSION", "", "GLSL_VERSION"], none)
            .unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        let c = engine
            .compiled_program::<&str>("FLAT", &[], ShaderReplacementDefaults::Process)
            .unwrap();
        assert!(!Rc::ptr_eq(&a, &c));
        assert_eq!(engine.cached_program_count(), 2);
    }

    #[test]
    fn unknown_programs_and_rules_fail() {
        let mut engine = engine();
        let none = ShaderReplacementDefaults::None;
        assert!(matches!(
            engine.request_shader::<&str>("NOPE", &[], none),
            Err(RenderError::UnknownName {
                kind: NameKind::Program,
                ..
            })
        ));
        assert!(matches!(
            engine.request_shader("FLAT", &["NOPE"], none),
            Err(RenderError::UnknownName {
                kind: NameKind::Rule,
                ..
            })
        ));
        assert_eq!(engine.cached_program_count(), 0);
    }

    #[test]
    fn slice_planes_edit_the_scene_preset() {
        let mut engine = engine();
        engine.add_slice_plane("p0");
        assert!(engine.has_rule("SLICE_PLANE_CULL_p0"));
        assert!(engine.has_rule("SLICE_PLANE_VOLUMEGRID_CULL_p0"));
        let mut p = engine
            .request_shader::<&str>("FLAT", &[], ShaderReplacementDefaults::SceneObject)
            .unwrap();
        assert!(p.has_uniform("u_slicePlaneNormal_p0"));
        p.set_uniform("u_slicePlaneCenter_p0", Vec3::ZERO).unwrap();
        p.set_uniform("u_slicePlaneNormal_p0", Vec3::X).unwrap();
        p.set_uniform("u_color", Vec4::ONE).unwrap();
        p.set_attribute("a_position", &[Vec3::ZERO; 3]).unwrap();
        p.draw().unwrap();

        let unsliced = engine
            .request_shader::<&str>(
                "FLAT",
                &[],
                ShaderReplacementDefaults::SceneObjectNoSlice,
            )
            .unwrap();
        assert!(!unsliced.has_uniform("u_slicePlaneNormal_p0"));

        engine.remove_slice_plane("p0");
        assert!(!engine
            .options()
            .presets
            .scene_object
            .iter()
            .any(|r| r.starts_with(SLICE_PLANE_RULE_PREFIX)));
        assert_eq!(engine.cached_program_count(), 2);
    }

    #[test]
    fn common_source_reaches_new_programs() {
        let device = Rc::new(HeadlessDevice::new());
        let mut engine =
            Engine::new(device.clone(), EngineOptions::default()).unwrap();
        engine.register_program(
            "FLAT",
            vec![
                ShaderStageSpecification::new(ShaderStageType::Vertex, VERT)
                    .with_attribute("a_position", RenderDataType::Vector3Float),
                ShaderStageSpecification::new(ShaderStageType::Fragment, FRAG),
            ],
            DrawMode::Triangles,
        );
        engine.set_common_source("float shared_helper() { return 1.0; }");
        let _program = engine
            .compiled_program::<&str>("FLAT", &[], ShaderReplacementDefaults::Process)
            .unwrap();
        let sources = device.compiled_sources();
        assert_eq!(sources.len(), 2);
        for (_, src) in sources {
            assert!(src.starts_with("#version 330 core"));
            assert!(src.ends_with("float shared_helper() { return 1.0; }"));
        }
    }

    #[test]
    fn colormaps_are_registered_by_name() {
        let mut engine = engine();
        engine.register_colormap(
            Colormap::new("gray", vec![Vec3::ZERO, Vec3::ONE]).unwrap(),
        );
        assert_eq!(engine.colormap("gray").unwrap().values().len(), 2);
        assert!(matches!(
            engine.colormap("viridis"),
            Err(RenderError::UnknownName {
                kind: NameKind::Colormap,
                ..
            })
        ));
    }

    #[test]
    fn display_read_back_covers_the_viewport() {
        let engine = engine();
        engine.resize_display(4, 3).unwrap();
        engine.display_buffer().set_clear_color(Vec3::ONE);
        engine.display_buffer().set_clear_alpha(1.0);
        engine.display_buffer().clear().unwrap();
        let pixels = engine.read_display_buffer().unwrap();
        assert_eq!(pixels.len(), 4 * 3 * 4);
        assert!(pixels.iter().all(|&b| b == 255));
    }

    #[test]
    fn options_set_the_error_policy() {
        let mut options = EngineOptions::default();
        options.errors.mode = ErrorMode::LogOnly;
        let mut engine =
            Engine::new(Rc::new(HeadlessDevice::new()), options).unwrap();
        assert_eq!(engine.context().error_mode(), ErrorMode::LogOnly);
        engine.set_options(EngineOptions::default());
        assert_eq!(engine.context().error_mode(), ErrorMode::Fatal);
    }
}

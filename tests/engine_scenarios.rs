//! End-to-end scenarios against the headless device.

use std::rc::Rc;

use glam::{UVec3, Vec3, Vec4};
use scivis_render::device::HeadlessDevice;
use scivis_render::engine::{Engine, ShaderReplacementDefaults};
use scivis_render::error::RenderError;
use scivis_render::gpu::{
    RenderBufferType, RenderDataType, TextureFormat, UniformValue,
};
use scivis_render::options::EngineOptions;
use scivis_render::shader::{
    DrawMode, ShaderReplacementRule, ShaderStageSpecification,
    ShaderStageType,
};

const VERT: &str = "${ GLSL_VERSION }$\nin vec3 a_position;\n\
    void main() { gl_Position = vec4(a_position, 1.0); }";

const FRAG: &str = "${ GLSL_VERSION }$\nuniform vec4 u_color;\n\
    uniform float u_unused;\n${ FRAG_DECLARATIONS }$\nout vec4 o;\n\
    vec3 cullPos;\nvoid main() {\n${ GLOBAL_FRAGMENT_FILTER_PREP }$\n\
    ${ GLOBAL_FRAGMENT_FILTER }$\n${ GENERATE_COLOR }$\no = u_color;\n}";

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn setup() -> (Rc<HeadlessDevice>, Engine) {
    init_logging();
    let device = Rc::new(HeadlessDevice::new());
    let mut engine =
        Engine::new(device.clone(), EngineOptions::default()).unwrap();
    let stages = || {
        vec![
            ShaderStageSpecification::new(ShaderStageType::Vertex, VERT)
                .with_attribute("a_position", RenderDataType::Vector3Float),
            ShaderStageSpecification::new(ShaderStageType::Fragment, FRAG)
                .with_uniform("u_color", RenderDataType::Vector4Float)
                .with_uniform("u_unused", RenderDataType::Float),
        ]
    };
    engine.register_program("FLAT", stages(), DrawMode::Triangles);
    engine.register_program("FLAT_INDEXED", stages(), DrawMode::IndexedTriangles);
    (device, engine)
}

const TRIANGLE: [Vec3; 3] = [Vec3::ZERO, Vec3::X, Vec3::Y];

#[test]
fn flat_triangle_draws_three_vertices() {
    let (device, mut engine) = setup();
    let mut program = engine
        .request_shader::<&str>("FLAT", &[], ShaderReplacementDefaults::SceneObject)
        .unwrap();
    program.set_attribute("a_position", &TRIANGLE).unwrap();
    program.set_uniform("u_color", Vec4::new(1.0, 0.0, 0.0, 1.0)).unwrap();
    program.draw().unwrap();

    assert_eq!(program.draw_data_length(), 3);
    let call = device.draw_calls().pop().unwrap();
    assert_eq!(call.count, 3);
    assert!(!call.indexed);
    assert_eq!(
        device.uniform_value(program.compiled().handle(), "u_color"),
        Some(UniformValue::Vec4(Vec4::new(1.0, 0.0, 0.0, 1.0)))
    );
}

#[test]
fn instances_keep_their_own_uniforms() {
    let (device, mut engine) = setup();
    let defaults = ShaderReplacementDefaults::SceneObject;
    let mut red = engine.request_shader::<&str>("FLAT", &[], defaults).unwrap();
    let mut blue = engine.request_shader::<&str>("FLAT", &[], defaults).unwrap();
    assert!(Rc::ptr_eq(red.compiled(), blue.compiled()));

    for (program, color) in [(&mut red, Vec4::X), (&mut blue, Vec4::Z)] {
        program.set_attribute("a_position", &TRIANGLE).unwrap();
        program.set_uniform("u_color", color).unwrap();
    }
    red.draw().unwrap();
    blue.draw().unwrap();
    red.draw().unwrap();

    let handle = red.compiled().handle();
    assert_eq!(
        device.uniform_value(handle, "u_color"),
        Some(UniformValue::Vec4(Vec4::X))
    );
    assert_eq!(blue.uniform_value("u_color"), Some(UniformValue::Vec4(Vec4::Z)));
}

#[test]
fn cache_separates_rule_lists() {
    let (_device, mut engine) = setup();
    engine.register_rule(
        ShaderReplacementRule::new("TINT")
            .with_replacement("FRAG_DECLARATIONS", "uniform vec4 u_tint;")
            .with_replacement("GENERATE_COLOR", "o = u_tint * u_tint;")
            .with_uniform("u_tint", RenderDataType::Vector4Float),
    );
    let scene = ShaderReplacementDefaults::SceneObject;
    let plain = engine.compiled_program::<&str>("FLAT", &[], scene).unwrap();
    let tinted = engine.compiled_program("FLAT", &["TINT"], scene).unwrap();
    let again = engine
        .compiled_program("FLAT", &["TINT", "TINT", ""], scene)
        .unwrap();

    assert!(!Rc::ptr_eq(&plain, &tinted));
    assert!(Rc::ptr_eq(&tinted, &again));
    assert_eq!(engine.cached_program_count(), 2);

    let mut program = engine.request_shader("FLAT", &["TINT"], scene).unwrap();
    assert!(program.has_uniform("u_tint"));
    program.set_attribute("a_position", &TRIANGLE).unwrap();
    program.set_uniform("u_color", Vec4::ONE).unwrap();
    assert!(matches!(program.validate(), Err(RenderError::InvalidState(_))));
    program.set_uniform("u_tint", Vec4::ONE).unwrap();
    assert_eq!(program.validate().unwrap(), 3);
}

#[test]
fn optimized_out_uniform_is_a_silent_no_op() {
    let (_device, mut engine) = setup();
    let mut program = engine
        .request_shader::<&str>("FLAT", &[], ShaderReplacementDefaults::Process)
        .unwrap();
    assert!(!program.has_uniform("u_unused"));
    program.set_uniform("u_unused", 2.0_f32).unwrap();
    assert_eq!(program.uniform_value("u_unused"), None);

    program.set_attribute("a_position", &TRIANGLE).unwrap();
    program.set_uniform("u_color", Vec4::ONE).unwrap();
    program.draw().unwrap();
}

#[test]
fn validation_reports_missing_and_mismatched_inputs() {
    let (_device, mut engine) = setup();
    let mut program = engine
        .request_shader::<&str>("FLAT", &[], ShaderReplacementDefaults::Process)
        .unwrap();

    program.set_uniform("u_color", Vec4::ONE).unwrap();
    assert!(matches!(program.validate(), Err(RenderError::InvalidState(_))));

    assert!(matches!(
        program.set_uniform("u_color", 1.0_f32),
        Err(RenderError::TypeMismatch(_))
    ));
    assert!(matches!(
        program.set_uniform("u_missing", 1.0_f32),
        Err(RenderError::UnknownName { .. })
    ));
}

#[test]
fn indexed_triangles_count_indices() {
    let (device, mut engine) = setup();
    let mut program = engine
        .request_shader::<&str>(
            "FLAT_INDEXED",
            &[],
            ShaderReplacementDefaults::Process,
        )
        .unwrap();
    program
        .set_attribute("a_position", &[Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::ONE])
        .unwrap();
    program.set_uniform("u_color", Vec4::ONE).unwrap();
    assert!(matches!(program.validate(), Err(RenderError::InvalidState(_))));

    let index = engine
        .generate_attribute_buffer_with(&[UVec3::new(0, 1, 2), UVec3::new(1, 3, 2)])
        .unwrap();
    program.set_index(Rc::new(index)).unwrap();
    program.draw().unwrap();

    let call = device.draw_calls().pop().unwrap();
    assert!(call.indexed);
    assert_eq!(call.count, 6);
}

#[test]
fn depth_renderbuffer_as_color_attachment_is_accepted() {
    let (_device, engine) = setup();
    let fb = engine.generate_frame_buffer(16, 16).unwrap();
    let depth = engine
        .generate_render_buffer(RenderBufferType::Depth, 16, 16)
        .unwrap();
    fb.add_color_buffer(Rc::new(depth)).unwrap();
    assert_eq!(fb.color_attachment_count(), 1);
    assert!(!fb.has_depth());
}

#[test]
fn resized_texture_reads_back_zeroed() {
    let (_device, engine) = setup();
    let texture = engine
        .generate_texture_2d(TextureFormat::Rgba32F, 64, 64, None)
        .unwrap();
    let filled = vec![Vec4::ONE; 64 * 64];
    texture.set_data(&filled).unwrap();

    texture.resize_2d(128, 128).unwrap();
    assert_eq!(texture.extents(), [128, 128, 1]);
    let texels = texture.get_data_vector4().unwrap();
    assert_eq!(texels.len(), 128 * 128);
    assert!(texels.iter().all(|t| *t == Vec4::ZERO));
    assert!(matches!(
        texture.get_data_scalar(),
        Err(RenderError::TypeMismatch(_))
    ));
}

#[test]
fn offscreen_pass_renders_into_attachments() {
    let (device, mut engine) = setup();
    let fb = engine.generate_frame_buffer(32, 32).unwrap();
    let color = Rc::new(
        engine
            .generate_texture_2d(TextureFormat::Rgba8, 32, 32, None)
            .unwrap(),
    );
    let depth = engine
        .generate_render_buffer(RenderBufferType::Depth, 32, 32)
        .unwrap();
    fb.add_color_buffer(Rc::clone(&color)).unwrap();
    fb.add_depth_buffer(Rc::new(depth)).unwrap();
    fb.set_draw_buffers().unwrap();
    fb.set_viewport(0, 0, 32, 32);
    fb.set_clear_color(Vec3::new(1.0, 0.0, 0.0));
    fb.set_clear_alpha(1.0);
    assert!(fb.bind_for_rendering().unwrap());
    fb.clear().unwrap();

    let mut program = engine
        .request_shader::<&str>("FLAT", &[], ShaderReplacementDefaults::Process)
        .unwrap();
    program.set_attribute("a_position", &TRIANGLE).unwrap();
    program.set_uniform("u_color", Vec4::ONE).unwrap();
    program.draw().unwrap();
    assert_eq!(device.draw_calls().pop().unwrap().framebuffer, fb.handle());

    let pixel = fb.read_float4(0, 0).unwrap();
    assert_eq!(pixel, [1.0, 0.0, 0.0, 1.0]);

    fb.resize(64, 48).unwrap();
    assert_eq!(color.extents(), [64, 48, 1]);
    assert_eq!(fb.read_buffer().unwrap().len(), 64 * 48 * 4);
}

#[test]
fn slice_planes_follow_the_scene_preset() {
    let (_device, mut engine) = setup();
    let scene = ShaderReplacementDefaults::SceneObject;
    engine.add_slice_plane("a");
    let sliced = engine.request_shader::<&str>("FLAT", &[], scene).unwrap();
    assert!(sliced.has_uniform("u_slicePlaneCenter_a"));

    engine.remove_slice_plane("a");
    let unsliced = engine.request_shader::<&str>("FLAT", &[], scene).unwrap();
    assert!(!unsliced.has_uniform("u_slicePlaneCenter_a"));
    assert!(!Rc::ptr_eq(sliced.compiled(), unsliced.compiled()));
    assert!(engine.has_rule("SLICE_PLANE_CULL_a"));
}

#[test]
fn options_round_trip_through_toml() {
    init_logging();
    let path = std::env::temp_dir()
        .join(format!("scivis-render-{}", std::process::id()))
        .join("engine.toml");
    let mut options = EngineOptions::default();
    options.shaders.log_source = true;
    options.presets.process.push("EXTRA".to_owned());
    options.save(&path).unwrap();

    let engine =
        Engine::from_options_file(Rc::new(HeadlessDevice::new()), &path).unwrap();
    assert_eq!(engine.options(), &options);
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

use criterion::{criterion_group, criterion_main, Criterion, black_box};
use glam::Vec3;
use scivis_render::engine::{Engine, ShaderReplacementDefaults};
use scivis_render::gpu::{AttributeBuffer, RenderContext, RenderDataType};
use scivis_render::shader::library::default_rules;
use scivis_render::shader::{
    apply_shader_replacements, DrawMode, ShaderStageSpecification,
    ShaderStageType,
};

const VERT: &str = "${ GLSL_VERSION }$\nin vec3 a_position;\n\
    void main() { gl_Position = vec4(a_position, 1.0); }";
const FRAG: &str = "${ GLSL_VERSION }$\n${ FRAG_DECLARATIONS }$\nout vec4 o;\n\
    vec3 cullPos;\nvoid main() {\n${ GLOBAL_FRAGMENT_FILTER_PREP }$\n\
    ${ GLOBAL_FRAGMENT_FILTER }$\no = vec4(1.0);\n}";

fn stages() -> Vec<ShaderStageSpecification> {
    vec![
        ShaderStageSpecification::new(ShaderStageType::Vertex, VERT)
            .with_attribute("a_position", RenderDataType::Vector3Float),
        ShaderStageSpecification::new(ShaderStageType::Fragment, FRAG),
    ]
}

fn buffer_growth_benchmark(c: &mut Criterion) {
    let ctx = RenderContext::headless();
    let mut group = c.benchmark_group("attribute_buffer_growth");

    for count in [64, 1024, 16384].iter() {
        let data = vec![Vec3::ONE; *count];
        group.bench_function(format!("{}_vertices", count), |b| {
            b.iter(|| {
                let buffer =
                    AttributeBuffer::new(&ctx, RenderDataType::Vector3Float, 1)
                        .unwrap();
                buffer.set_data(&data[..count / 2]).unwrap();
                buffer.set_data(black_box(&data)).unwrap();
                black_box(buffer.capacity())
            })
        });
    }
    group.finish();
}

fn cache_lookup_benchmark(c: &mut Criterion) {
    let mut engine = Engine::headless().unwrap();
    engine.register_program("FLAT", stages(), DrawMode::Triangles);
    engine.add_slice_plane("a");
    let defaults = ShaderReplacementDefaults::SceneObject;
    let _warm = engine.compiled_program::<&str>("FLAT", &[], defaults).unwrap();

    c.bench_function("program_cache_hit", |b| {
        b.iter(|| {
            black_box(
                engine
                    .compiled_program::<&str>(black_box("FLAT"), &[], defaults)
                    .unwrap(),
            )
        })
    });
}

fn substitution_benchmark(c: &mut Criterion) {
    let stages = stages();
    let rules = default_rules();
    let refs: Vec<_> = rules.iter().collect();

    c.bench_function("apply_default_rules", |b| {
        b.iter(|| black_box(apply_shader_replacements(&stages, &refs).unwrap()))
    });
}

criterion_group!(benches, buffer_growth_benchmark, cache_lookup_benchmark, substitution_benchmark);
criterion_main!(benches);

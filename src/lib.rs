// -- Lint policy ---------------------------------------------------------
// This is the single source of truth for crate-wide lints.

// Broad lint groups
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::nursery)]
// Documentation
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::bare_urls)]
// No panicking in library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
// No debug/print artifacts
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
// Import hygiene
#![deny(clippy::wildcard_imports)]
// Complexity limits (thresholds in clippy.toml)
#![deny(clippy::cognitive_complexity)]
#![deny(clippy::too_many_lines)]
#![deny(clippy::excessive_nesting)]
// Function signature hygiene
#![deny(clippy::too_many_arguments)]
#![deny(clippy::fn_params_excessive_bools)]
// Clone / pass-by-value hygiene
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::implicit_clone)]
// String hygiene
#![deny(clippy::inefficient_to_string)]
#![deny(clippy::redundant_closure_for_method_calls)]
#![deny(clippy::manual_string_new)]
#![deny(clippy::str_to_string)]
// Cargo lints (warn, not deny since cargo lints can be noisy)
#![warn(clippy::cargo)]
// Unused / redundant code
#![deny(unused_results)]
#![deny(unused_qualifications)]
// Cast hygiene
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]

//! GL-style graphics backend core for interactive scientific
//! visualization.
//!
//! The crate turns host data, shader source text and draw requests into
//! device work: typed vertex buffers, textures, renderbuffers and
//! framebuffers, a `${ TAG }$` text-substitution engine for composing
//! shader variants, linked programs shared through a cache, and per-owner
//! program instances that validate their bindings before drawing.
//!
//! # Key entry points
//!
//! - [`engine::Engine`] - registries, program cache, global state and
//!   resource factories
//! - [`shader::ShaderProgram`] - per-drawable bindings, validation and draw
//! - [`device::Device`] - the native context everything goes through;
//!   [`device::HeadlessDevice`] runs without a GPU
//! - [`options::EngineOptions`] - error policy, shader logging and preset
//!   rule lists, loadable from TOML
//!
//! # Example
//!
//! ```
//! use glam::{Vec3, Vec4};
//! use scivis_render::engine::{Engine, ShaderReplacementDefaults};
//! use scivis_render::gpu::RenderDataType;
//! use scivis_render::shader::{
//!     DrawMode, ShaderStageSpecification, ShaderStageType,
//! };
//!
//! # fn main() -> Result<(), scivis_render::error::RenderError> {
//! let mut engine = Engine::headless()?;
//! engine.register_program(
//!     "FLAT",
//!     vec![
//!         ShaderStageSpecification::new(
//!             ShaderStageType::Vertex,
//!             "${ GLSL_VERSION }$\nin vec3 a_position;\n\
//!              void main() { gl_Position = vec4(a_position, 1.0); }",
//!         )
//!         .with_attribute("a_position", RenderDataType::Vector3Float),
//!         ShaderStageSpecification::new(
//!             ShaderStageType::Fragment,
//!             "${ GLSL_VERSION }$\nuniform vec4 u_color;\nout vec4 o;\n\
//!              void main() { o = u_color; }",
//!         )
//!         .with_uniform("u_color", RenderDataType::Vector4Float),
//!     ],
//!     DrawMode::Triangles,
//! );
//!
//! let mut program = engine.request_shader::<&str>(
//!     "FLAT",
//!     &[],
//!     ShaderReplacementDefaults::Process,
//! )?;
//! program.set_attribute("a_position", &[Vec3::ZERO, Vec3::X, Vec3::Y])?;
//! program.set_uniform("u_color", Vec4::new(1.0, 0.5, 0.0, 1.0))?;
//! program.draw()?;
//! assert_eq!(program.draw_data_length(), 3);
//! # Ok(())
//! # }
//! ```

pub mod device;
pub mod engine;
pub mod error;
pub mod gpu;
pub mod options;
pub mod shader;

//! wgpu side of the compositor.
//!
//! - `context` owns the instance/adapter/device and, for windowed hosts, the
//!   swapchain surface. It also tracks device loss.
//! - `uniforms` mirrors the fragment program's std140 parameter block.
//! - `geometry` holds the static full-screen quad streams.
//! - `textures` covers the per-frame source upload and the fixed-size output
//!   target with its readback path.
//! - `pipeline` turns validated GLSL into render pipelines.
//! - `compositor` glues everything together behind `render(timestamp)`.

mod compositor;
mod context;
mod geometry;
mod pipeline;
mod textures;
pub(crate) mod uniforms;

pub use compositor::{Compositor, CompositorError, CrtEffect, RenderOutcome};
pub use context::{ContextHandle, GpuContext, WindowSurface};
pub use textures::UploadOutcome;
pub use uniforms::EffectUniforms;

pub(crate) use pipeline::{texture_bind_group, PresentProgram};
pub(crate) use textures::FrameTexture;
pub(crate) use geometry::QUAD_VERTEX_COUNT;

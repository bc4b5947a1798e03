//! Renderer crate for the CRT compositor.
//!
//! Takes any rendered 2D frame and draws it again through a full-screen CRT
//! pass: curvature, rolling scanlines, chromatic shift, vignette, flicker and
//! noise. The overall flow is:
//!
//! ```text
//!   host frame loop
//!          │ FrameSource + timestamp
//!          ▼
//!   CrtEffect::render ──▶ Compositor ──▶ FrameTexture upload ─▶ draw quad ─▶ OutputTarget
//!          ▲                   │                                                 │
//!          │                   └─▶ ConfigSlot snapshot ─▶ EffectUniforms        ▼
//!          │                                                           WindowPresenter / capture()
//! ```
//!
//! Shader programs are validated on the CPU (`compile`) before any GPU object is
//! created, so a broken program yields `CrtEffect::Unavailable` and the host
//! falls back to showing its frame unmodified. `effect` holds a software
//! rendition of the same fragment stage for still exports and tests.

pub mod compile;
pub mod effect;
mod gpu;
mod types;
mod window;

pub use compile::{compile_program, CompileError, ProgramLayout, ShaderSources, Stage};
pub use effect::render_software;
pub use gpu::{
    Compositor, CompositorError, ContextHandle, CrtEffect, EffectUniforms, GpuContext,
    RenderOutcome, UploadOutcome, WindowSurface,
};
pub use types::{
    AssetState, CompositorOptions, FrameSource, SurfaceLayout, BYTES_PER_PIXEL,
    DEFAULT_RESOLUTION,
};
pub use window::{PresentOutcome, WindowPresenter};

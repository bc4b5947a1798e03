use std::sync::Arc;

use anyhow::anyhow;
use effectconfig::ConfigSlot;
use image::RgbaImage;
use tracing::{debug, warn};
use wgpu::util::DeviceExt;

use crate::compile::{compile_program, CompileError, ProgramLayout, ShaderSources};
use crate::types::{CompositorOptions, FrameSource, SurfaceLayout};

use super::context::GpuContext;
use super::geometry::QUAD_VERTEX_COUNT;
use super::pipeline::{texture_bind_group, EffectProgram};
use super::textures::{FrameTexture, OutputTarget, UploadOutcome, TEXTURE_FORMAT};
use super::uniforms::EffectUniforms;

#[derive(Debug, thiserror::Error)]
pub enum CompositorError {
    #[error("no graphics context available: {0:#}")]
    Context(anyhow::Error),
    #[error(transparent)]
    Shader(#[from] CompileError),
    #[error("{what} size {width}x{height} is not supported (GPU limit {limit})")]
    Size {
        what: &'static str,
        width: u32,
        height: u32,
        limit: u32,
    },
}

/// What a single `render` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// The effect was drawn into the output target.
    Drawn(UploadOutcome),
    /// The GPU rejected this frame; the next call tries again.
    Dropped,
    /// The device is gone. Every later call is a no-op.
    ContextLost,
    /// The effect could not be built; nothing was touched.
    Disabled,
}

/// Full-screen CRT pass over a [`FrameSource`].
///
/// Everything except the frame texture contents and the uniform values is
/// created once in [`Compositor::new`] and reused by every `render`.
pub struct Compositor {
    context: Arc<GpuContext>,
    program: EffectProgram,
    frame: FrameTexture,
    output: OutputTarget,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    frame_bind_group: wgpu::BindGroup,
    config: ConfigSlot,
    options: CompositorOptions,
}

impl Compositor {
    /// Builds the compositor with the built-in CRT program.
    pub fn new(
        context: Arc<GpuContext>,
        options: CompositorOptions,
        config: ConfigSlot,
    ) -> Result<Self, CompositorError> {
        Self::with_sources(context, options, &ShaderSources::crt(), config)
    }

    pub fn with_sources(
        context: Arc<GpuContext>,
        options: CompositorOptions,
        sources: &ShaderSources,
        config: ConfigSlot,
    ) -> Result<Self, CompositorError> {
        let limit = context.max_texture_dimension();
        check_size("input", options.input_size, limit)?;
        check_size("output", options.output_size, limit)?;

        let program = EffectProgram::new(&context, TEXTURE_FORMAT, sources)?;

        let (resources, error) = context.scoped(|device| {
            let frame = FrameTexture::new(device, options.input_size);
            let output = OutputTarget::new(device, options.output_size);
            let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("effect uniforms"),
                contents: EffectUniforms::default().as_bytes(),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
            let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("effect uniform bind group"),
                layout: &program.uniform_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                }],
            });
            let frame_bind_group = texture_bind_group(
                device,
                "frame texture bind group",
                &program.texture_layout,
                &frame.view,
                &frame.sampler,
            );
            (frame, output, uniform_buffer, uniform_bind_group, frame_bind_group)
        });
        if let Some(err) = error {
            return Err(CompositorError::Context(anyhow!(
                "failed to allocate compositor resources: {err}"
            )));
        }
        let (frame, output, uniform_buffer, uniform_bind_group, frame_bind_group) = resources;

        debug!(
            input = ?options.input_size,
            output = ?options.output_size,
            "compositor ready"
        );

        Ok(Self {
            context,
            program,
            frame,
            output,
            uniform_buffer,
            uniform_bind_group,
            frame_bind_group,
            config,
            options,
        })
    }

    pub fn options(&self) -> CompositorOptions {
        self.options
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }

    /// Attribute locations and uniform offsets resolved when the program was built.
    pub fn program_layout(&self) -> &ProgramLayout {
        &self.program.layout
    }

    pub fn config_slot(&self) -> &ConfigSlot {
        &self.config
    }

    pub fn config_slot_mut(&mut self) -> &mut ConfigSlot {
        &mut self.config
    }

    /// On-screen placement of the output, mirrored from the source surface.
    pub fn output_layout(&self) -> SurfaceLayout {
        self.output.layout()
    }

    pub fn sync_layout(&mut self, layout: SurfaceLayout) {
        self.output.sync_layout(layout);
    }

    pub(crate) fn output_target(&self) -> &OutputTarget {
        &self.output
    }

    /// Uploads `source`, then draws one frame of the effect at `timestamp_ms`.
    ///
    /// Uses whichever config snapshot is current at the start of the call;
    /// a reload finishing mid-frame only becomes visible on the next call.
    pub fn render(&mut self, source: &dyn FrameSource, timestamp_ms: f64) -> RenderOutcome {
        if self.context.is_lost() {
            return RenderOutcome::ContextLost;
        }

        self.config.poll_reload();
        let snapshot = self.config.snapshot();
        let uniforms = EffectUniforms::from_config(&snapshot, timestamp_ms);

        let (upload, error) = self.context.scoped(|device| {
            let queue = &self.context.queue;
            let upload = self.frame.upload(queue, source);
            queue.write_buffer(&self.uniform_buffer, 0, uniforms.as_bytes());

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("crt encoder"),
            });
            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("crt pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &self.output.view,
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    occlusion_query_set: None,
                    timestamp_writes: None,
                });
                let (width, height) = self.output.size();
                pass.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
                pass.set_pipeline(&self.program.pipeline);
                pass.set_bind_group(0, &self.uniform_bind_group, &[]);
                pass.set_bind_group(1, &self.frame_bind_group, &[]);
                self.program.geometry.bind(&mut pass);
                pass.draw(0..QUAD_VERTEX_COUNT, 0..1);
            }
            queue.submit(Some(encoder.finish()));
            upload
        });

        if let Some(err) = error {
            if self.context.is_lost() {
                return RenderOutcome::ContextLost;
            }
            warn!(error = %err, "dropped compositor frame");
            return RenderOutcome::Dropped;
        }

        match upload {
            UploadOutcome::Uploaded => {}
            UploadOutcome::NotReady => debug!("frame source not ready; reusing previous texture"),
            UploadOutcome::SizeMismatch { found } => debug!(
                ?found,
                expected = ?self.frame.size(),
                "frame source size mismatch; skipped upload"
            ),
        }
        RenderOutcome::Drawn(upload)
    }

    /// Reads the output target back to the CPU.
    pub fn capture(&self) -> anyhow::Result<RgbaImage> {
        self.output
            .capture(&self.context.device, &self.context.queue)
    }
}

fn check_size(what: &'static str, size: (u32, u32), limit: u32) -> Result<(), CompositorError> {
    let (width, height) = size;
    if width == 0 || height == 0 || width > limit || height > limit {
        return Err(CompositorError::Size {
            what,
            width,
            height,
            limit,
        });
    }
    Ok(())
}

/// The compositor, or the reason it could not be built.
///
/// Hosts hold one of these instead of an `Option` so the degraded path is
/// explicit: `Unavailable` renders nothing and the host shows the source as-is.
pub enum CrtEffect {
    Active(Compositor),
    Unavailable { reason: CompositorError },
}

impl CrtEffect {
    /// Validates `sources` first and only asks `connect` for a GPU context if
    /// the program is sound. Never panics; every failure becomes `Unavailable`.
    pub fn create<F>(
        connect: F,
        options: CompositorOptions,
        sources: &ShaderSources,
        config: ConfigSlot,
    ) -> Self
    where
        F: FnOnce() -> anyhow::Result<Arc<GpuContext>>,
    {
        if let Err(err) = compile_program(sources) {
            return Self::unavailable(CompositorError::Shader(err));
        }
        let context = match connect() {
            Ok(context) => context,
            Err(err) => return Self::unavailable(CompositorError::Context(err)),
        };
        match Compositor::with_sources(context, options, sources, config) {
            Ok(compositor) => CrtEffect::Active(compositor),
            Err(err) => Self::unavailable(err),
        }
    }

    fn unavailable(reason: CompositorError) -> Self {
        warn!(error = %reason, "CRT effect unavailable; presenting source unmodified");
        CrtEffect::Unavailable { reason }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, CrtEffect::Active(_))
    }

    pub fn compositor(&self) -> Option<&Compositor> {
        match self {
            CrtEffect::Active(compositor) => Some(compositor),
            CrtEffect::Unavailable { .. } => None,
        }
    }

    pub fn compositor_mut(&mut self) -> Option<&mut Compositor> {
        match self {
            CrtEffect::Active(compositor) => Some(compositor),
            CrtEffect::Unavailable { .. } => None,
        }
    }

    pub fn render(&mut self, source: &dyn FrameSource, timestamp_ms: f64) -> RenderOutcome {
        match self {
            CrtEffect::Active(compositor) => compositor.render(source, timestamp_ms),
            CrtEffect::Unavailable { .. } => RenderOutcome::Disabled,
        }
    }

    pub fn sync_layout(&mut self, layout: SurfaceLayout) {
        if let CrtEffect::Active(compositor) = self {
            compositor.sync_layout(layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn broken_sources() -> ShaderSources {
        let crt = ShaderSources::crt();
        ShaderSources::new(crt.vertex.into_owned(), "#version 450\nvoid main() { oops }")
    }

    #[test]
    fn broken_program_never_requests_a_context() {
        let asked = Cell::new(false);
        let effect = CrtEffect::create(
            || {
                asked.set(true);
                Err(anyhow!("should not be called"))
            },
            CompositorOptions::default(),
            &broken_sources(),
            ConfigSlot::new(),
        );
        assert!(!asked.get());
        assert!(matches!(
            effect,
            CrtEffect::Unavailable {
                reason: CompositorError::Shader(CompileError::Parse { .. })
            }
        ));
    }

    #[test]
    fn render_after_compile_failure_is_a_no_op() {
        let mut effect = CrtEffect::create(
            || Err(anyhow!("unused")),
            CompositorOptions::default(),
            &broken_sources(),
            ConfigSlot::new(),
        );
        let source = RgbaImage::new(1024, 1024);
        for frame in 0..3 {
            assert_eq!(effect.render(&source, frame as f64 * 16.0), RenderOutcome::Disabled);
        }
        effect.sync_layout(SurfaceLayout::new(10.0, 10.0, 0.0, 0.0));
        assert!(effect.compositor().is_none());
        assert!(!effect.is_active());
    }

    #[test]
    fn missing_context_is_reported() {
        let effect = CrtEffect::create(
            || Err(anyhow!("no adapter")),
            CompositorOptions::default(),
            &ShaderSources::crt(),
            ConfigSlot::new(),
        );
        match effect {
            CrtEffect::Unavailable {
                reason: CompositorError::Context(err),
            } => assert!(err.to_string().contains("no adapter")),
            _ => panic!("expected missing context"),
        }
    }

    #[test]
    fn zero_sized_target_is_rejected() {
        assert!(matches!(
            check_size("output", (0, 1024), 8192),
            Err(CompositorError::Size { .. })
        ));
        assert!(check_size("output", (1024, 1024), 8192).is_ok());
        assert!(check_size("output", (16384, 16), 8192).is_err());
    }
}

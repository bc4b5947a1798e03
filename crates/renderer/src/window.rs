use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::{debug, warn};
use winit::dpi::PhysicalSize;

use crate::compile::CompileError;
use crate::gpu::{
    texture_bind_group, Compositor, FrameTexture, GpuContext, PresentProgram, UploadOutcome,
    WindowSurface, QUAD_VERTEX_COUNT,
};
use crate::types::{FrameSource, SurfaceLayout};

/// Result of presenting one frame to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Only the background was cleared (hidden or zero-sized layout).
    Cleared,
    /// The swapchain was out of date and has been reconfigured; try next frame.
    Skipped,
}

/// Puts composited frames on screen.
///
/// The output target keeps its own resolution; the presenter scales it into
/// the letterboxed layout rectangle. When the effect is unavailable it shows
/// the source through the same path so the host still has a picture.
pub struct WindowPresenter {
    context: Arc<GpuContext>,
    surface: WindowSurface,
    program: PresentProgram,
    output_bind_group: KeyedSlot<wgpu::Texture, wgpu::BindGroup>,
    passthrough: Option<Passthrough>,
    rejected_source: Option<(u32, u32)>,
}

struct Passthrough {
    texture: FrameTexture,
    bind_group: wgpu::BindGroup,
}

/// Holds one value together with the key it was built for; rebuilt only when
/// the key changes.
struct KeyedSlot<K, V> {
    entry: Option<(K, V)>,
}

impl<K: PartialEq, V> KeyedSlot<K, V> {
    fn new() -> Self {
        Self { entry: None }
    }

    fn get_or_insert_with(&mut self, key: K, build: impl FnOnce() -> V) -> &V {
        if self.entry.as_ref().is_some_and(|(current, _)| *current != key) {
            self.entry = None;
        }
        let (_, value) = self.entry.get_or_insert_with(|| (key, build()));
        value
    }
}

impl WindowPresenter {
    pub fn new(context: Arc<GpuContext>, surface: WindowSurface) -> Result<Self, CompileError> {
        let program = PresentProgram::new(&context, surface.format())?;
        Ok(Self {
            context,
            surface,
            program,
            output_bind_group: KeyedSlot::new(),
            passthrough: None,
            rejected_source: None,
        })
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.surface.size()
    }

    pub fn resize(&mut self, size: PhysicalSize<u32>) {
        self.surface.resize(&self.context.device, size);
    }

    /// Draws the compositor's output into its synced layout.
    pub fn present_output(&mut self, compositor: &Compositor) -> Result<PresentOutcome> {
        let target = compositor.output_target();
        let device = &self.context.device;
        let texture_layout = &self.program.texture_layout;
        let bind_group = self
            .output_bind_group
            .get_or_insert_with(target.texture.clone(), || {
                texture_bind_group(
                    device,
                    "present output bind group",
                    texture_layout,
                    &target.view,
                    &target.sampler,
                )
            })
            .clone();
        self.blit(Some(&bind_group), compositor.output_layout())
    }

    /// Shows `source` unmodified; the fallback when no compositor exists.
    ///
    /// A source the device cannot hold as a texture only clears the window.
    pub fn present_source(
        &mut self,
        source: &dyn FrameSource,
        layout: SurfaceLayout,
    ) -> Result<PresentOutcome> {
        let size = source.size();
        if size.0 == 0 || size.1 == 0 || self.rejected_source == Some(size) {
            return self.blit(None, layout);
        }
        let needs_texture = self
            .passthrough
            .as_ref()
            .map_or(true, |passthrough| passthrough.texture.size() != size);
        if needs_texture {
            self.passthrough = None;
            match FrameTexture::create(&self.context, size) {
                Ok(texture) => {
                    let bind_group = texture_bind_group(
                        &self.context.device,
                        "present source bind group",
                        &self.program.texture_layout,
                        &texture.view,
                        &texture.sampler,
                    );
                    self.passthrough = Some(Passthrough {
                        texture,
                        bind_group,
                    });
                    self.rejected_source = None;
                }
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "cannot show source frame; clearing window instead");
                    self.rejected_source = Some(size);
                    return self.blit(None, layout);
                }
            }
        }
        let Some(passthrough) = self.passthrough.as_ref() else {
            return self.blit(None, layout);
        };

        if let UploadOutcome::SizeMismatch { found } =
            passthrough.texture.upload(&self.context.queue, source)
        {
            debug!(?found, "passthrough upload skipped");
        }
        let bind_group = passthrough.bind_group.clone();
        self.blit(Some(&bind_group), layout)
    }

    fn blit(
        &mut self,
        bind_group: Option<&wgpu::BindGroup>,
        layout: SurfaceLayout,
    ) -> Result<PresentOutcome> {
        if self.context.is_lost() {
            return Err(anyhow!("GPU device lost"));
        }

        let frame = match self.surface.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                debug!("surface lost or outdated; reconfiguring");
                self.surface.reconfigure(&self.context.device);
                return Ok(PresentOutcome::Skipped);
            }
            Err(wgpu::SurfaceError::Timeout) => {
                warn!("timed out acquiring surface texture");
                return Ok(PresentOutcome::Skipped);
            }
            Err(err) => return Err(anyhow!("failed to acquire surface texture: {err}")),
        };
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let viewport = bind_group.and_then(|group| {
            clamp_viewport(layout, self.surface.size()).map(|rect| (group, rect))
        });
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("present encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("present pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
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
            if let Some((group, (x, y, width, height))) = viewport {
                pass.set_viewport(x, y, width, height, 0.0, 1.0);
                pass.set_pipeline(&self.program.pipeline);
                pass.set_bind_group(0, group, &[]);
                self.program.geometry.bind(&mut pass);
                pass.draw(0..QUAD_VERTEX_COUNT, 0..1);
            }
        }
        self.context.queue.submit(Some(encoder.finish()));
        frame.present();

        Ok(if viewport.is_some() {
            PresentOutcome::Presented
        } else {
            PresentOutcome::Cleared
        })
    }
}

/// Intersects `layout` with the surface; `None` when nothing is left to draw.
fn clamp_viewport(layout: SurfaceLayout, surface: PhysicalSize<u32>) -> Option<(f32, f32, f32, f32)> {
    if !layout.is_drawable() {
        return None;
    }
    let max_w = surface.width as f32;
    let max_h = surface.height as f32;
    let left = layout.left.clamp(0.0, max_w);
    let top = layout.top.clamp(0.0, max_h);
    let right = (layout.left + layout.width).clamp(0.0, max_w);
    let bottom = (layout.top + layout.height).clamp(0.0, max_h);
    if right - left < 1.0 || bottom - top < 1.0 {
        return None;
    }
    Some((left, top, right - left, bottom - top))
}

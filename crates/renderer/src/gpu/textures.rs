use std::sync::mpsc;

use anyhow::{anyhow, bail, Context, Result};
use image::RgbaImage;

use super::context::GpuContext;
use crate::types::{AssetState, FrameSource, SurfaceLayout, BYTES_PER_PIXEL};

pub(crate) const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// What happened to a per-frame upload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    /// The source is still loading or failed; the previous contents stay.
    NotReady,
    /// The source does not match the texture's fixed size; nothing was written.
    SizeMismatch { found: (u32, u32) },
}

/// Texture holding the current source frame, sampled with linear filtering and
/// clamped edges.
pub(crate) struct FrameTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    size: (u32, u32),
}

impl FrameTexture {
    pub fn new(device: &wgpu::Device, size: (u32, u32)) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("frame texture"),
            size: extent(size),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = linear_clamp_sampler(device, "frame sampler");

        Self {
            texture,
            view,
            sampler,
            size,
        }
    }

    /// Like [`FrameTexture::new`], but rejects sizes the device cannot hold and
    /// reports allocation errors instead of handing them to the uncaptured-error
    /// handler.
    pub fn create(context: &GpuContext, size: (u32, u32)) -> Result<Self> {
        let limit = context.max_texture_dimension();
        if size.0 == 0 || size.1 == 0 || size.0 > limit || size.1 > limit {
            bail!(
                "frame texture {}x{} is outside the GPU limit of {limit}",
                size.0,
                size.1
            );
        }
        let (texture, error) = context.scoped(|device| Self::new(device, size));
        match error {
            Some(err) => Err(anyhow!("failed to allocate frame texture: {err}")),
            None => Ok(texture),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Copies the whole source into the texture. No partial updates.
    pub fn upload(&self, queue: &wgpu::Queue, source: &dyn FrameSource) -> UploadOutcome {
        if source.state() != AssetState::Ready {
            return UploadOutcome::NotReady;
        }
        let found = source.size();
        let pixels = source.pixels();
        let expected_len = found.0 as usize * found.1 as usize * BYTES_PER_PIXEL as usize;
        if found != self.size || pixels.len() != expected_len {
            return UploadOutcome::SizeMismatch { found };
        }

        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.size.0 * BYTES_PER_PIXEL),
                rows_per_image: Some(self.size.1),
            },
            extent(self.size),
        );
        UploadOutcome::Uploaded
    }
}

/// Fixed-resolution render target the effect draws into.
///
/// Its backing size never changes; only the on-screen placement (`layout`)
/// follows the source surface.
pub(crate) struct OutputTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    size: (u32, u32),
    layout: SurfaceLayout,
    readback: wgpu::Buffer,
    padded_bytes_per_row: u32,
}

impl OutputTarget {
    pub fn new(device: &wgpu::Device, size: (u32, u32)) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("output texture"),
            size: extent(size),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = linear_clamp_sampler(device, "output sampler");

        let padded_bytes_per_row = align_to(
            size.0 * BYTES_PER_PIXEL,
            wgpu::COPY_BYTES_PER_ROW_ALIGNMENT,
        );
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("output readback"),
            size: padded_bytes_per_row as u64 * size.1 as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Self {
            texture,
            view,
            sampler,
            size,
            layout: SurfaceLayout::new(size.0 as f32, size.1 as f32, 0.0, 0.0),
            readback,
            padded_bytes_per_row,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn layout(&self) -> SurfaceLayout {
        self.layout
    }

    /// Mirrors the source's displayed size, offset and visibility.
    pub fn sync_layout(&mut self, layout: SurfaceLayout) {
        self.layout = layout;
    }

    /// Copies the current contents back to the CPU as tightly packed RGBA8.
    pub fn capture(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<RgbaImage> {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("output readback encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(self.size.1),
                },
            },
            extent(self.size),
        );
        queue.submit(Some(encoder.finish()));

        let slice = self.readback.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| anyhow!("wgpu poll failed: {err:?}"))?;
        receiver
            .recv()
            .map_err(|_| anyhow!("readback channel closed"))?
            .context("failed to map output readback buffer")?;

        let mapped = slice.get_mapped_range();
        let row_bytes = (self.size.0 * BYTES_PER_PIXEL) as usize;
        let padded = self.padded_bytes_per_row as usize;
        let mut pixels = Vec::with_capacity(row_bytes * self.size.1 as usize);
        for row in 0..self.size.1 as usize {
            let start = row * padded;
            pixels.extend_from_slice(&mapped[start..start + row_bytes]);
        }
        drop(mapped);
        self.readback.unmap();

        RgbaImage::from_raw(self.size.0, self.size.1, pixels)
            .ok_or_else(|| anyhow!("readback produced a short buffer"))
    }
}

fn linear_clamp_sampler(device: &wgpu::Device, label: &str) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(label),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

fn extent(size: (u32, u32)) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.0,
        height: size.1,
        depth_or_array_layers: 1,
    }
}

fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_align_to_copy_alignment() {
        assert_eq!(align_to(1024 * 4, 256), 4096);
        assert_eq!(align_to(100 * 4, 256), 512);
        assert_eq!(align_to(0, 256), 0);
    }

    #[test]
    fn oversized_frame_texture_is_rejected() {
        let context = match GpuContext::headless() {
            Ok(context) => context,
            Err(err) => {
                eprintln!("skipping GPU test: {err:#}");
                return;
            }
        };
        let limit = context.max_texture_dimension();

        let err = FrameTexture::create(&context, (limit + 1, 16))
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert!(err.contains("outside the GPU limit"), "{err}");
        assert!(FrameTexture::create(&context, (0, 16)).is_err());

        let texture = FrameTexture::create(&context, (16, 16)).unwrap();
        assert_eq!(texture.size(), (16, 16));
    }
}

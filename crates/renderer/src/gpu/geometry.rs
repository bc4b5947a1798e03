use wgpu::util::DeviceExt;

use crate::compile::ProgramLayout;

/// Clip-space corners of the full-screen quad, drawn as a 4-vertex strip.
pub(crate) const QUAD_POSITIONS: [[f32; 2]; 4] = [[-1.0, -1.0], [1.0, -1.0], [-1.0, 1.0], [1.0, 1.0]];

/// Texture coordinates for each corner; v = 0 is the top row of the source.
pub(crate) const QUAD_TEX_COORDS: [[f32; 2]; 4] = [[0.0, 1.0], [1.0, 1.0], [0.0, 0.0], [1.0, 0.0]];

pub(crate) const QUAD_VERTEX_COUNT: u32 = QUAD_POSITIONS.len() as u32;

const STRIDE: wgpu::BufferAddress = std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress;

/// The two static vertex streams, created once and never modified.
pub(crate) struct GeometryBuffers {
    pub positions: wgpu::Buffer,
    pub tex_coords: wgpu::Buffer,
    position_attribute: [wgpu::VertexAttribute; 1],
    tex_coord_attribute: [wgpu::VertexAttribute; 1],
}

impl GeometryBuffers {
    pub fn new(device: &wgpu::Device, layout: &ProgramLayout) -> Self {
        Self::with_locations(device, layout.position_location, layout.tex_coord_location)
    }

    pub fn with_locations(device: &wgpu::Device, position: u32, tex_coord: u32) -> Self {
        let positions = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad positions"),
            contents: bytemuck::cast_slice(&QUAD_POSITIONS),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let tex_coords = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad tex coords"),
            contents: bytemuck::cast_slice(&QUAD_TEX_COORDS),
            usage: wgpu::BufferUsages::VERTEX,
        });

        Self {
            positions,
            tex_coords,
            position_attribute: [wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x2,
                offset: 0,
                shader_location: position,
            }],
            tex_coord_attribute: [wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x2,
                offset: 0,
                shader_location: tex_coord,
            }],
        }
    }

    pub fn vertex_layouts(&self) -> [wgpu::VertexBufferLayout<'_>; 2] {
        [
            wgpu::VertexBufferLayout {
                array_stride: STRIDE,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &self.position_attribute,
            },
            wgpu::VertexBufferLayout {
                array_stride: STRIDE,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &self.tex_coord_attribute,
            },
        ]
    }

    pub fn bind(&self, pass: &mut wgpu::RenderPass<'_>) {
        pass.set_vertex_buffer(0, self.positions.slice(..));
        pass.set_vertex_buffer(1, self.tex_coords.slice(..));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corners_map_top_of_screen_to_top_of_texture() {
        for (position, uv) in QUAD_POSITIONS.iter().zip(QUAD_TEX_COORDS.iter()) {
            assert_eq!(uv[0], (position[0] + 1.0) / 2.0);
            assert_eq!(uv[1], (1.0 - position[1]) / 2.0);
        }
        assert_eq!(QUAD_VERTEX_COUNT, 4);
    }
}

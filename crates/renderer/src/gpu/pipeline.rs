use std::borrow::Cow;

use wgpu::naga::ShaderStage;

use crate::compile::{
    compile_program, parse_stage, CompileError, ProgramLayout, ShaderSources, Stage,
    PRESENT_FRAGMENT_GLSL, QUAD_VERTEX_GLSL,
};

use super::context::GpuContext;
use super::geometry::GeometryBuffers;

fn shader_module(device: &wgpu::Device, label: &str, source: &str, stage: ShaderStage) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Owned(source.to_owned()),
            stage,
            defines: &[],
        },
    })
}

fn texture_layout_entries() -> [wgpu::BindGroupLayoutEntry; 2] {
    [
        wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        },
        wgpu::BindGroupLayoutEntry {
            binding: 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        },
    ]
}

pub(crate) fn texture_bind_group(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    view: &wgpu::TextureView,
    sampler: &wgpu::Sampler,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    })
}

fn strip_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    vertex: &wgpu::ShaderModule,
    fragment: &wgpu::ShaderModule,
    geometry: &GeometryBuffers,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: vertex,
            entry_point: Some("main"),
            buffers: &geometry.vertex_layouts(),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleStrip,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: fragment,
            entry_point: Some("main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview: None,
        cache: None,
    })
}

/// The linked CRT program together with its bind group layouts and the
/// input locations resolved at build time.
pub(crate) struct EffectProgram {
    pub pipeline: wgpu::RenderPipeline,
    pub uniform_layout: wgpu::BindGroupLayout,
    pub texture_layout: wgpu::BindGroupLayout,
    pub geometry: GeometryBuffers,
    pub layout: ProgramLayout,
}

impl EffectProgram {
    /// Validates `sources` on the CPU, then builds the GPU objects inside an
    /// error scope. Any failure leaves nothing half-built behind.
    pub fn new(
        context: &GpuContext,
        format: wgpu::TextureFormat,
        sources: &ShaderSources,
    ) -> Result<Self, CompileError> {
        let layout = compile_program(sources)?;

        let (program, error) = context.scoped(|device| {
            let vertex = shader_module(device, "crt vertex", &sources.vertex, ShaderStage::Vertex);
            let fragment =
                shader_module(device, "crt fragment", &sources.fragment, ShaderStage::Fragment);

            let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("effect uniform layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });
            let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("frame texture layout"),
                entries: &texture_layout_entries(),
            });
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("crt pipeline layout"),
                bind_group_layouts: &[&uniform_layout, &texture_layout],
                push_constant_ranges: &[],
            });

            let geometry = GeometryBuffers::new(device, &layout);
            let pipeline = strip_pipeline(
                device,
                "crt pipeline",
                &pipeline_layout,
                &vertex,
                &fragment,
                &geometry,
                format,
            );

            Self {
                pipeline,
                uniform_layout,
                texture_layout,
                geometry,
                layout,
            }
        });

        match error {
            Some(err) => Err(CompileError::Device(err.to_string())),
            None => Ok(program),
        }
    }
}

/// Draws a finished output texture into a window surface.
pub(crate) struct PresentProgram {
    pub pipeline: wgpu::RenderPipeline,
    pub texture_layout: wgpu::BindGroupLayout,
    pub geometry: GeometryBuffers,
}

impl PresentProgram {
    pub fn new(context: &GpuContext, format: wgpu::TextureFormat) -> Result<Self, CompileError> {
        parse_stage(Stage::Vertex, QUAD_VERTEX_GLSL)?;
        parse_stage(Stage::Fragment, PRESENT_FRAGMENT_GLSL)?;

        let (program, error) = context.scoped(|device| {
            let vertex = shader_module(device, "present vertex", QUAD_VERTEX_GLSL, ShaderStage::Vertex);
            let fragment = shader_module(
                device,
                "present fragment",
                PRESENT_FRAGMENT_GLSL,
                ShaderStage::Fragment,
            );
            let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("present texture layout"),
                entries: &texture_layout_entries(),
            });
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("present pipeline layout"),
                bind_group_layouts: &[&texture_layout],
                push_constant_ranges: &[],
            });
            let geometry = GeometryBuffers::with_locations(device, 0, 1);
            let pipeline = strip_pipeline(
                device,
                "present pipeline",
                &pipeline_layout,
                &vertex,
                &fragment,
                &geometry,
                format,
            );
            Self {
                pipeline,
                texture_layout,
                geometry,
            }
        });

        match error {
            Some(err) => Err(CompileError::Device(err.to_string())),
            None => Ok(program),
        }
    }
}

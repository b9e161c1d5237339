use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};

use crate::batch::{PrimitiveKind, Vertex};
use crate::imageop::{FilterKind, FilterUniforms};

/// Identifies one render pipeline. The filter only matters for image quads.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub(super) struct PipelineKey {
    kind: PrimitiveKind,
    filter: FilterKind,
}

impl PipelineKey {
    pub fn new(kind: PrimitiveKind, filter: FilterKind) -> Self {
        let filter = if kind == PrimitiveKind::ImageQuads {
            filter
        } else {
            FilterKind::None
        };
        Self { kind, filter }
    }

    fn fragment_entry(self) -> &'static str {
        match (self.kind, self.filter) {
            (PrimitiveKind::Lines | PrimitiveKind::Triangles, _) => "fs_solid",
            (PrimitiveKind::MaskQuads, _) => "fs_mask",
            (PrimitiveKind::GlyphQuads, _) => "fs_glyph",
            (PrimitiveKind::AaParallelograms, _) => "fs_aa",
            (PrimitiveKind::ImageQuads, FilterKind::None) => "fs_image_plain",
            (PrimitiveKind::ImageQuads, FilterKind::Convolve) => "fs_image_convolve",
            (PrimitiveKind::ImageQuads, FilterKind::Rescale) => "fs_image_rescale",
            (PrimitiveKind::ImageQuads, FilterKind::Lookup) => "fs_image_lookup",
        }
    }
}

pub(super) fn premul_alpha_blend() -> wgpu::BlendState {
    wgpu::BlendState {
        color: wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
            operation: wgpu::BlendOperation::Add,
        },
        alpha: wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
            operation: wgpu::BlendOperation::Add,
        },
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub(super) struct ViewportUniform {
    pub viewport: [f32; 2],
    pub _pad: [f32; 2], // 16-byte alignment
}

/// Shader module, the shared bind group layout, and one pipeline per key,
/// built on first use.
///
/// Bindings: 0 viewport, 1 filter uniforms (dynamic offset), 2 mask atlas,
/// 3 image or glyph source.
pub(super) struct PipelineCache {
    format: wgpu::TextureFormat,
    shader: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    layout: wgpu::PipelineLayout,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
}

impl PipelineCache {
    pub fn new(device: &wgpu::Device, format: wgpu::TextureFormat) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("tessel shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/tessel.wgsl").into()),
        });

        let texture_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("tessel bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<ViewportUniform>() as u64,
                        ),
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: wgpu::BufferSize::new(FilterUniforms::SIZE),
                    },
                    count: None,
                },
                texture_entry(2),
                texture_entry(3),
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("tessel pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        Self {
            format,
            shader,
            bind_group_layout,
            layout,
            pipelines: HashMap::new(),
        }
    }

    pub fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.bind_group_layout
    }

    /// Builds the pipeline for `key` if it does not exist yet.
    pub fn prepare(&mut self, device: &wgpu::Device, key: PipelineKey) {
        if self.pipelines.contains_key(&key) {
            return;
        }
        log::debug!("building pipeline {:?}/{:?}", key.kind, key.filter);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("tessel pipeline"),
            layout: Some(&self.layout),
            vertex: wgpu::VertexState {
                module: &self.shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[Vertex::layout()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &self.shader,
                entry_point: Some(key.fragment_entry()),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: self.format,
                    blend: Some(premul_alpha_blend()),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: key.kind.topology(),
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });
        self.pipelines.insert(key, pipeline);
    }

    pub fn get(&self, key: PipelineKey) -> Option<&wgpu::RenderPipeline> {
        self.pipelines.get(&key)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_only_distinguishes_image_pipelines() {
        assert_eq!(
            PipelineKey::new(PrimitiveKind::MaskQuads, FilterKind::Lookup),
            PipelineKey::new(PrimitiveKind::MaskQuads, FilterKind::None)
        );
        assert_ne!(
            PipelineKey::new(PrimitiveKind::ImageQuads, FilterKind::Lookup),
            PipelineKey::new(PrimitiveKind::ImageQuads, FilterKind::None)
        );
    }

    #[test]
    fn every_key_has_an_entry_point_in_the_shader() {
        let src = include_str!("shaders/tessel.wgsl");
        let filters = [
            FilterKind::None,
            FilterKind::Convolve,
            FilterKind::Rescale,
            FilterKind::Lookup,
        ];
        for kind in PrimitiveKind::ALL {
            for filter in filters {
                let entry = PipelineKey::new(kind, filter).fragment_entry();
                assert!(src.contains(&format!("fn {entry}(")), "{entry} missing");
            }
        }
    }

    #[test]
    fn shader_uniform_block_matches_rust_layout() {
        let src = include_str!("shaders/tessel.wgsl");
        assert!(src.contains("kernel: array<vec4<f32>, 25>"));
        assert!(src.contains("table: array<vec4<f32>, 256>"));
        assert_eq!(FilterUniforms::SIZE, 16 * (4 + 25 + 256));
    }
}

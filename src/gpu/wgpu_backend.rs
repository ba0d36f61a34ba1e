//! wgpu implementation of [`GpuBackend`]
//!
//! wgpu does not expose memory heaps, so the two tiers differ in how they are
//! written rather than where they live: host-visible arenas are written with
//! `Queue::write_buffer`, device-local arenas only ever receive explicit staging
//! copies. Out-of-memory is detected through an error scope around creation.

use super::backend::*;
use super::buffer_layouts::{bindings, calculations::align_buffer_size, layouts, Vertex};
use super::recorder::{ComputeRecorder, DrawRecorder};
use super::shader::{ShaderBlob, ShaderCode};
use crate::config::DrawMode;
use crate::constants::buffer_layouts::DIRECT_PUSH_CONSTANTS_SIZE;
use crate::constants::memory::COPY_ALIGNMENT;
use crate::error::{gpu_operation_error, pipeline_creation_error, EngineResult, ErrorContext};
use std::borrow::Cow;
use std::ops::Range;
use std::sync::Arc;

pub struct WgpuRenderState {
    pub pipeline: wgpu::RenderPipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

pub struct WgpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
}

pub struct WgpuComputeState {
    pub pipeline: wgpu::ComputePipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    limits: BackendLimits,
}

impl WgpuBackend {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        let device_limits = device.limits();
        let features = device.features();
        let limits = BackendLimits {
            max_buffer_size: device_limits.max_buffer_size,
            max_storage_binding_size: device_limits.max_storage_buffer_binding_size as u64,
            max_push_constant_size: device_limits.max_push_constant_size,
            supports_indirect_count: features.contains(wgpu::Features::MULTI_DRAW_INDIRECT_COUNT),
            max_texture_array_layers: device_limits.max_texture_array_layers,
        };
        log::info!(
            "[WgpuBackend::new] max buffer {} bytes, push constants {} bytes, indirect count {}",
            limits.max_buffer_size,
            limits.max_push_constant_size,
            limits.supports_indirect_count
        );
        Self {
            device,
            queue,
            limits,
        }
    }

    /// Features the renderer uses when the adapter offers them
    pub fn wanted_features() -> wgpu::Features {
        wgpu::Features::PUSH_CONSTANTS
            | wgpu::Features::MULTI_DRAW_INDIRECT
            | wgpu::Features::MULTI_DRAW_INDIRECT_COUNT
            | wgpu::Features::INDIRECT_FIRST_INSTANCE
    }

    /// Request a device with the wanted features the adapter supports
    pub async fn request_device(adapter: &wgpu::Adapter) -> EngineResult<Self> {
        let features = adapter.features() & Self::wanted_features();
        let limits = adapter.limits();
        if features.contains(wgpu::Features::PUSH_CONSTANTS)
            && limits.max_push_constant_size < DIRECT_PUSH_CONSTANTS_SIZE
        {
            log::warn!(
                "[WgpuBackend::request_device] Push constant limit {} is below {} bytes; direct pipelines will fail",
                limits.max_push_constant_size,
                DIRECT_PUSH_CONSTANTS_SIZE
            );
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Strata Device"),
                    required_features: features,
                    required_limits: limits,
                },
                None,
            )
            .await
            .gpu_context("request_device")?;

        Ok(Self::new(Arc::new(device), Arc::new(queue)))
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    fn shader_module(&self, blob: &ShaderBlob) -> EngineResult<wgpu::ShaderModule> {
        let source = match &blob.code {
            ShaderCode::Wgsl(source) => wgpu::ShaderSource::Wgsl(Cow::Borrowed(source.as_str())),
            ShaderCode::SpirV(bytes) => wgpu::util::make_spirv(bytes),
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(blob.name.as_str()),
                source,
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(pipeline_creation_error(&blob.name, error));
        }
        Ok(module)
    }
}

impl GpuBackend for WgpuBackend {
    type Buffer = wgpu::Buffer;
    type Texture = WgpuTexture;
    type Fence = wgpu::SubmissionIndex;
    type RenderState = WgpuRenderState;
    type ComputeState = WgpuComputeState;
    type Bindings = wgpu::BindGroup;

    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn limits(&self) -> BackendLimits {
        self.limits
    }

    fn create_buffer(&self, request: &BufferRequest<'_>) -> Result<wgpu::Buffer, AllocationFailure> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(request.label),
            size: align_buffer_size(request.size, COPY_ALIGNMENT),
            usage: request.role.usages(),
            mapped_at_creation: false,
        });

        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());

        if out_of_memory.is_some() {
            buffer.destroy();
            return Err(AllocationFailure::OutOfMemory);
        }
        if let Some(error) = validation {
            buffer.destroy();
            return Err(AllocationFailure::Rejected(error.to_string()));
        }

        log::debug!(
            "[WgpuBackend::create_buffer] '{}' {} bytes ({})",
            request.label,
            request.size,
            request.tier
        );
        Ok(buffer)
    }

    fn write_buffer(&self, buffer: &wgpu::Buffer, offset: u64, data: &[u8]) {
        self.queue.write_buffer(buffer, offset, data);
    }

    fn create_staging_buffer(&self, label: &str, data: &[u8]) -> Result<wgpu::Buffer, AllocationFailure> {
        let size = align_buffer_size((data.len() as u64).max(COPY_ALIGNMENT), COPY_ALIGNMENT);

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: BufferRole::Staging.usages(),
            mapped_at_creation: true,
        });
        if pollster::block_on(self.device.pop_error_scope()).is_some() {
            staging.destroy();
            return Err(AllocationFailure::OutOfMemory);
        }

        {
            let mut view = staging.slice(..).get_mapped_range_mut();
            view[..data.len()].copy_from_slice(data);
        }
        staging.unmap();
        Ok(staging)
    }

    fn submit_copy(
        &self,
        src: &wgpu::Buffer,
        dst: &wgpu::Buffer,
        dst_offset: u64,
        size: u64,
    ) -> wgpu::SubmissionIndex {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Staging Copy Encoder"),
            });
        encoder.copy_buffer_to_buffer(src, 0, dst, dst_offset, size);
        self.queue.submit(std::iter::once(encoder.finish()))
    }

    fn wait(&self, fence: &wgpu::SubmissionIndex) {
        self.device
            .poll(wgpu::Maintain::WaitForSubmissionIndex(fence.clone()));
    }

    fn wait_idle(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }

    fn destroy_buffer(&self, buffer: &wgpu::Buffer) {
        buffer.destroy();
    }

    fn read_u32(&self, buffer: &wgpu::Buffer, offset: u64) -> EngineResult<u32> {
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: 4,
            usage: BufferRole::Readback.usages(),
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(buffer, offset, &readback, 0, 4);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = readback.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).ok();
        });
        self.device.poll(wgpu::Maintain::Wait);

        pollster::block_on(receiver)
            .gpu_context("read_u32")?
            .gpu_context("read_u32")?;

        let value = {
            let data = slice.get_mapped_range();
            bytemuck::pod_read_unaligned::<u32>(&data[..4])
        };
        readback.unmap();
        readback.destroy();
        Ok(value)
    }

    fn create_texture_array(&self, request: &TextureArrayRequest<'_>) -> EngineResult<WgpuTexture> {
        let layers = request.layers.len() as u32;
        if layers == 0 || layers > self.limits.max_texture_array_layers {
            return Err(gpu_operation_error(
                "create_texture_array",
                format!(
                    "'{}' has {} layers, device allows 1..={}",
                    request.label, layers, self.limits.max_texture_array_layers
                ),
            ));
        }

        let extent = wgpu::Extent3d {
            width: request.size,
            height: request.size,
            depth_or_array_layers: layers,
        };
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(request.label),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            texture.destroy();
            return Err(gpu_operation_error("create_texture_array", error));
        }

        for (layer, data) in request.layers.iter().enumerate() {
            if data.len() != request.layer_bytes() {
                texture.destroy();
                return Err(gpu_operation_error(
                    "create_texture_array",
                    format!("layer {} of '{}' is not {} bytes", layer, request.label, request.layer_bytes()),
                ));
            }
            self.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: 0,
                        y: 0,
                        z: layer as u32,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * request.size),
                    rows_per_image: Some(request.size),
                },
                wgpu::Extent3d {
                    depth_or_array_layers: 1,
                    ..extent
                },
            );
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(request.label),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            ..Default::default()
        });
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Mesh Texture Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        log::debug!(
            "[WgpuBackend::create_texture_array] '{}' {}x{} with {} layers",
            request.label,
            request.size,
            request.size,
            layers
        );
        Ok(WgpuTexture { texture, view, sampler })
    }

    fn create_render_state(&self, desc: &RenderStateDescriptor<'_>) -> EngineResult<WgpuRenderState> {
        let module = self.shader_module(desc.shader)?;

        let mut entries = match desc.mode {
            DrawMode::Direct => vec![layouts::uniform_buffer_entry(
                bindings::render::CAMERA_UNIFORM,
                wgpu::ShaderStages::VERTEX_FRAGMENT,
            )],
            DrawMode::GpuIndirect => vec![
                layouts::uniform_buffer_entry(
                    bindings::render::CAMERA_UNIFORM,
                    wgpu::ShaderStages::VERTEX_FRAGMENT,
                ),
                layouts::storage_buffer_entry(
                    bindings::render::INSTANCES,
                    true,
                    wgpu::ShaderStages::VERTEX,
                ),
                layouts::storage_buffer_entry(
                    bindings::render::MESH_METADATA,
                    true,
                    wgpu::ShaderStages::VERTEX_FRAGMENT,
                ),
            ],
        };
        if desc.textured {
            entries.push(layouts::texture_array_entry(
                bindings::render::TEXTURES,
                wgpu::ShaderStages::FRAGMENT,
            ));
            entries.push(layouts::sampler_entry(
                bindings::render::TEXTURE_SAMPLER,
                wgpu::ShaderStages::FRAGMENT,
            ));
        }

        let bind_group_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(desc.label),
                entries: &entries,
            });

        let push_constant_ranges: &[wgpu::PushConstantRange] = match desc.mode {
            DrawMode::Direct => &[wgpu::PushConstantRange {
                stages: wgpu::ShaderStages::VERTEX_FRAGMENT,
                range: 0..DIRECT_PUSH_CONSTANTS_SIZE,
            }],
            DrawMode::GpuIndirect => &[],
        };

        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(desc.label),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges,
            });

        let blend = if desc.blend {
            wgpu::BlendState::ALPHA_BLENDING
        } else {
            wgpu::BlendState::REPLACE
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(desc.label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: desc.vertex_entry,
                    buffers: &[Vertex::layout()],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: desc.fragment_entry,
                    targets: &[Some(wgpu::ColorTargetState {
                        format: desc.color_format,
                        blend: Some(blend),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: desc.topology,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: desc.cull_back_faces.then_some(wgpu::Face::Back),
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: desc.depth_format.map(|format| wgpu::DepthStencilState {
                    format,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(pipeline_creation_error(desc.label, error));
        }

        Ok(WgpuRenderState {
            pipeline,
            bind_group_layout,
        })
    }

    fn create_compute_state(&self, desc: &ComputeStateDescriptor<'_>) -> EngineResult<WgpuComputeState> {
        let module = self.shader_module(desc.shader)?;
        let stage = wgpu::ShaderStages::COMPUTE;

        let bind_group_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(desc.label),
                entries: &[
                    layouts::uniform_buffer_entry(bindings::culling::UNIFORMS, stage),
                    layouts::storage_buffer_entry(bindings::culling::CANDIDATES, true, stage),
                    layouts::storage_buffer_entry(bindings::culling::INSTANCES, true, stage),
                    layouts::storage_buffer_entry(bindings::culling::COMMANDS, false, stage),
                    layouts::storage_buffer_entry(bindings::culling::DRAW_COUNT, false, stage),
                ],
            });

        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(desc.label),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(desc.label),
                layout: Some(&layout),
                module: &module,
                entry_point: desc.entry_point,
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(pipeline_creation_error(desc.label, error));
        }

        Ok(WgpuComputeState {
            pipeline,
            bind_group_layout,
        })
    }

    fn create_mesh_bindings(
        &self,
        state: &WgpuRenderState,
        resources: &MeshBindingResources<'_, Self>,
    ) -> EngineResult<wgpu::BindGroup> {
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: bindings::render::CAMERA_UNIFORM,
            resource: resources.camera.as_entire_binding(),
        }];
        if let (Some(instances), Some(meshes)) = (resources.instances, resources.mesh_metadata) {
            entries.push(wgpu::BindGroupEntry {
                binding: bindings::render::INSTANCES,
                resource: instances.as_entire_binding(),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: bindings::render::MESH_METADATA,
                resource: meshes.as_entire_binding(),
            });
        }
        if let Some(textures) = resources.textures {
            entries.push(wgpu::BindGroupEntry {
                binding: bindings::render::TEXTURES,
                resource: wgpu::BindingResource::TextureView(&textures.view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: bindings::render::TEXTURE_SAMPLER,
                resource: wgpu::BindingResource::Sampler(&textures.sampler),
            });
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Mesh Bind Group"),
            layout: &state.bind_group_layout,
            entries: &entries,
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(gpu_operation_error("create_mesh_bindings", error));
        }
        Ok(group)
    }

    fn create_cull_bindings(
        &self,
        state: &WgpuComputeState,
        resources: &CullBindingResources<'_, Self>,
    ) -> EngineResult<wgpu::BindGroup> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Cull Bind Group"),
            layout: &state.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: bindings::culling::UNIFORMS,
                    resource: resources.uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: bindings::culling::CANDIDATES,
                    resource: resources.candidates.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: bindings::culling::INSTANCES,
                    resource: resources.instances.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: bindings::culling::COMMANDS,
                    resource: resources.commands.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: bindings::culling::DRAW_COUNT,
                    resource: resources.draw_count.as_entire_binding(),
                },
            ],
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(gpu_operation_error("create_cull_bindings", error));
        }
        Ok(group)
    }
}

impl<'a> DrawRecorder<'a, WgpuBackend> for wgpu::RenderPass<'a> {
    fn bind_pipeline(&mut self, state: &'a WgpuRenderState, bindings: &'a wgpu::BindGroup) {
        wgpu::RenderPass::set_pipeline(self, &state.pipeline);
        wgpu::RenderPass::set_bind_group(self, 0, bindings, &[]);
    }

    fn set_vertex_buffer(&mut self, buffer: &'a wgpu::Buffer, size: u64) {
        wgpu::RenderPass::set_vertex_buffer(self, 0, buffer.slice(..size));
    }

    fn set_index_buffer(&mut self, buffer: &'a wgpu::Buffer, size: u64) {
        wgpu::RenderPass::set_index_buffer(self, buffer.slice(..size), wgpu::IndexFormat::Uint32);
    }

    fn set_push_constants(&mut self, data: &[u8]) {
        wgpu::RenderPass::set_push_constants(self, wgpu::ShaderStages::VERTEX_FRAGMENT, 0, data);
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        wgpu::RenderPass::draw(self, vertices, instances);
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        wgpu::RenderPass::draw_indexed(self, indices, base_vertex, instances);
    }

    fn draw_indirect_count(
        &mut self,
        commands: &'a wgpu::Buffer,
        count: &'a wgpu::Buffer,
        max_count: u32,
        indexed: bool,
    ) {
        if indexed {
            self.multi_draw_indexed_indirect_count(commands, 0, count, 0, max_count);
        } else {
            self.multi_draw_indirect_count(commands, 0, count, 0, max_count);
        }
    }
}

impl ComputeRecorder<WgpuBackend> for wgpu::CommandEncoder {
    fn clear_buffer(&mut self, buffer: &wgpu::Buffer) {
        wgpu::CommandEncoder::clear_buffer(self, buffer, 0, None);
    }

    fn dispatch(&mut self, state: &WgpuComputeState, bindings: &wgpu::BindGroup, workgroups: u32) {
        let mut pass = self.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Cull Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&state.pipeline);
        pass.set_bind_group(0, bindings, &[]);
        pass.dispatch_workgroups(workgroups, 1, 1);
    }
}

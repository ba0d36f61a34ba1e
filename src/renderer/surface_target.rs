//! wgpu surface target with a matching depth buffer

use super::target::{FrameError, FrameTarget, FrameWork};
use crate::error::{EngineError, EngineResult, ErrorContext};
use crate::gpu::WgpuBackend;
use std::sync::Arc;

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

pub struct SurfaceTarget {
    surface: wgpu::Surface<'static>,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    config: wgpu::SurfaceConfiguration,
    depth_view: wgpu::TextureView,
    pending_size: Option<(u32, u32)>,
}

impl SurfaceTarget {
    pub fn new(
        surface: wgpu::Surface<'static>,
        adapter: &wgpu::Adapter,
        backend: &WgpuBackend,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> EngineResult<Self> {
        let capabilities = surface.get_capabilities(adapter);
        let format = capabilities
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| capabilities.formats.first().copied())
            .ok_or_else(|| EngineError::Surface("adapter cannot present to this surface".into()))?;

        let present_mode = if vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };

        let device = backend.device().clone();
        let (width, height) = clamp_size(&device, width, height);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode,
            alpha_mode: capabilities
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        let depth_view = create_depth_view(&device, &config);

        log::info!(
            "[SurfaceTarget::new] {}x{} {:?}, {:?}",
            width,
            height,
            format,
            present_mode
        );
        Ok(Self {
            surface,
            device,
            queue: backend.queue().clone(),
            config,
            depth_view,
            pending_size: None,
        })
    }
}

impl FrameTarget<WgpuBackend> for SurfaceTarget {
    fn color_format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    fn depth_format(&self) -> Option<wgpu::TextureFormat> {
        Some(DEPTH_FORMAT)
    }

    fn size(&self) -> (u32, u32) {
        self.pending_size.unwrap_or((self.config.width, self.config.height))
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.pending_size = Some((width, height));
        }
    }

    fn rebuild(&mut self) -> Result<(), EngineError> {
        if let Some((width, height)) = self.pending_size.take() {
            let (width, height) = clamp_size(&self.device, width, height);
            self.config.width = width;
            self.config.height = height;
        }
        self.surface.configure(&self.device, &self.config);
        self.depth_view = create_depth_view(&self.device, &self.config);
        log::info!(
            "[SurfaceTarget::rebuild] Surface reconfigured at {}x{}",
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn render_frame(
        &mut self,
        clear_color: [f64; 4],
        work: &mut dyn FrameWork<WgpuBackend>,
    ) -> Result<wgpu::SubmissionIndex, FrameError> {
        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        work.record_compute(&mut encoder);

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Mesh Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: clear_color[0],
                            g: clear_color[1],
                            b: clear_color[2],
                            a: clear_color[3],
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            work.record_draws(&mut pass);
        }

        let index = self.queue.submit(std::iter::once(encoder.finish()));
        let suboptimal = output.suboptimal;
        output.present();

        if suboptimal {
            log::debug!("[SurfaceTarget::render_frame] Presented to a suboptimal surface");
        }
        Ok(index)
    }
}

fn clamp_size(device: &wgpu::Device, width: u32, height: u32) -> (u32, u32) {
    let max = device.limits().max_texture_dimension_2d;
    let clamped = (width.clamp(1, max), height.clamp(1, max));
    if clamped != (width, height) {
        log::warn!(
            "[SurfaceTarget] Size {}x{} clamped to {}x{} (device limit {})",
            width,
            height,
            clamped.0,
            clamped.1,
            max
        );
    }
    clamped
}

fn create_depth_view(device: &wgpu::Device, config: &wgpu::SurfaceConfiguration) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Depth Texture"),
        size: wgpu::Extent3d {
            width: config.width,
            height: config.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

/// Surface that keeps `window` alive for as long as it exists
pub fn surface_for_window(
    instance: &wgpu::Instance,
    window: Arc<winit::window::Window>,
) -> EngineResult<wgpu::Surface<'static>> {
    instance
        .create_surface(window)
        .gpu_context("create_surface")
}

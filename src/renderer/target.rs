//! Presentation targets
//!
//! A [`FrameTarget`] acquires an image, lets the renderer record compute and
//! draw work against it, submits and presents. [`super::SurfaceTarget`] wraps
//! a wgpu surface; [`HeadlessTarget`] records into memory for tests.

use crate::error::EngineError;
use crate::gpu::{
    ComputeRecorder, DrawRecorder, GpuBackend, HeadlessBackend, HeadlessEncoder, RecordedCommand,
    RecordingPass,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    /// Surface no longer matches the window; rebuild and retry
    #[error("surface is outdated")]
    Outdated,
    #[error("surface was lost")]
    Lost,
    /// Acquire timed out; skip this frame
    #[error("timed out acquiring the next image")]
    Timeout,
    #[error("out of memory while presenting")]
    OutOfMemory,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl FrameError {
    pub fn requires_rebuild(&self) -> bool {
        matches!(self, FrameError::Outdated | FrameError::Lost)
    }
}

impl From<wgpu::SurfaceError> for FrameError {
    fn from(error: wgpu::SurfaceError) -> Self {
        match error {
            wgpu::SurfaceError::Outdated => FrameError::Outdated,
            wgpu::SurfaceError::Lost => FrameError::Lost,
            wgpu::SurfaceError::Timeout => FrameError::Timeout,
            wgpu::SurfaceError::OutOfMemory => FrameError::OutOfMemory,
        }
    }
}

/// Work recorded into one frame
pub trait FrameWork<B: GpuBackend> {
    /// Runs before the render pass opens
    fn record_compute(&mut self, recorder: &mut dyn ComputeRecorder<B>);

    fn record_draws<'a>(&'a self, pass: &mut dyn DrawRecorder<'a, B>);
}

/// Attachment formats pipelines are built against
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TargetFormats {
    pub color: wgpu::TextureFormat,
    pub depth: Option<wgpu::TextureFormat>,
}

pub trait FrameTarget<B: GpuBackend> {
    fn color_format(&self) -> wgpu::TextureFormat;

    fn depth_format(&self) -> Option<wgpu::TextureFormat>;

    fn formats(&self) -> TargetFormats {
        TargetFormats {
            color: self.color_format(),
            depth: self.depth_format(),
        }
    }

    fn size(&self) -> (u32, u32);

    /// Record the new size; takes effect on the next `rebuild`
    fn resize(&mut self, width: u32, height: u32);

    /// Recreate size-dependent resources
    fn rebuild(&mut self) -> Result<(), EngineError>;

    /// Acquire, record, submit and present one frame
    fn render_frame(
        &mut self,
        clear_color: [f64; 4],
        work: &mut dyn FrameWork<B>,
    ) -> Result<B::Fence, FrameError>;
}

/// In-memory target; keeps the command stream of the last frame
pub struct HeadlessTarget {
    backend: Arc<HeadlessBackend>,
    width: u32,
    height: u32,
    last_frame: Vec<RecordedCommand>,
    pending_failures: Vec<FrameError>,
    rebuilds: u32,
    frames: u64,
}

impl HeadlessTarget {
    pub fn new(backend: Arc<HeadlessBackend>, width: u32, height: u32) -> Self {
        Self {
            backend,
            width,
            height,
            last_frame: Vec::new(),
            pending_failures: Vec::new(),
            rebuilds: 0,
            frames: 0,
        }
    }

    /// Make the next `render_frame` call fail with `error`
    pub fn fail_next_frame(&mut self, error: FrameError) {
        self.pending_failures.push(error);
    }

    pub fn last_frame(&self) -> &[RecordedCommand] {
        &self.last_frame
    }

    pub fn draw_calls(&self) -> Vec<&RecordedCommand> {
        self.last_frame.iter().filter(|c| c.is_draw()).collect()
    }

    pub fn rebuilds(&self) -> u32 {
        self.rebuilds
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }
}

impl FrameTarget<HeadlessBackend> for HeadlessTarget {
    fn color_format(&self) -> wgpu::TextureFormat {
        wgpu::TextureFormat::Bgra8UnormSrgb
    }

    fn depth_format(&self) -> Option<wgpu::TextureFormat> {
        Some(wgpu::TextureFormat::Depth32Float)
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    fn rebuild(&mut self) -> Result<(), EngineError> {
        self.rebuilds += 1;
        Ok(())
    }

    fn render_frame(
        &mut self,
        _clear_color: [f64; 4],
        work: &mut dyn FrameWork<HeadlessBackend>,
    ) -> Result<u64, FrameError> {
        if !self.pending_failures.is_empty() {
            return Err(self.pending_failures.remove(0));
        }

        let mut encoder = HeadlessEncoder::new(&self.backend);
        work.record_compute(&mut encoder);

        let mut pass = RecordingPass::new();
        work.record_draws(&mut pass);

        self.last_frame = pass.commands;
        self.frames += 1;
        Ok(self.backend.signal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_errors_map_to_rebuilds() {
        assert!(FrameError::from(wgpu::SurfaceError::Outdated).requires_rebuild());
        assert!(FrameError::from(wgpu::SurfaceError::Lost).requires_rebuild());
        assert!(!FrameError::from(wgpu::SurfaceError::Timeout).requires_rebuild());
        assert!(matches!(
            FrameError::from(wgpu::SurfaceError::OutOfMemory),
            FrameError::OutOfMemory
        ));
    }
}

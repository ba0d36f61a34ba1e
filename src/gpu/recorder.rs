//! Command recording seams
//!
//! The draw dispatcher and culling stage record into these traits instead of a
//! concrete `wgpu::RenderPass` / `wgpu::CommandEncoder`, which lets the headless
//! backend capture the exact command stream.

use super::GpuBackend;
use std::ops::Range;

pub trait DrawRecorder<'a, B: GpuBackend> {
    fn bind_pipeline(&mut self, state: &'a B::RenderState, bindings: &'a B::Bindings);

    /// Bind the first `size` bytes of `buffer` as vertex buffer 0
    fn set_vertex_buffer(&mut self, buffer: &'a B::Buffer, size: u64);

    /// Bind the first `size` bytes of `buffer` as a u32 index buffer
    fn set_index_buffer(&mut self, buffer: &'a B::Buffer, size: u64);

    fn set_push_constants(&mut self, data: &[u8]);

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>);

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>);

    /// One indirect draw whose count is read from `count` on the GPU
    fn draw_indirect_count(
        &mut self,
        commands: &'a B::Buffer,
        count: &'a B::Buffer,
        max_count: u32,
        indexed: bool,
    );
}

pub trait ComputeRecorder<B: GpuBackend> {
    /// Zero the whole buffer
    fn clear_buffer(&mut self, buffer: &B::Buffer);

    fn dispatch(&mut self, state: &B::ComputeState, bindings: &B::Bindings, workgroups: u32);
}

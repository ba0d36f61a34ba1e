//! Synchronous staging uploads into device-local arenas
//!
//! Each upload allocates a transient host-visible buffer sized to the batch,
//! submits one copy and blocks until the GPU has executed it. Registration
//! comes in bursts, so the stall is paid per batch rather than per frame.

use crate::error::{EngineError, EngineResult};
use crate::gpu::GpuBackend;

pub struct StagingUploader<'b, B: GpuBackend> {
    backend: &'b B,
}

impl<'b, B: GpuBackend> StagingUploader<'b, B> {
    pub fn new(backend: &'b B) -> Self {
        Self { backend }
    }

    /// Copy `data` into `dst` at `dst_offset` and wait for completion.
    ///
    /// `dst` is untouched if the staging buffer cannot be allocated.
    pub fn upload(&self, label: &str, dst: &B::Buffer, dst_offset: u64, data: &[u8]) -> EngineResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let staging = self
            .backend
            .create_staging_buffer(label, data)
            .map_err(|failure| EngineError::HostAllocationFailed {
                arena: format!("{} (staging)", label),
                size: data.len() as u64,
                reason: failure.to_string(),
            })?;

        let fence = self
            .backend
            .submit_copy(&staging, dst, dst_offset, data.len() as u64);
        self.backend.wait(&fence);
        self.backend.destroy_buffer(&staging);

        log::debug!(
            "[StagingUploader::upload] {} bytes into '{}' at offset {}",
            data.len(),
            label,
            dst_offset
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{BufferRequest, BufferRole, HeadlessBackend, MemoryTier};

    fn device_local(backend: &HeadlessBackend, size: u64) -> crate::gpu::HeadlessBuffer {
        backend
            .create_buffer(&BufferRequest {
                label: "dst",
                size,
                role: BufferRole::Vertex,
                tier: MemoryTier::DeviceLocal,
            })
            .expect("allocation")
    }

    #[test]
    fn test_upload_copies_and_waits() {
        let backend = HeadlessBackend::new();
        let dst = device_local(&backend, 16);

        StagingUploader::new(&backend)
            .upload("vertices", &dst, 4, &[9, 8, 7, 6])
            .expect("upload");

        assert_eq!(&dst.contents()[4..8], &[9, 8, 7, 6]);
        let stats = backend.stats();
        assert_eq!(stats.staging_copies, 1);
        assert_eq!(stats.fence_waits, 1);
        assert_eq!(stats.buffers_destroyed, 1);
    }

    #[test]
    fn test_empty_upload_is_a_no_op() {
        let backend = HeadlessBackend::new();
        let dst = device_local(&backend, 16);
        StagingUploader::new(&backend)
            .upload("vertices", &dst, 0, &[])
            .expect("upload");
        assert_eq!(backend.stats().staging_copies, 0);
    }

    #[test]
    fn test_staging_failure_leaves_destination_untouched() {
        let backend = HeadlessBackend::new().with_host_capacity(2);
        let dst = device_local(&backend, 16);
        let result = StagingUploader::new(&backend).upload("vertices", &dst, 0, &[1, 2, 3, 4]);
        assert!(matches!(result, Err(EngineError::HostAllocationFailed { .. })));
        assert!(dst.contents().iter().all(|&b| b == 0));
    }
}

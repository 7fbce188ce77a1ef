//! Coalesces CPU→GPU transfers into one command buffer per flush (spec §4.8).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use parking_lot::Mutex;

use super::staging_pool::{StagingHandle, StagingPool};
use crate::config::CacheSystemConfig;
use crate::error::AllocError;

/// Opaque handle returned by `upload`/`copy_buffer`. `INVALID` is returned
/// when the staging pool has no room and the caller should retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UploadHandle(u64);

impl UploadHandle {
    pub const INVALID: UploadHandle = UploadHandle(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// `Pending → Submitted → {Completed | Failed}`. Terminal states are
/// absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Pending,
    Submitted,
    Completed,
    Failed,
}

enum Source {
    Staged {
        handle: StagingHandle,
        staging_buffer: vk::Buffer,
        staging_offset: u64,
    },
    Direct {
        src_buffer: vk::Buffer,
        src_offset: u64,
    },
}

struct PendingUpload {
    handle: UploadHandle,
    source: Source,
    dst_buffer: vk::Buffer,
    dst_offset: u64,
    size: u64,
}

struct SubmittedUpload {
    handle: UploadHandle,
    staging: Option<StagingHandle>,
    size: u64,
}

struct SubmittedBatch {
    signal_value: u64,
    cmd_buffer: vk::CommandBuffer,
    uploads: Vec<SubmittedUpload>,
    #[allow(dead_code)]
    submit_time: Instant,
}

/// Coalesces transfers into one command buffer per `flush`, tracked through
/// a timeline semaphore and released back to the `StagingPool` as each batch
/// completes.
pub struct BatchedUploader {
    device: ash::Device,
    queue: vk::Queue,
    command_pool: vk::CommandPool,
    free_command_buffers: Mutex<VecDeque<vk::CommandBuffer>>,
    timeline_semaphore: vk::Semaphore,
    next_timeline_value: AtomicU64,
    last_known_completed: AtomicU64,

    staging_pool: Arc<StagingPool>,

    pending: Mutex<Vec<PendingUpload>>,
    pending_bytes: AtomicU64,
    oldest_pending_time: Mutex<Option<Instant>>,

    submitted: Mutex<VecDeque<SubmittedBatch>>,
    status: Mutex<HashMap<UploadHandle, UploadStatus>>,

    next_handle: AtomicU64,
    max_pending_uploads: usize,
    max_pending_bytes: u64,
    flush_deadline: std::time::Duration,
}

impl BatchedUploader {
    pub fn new(
        device: ash::Device,
        queue: vk::Queue,
        queue_family_index: u32,
        staging_pool: Arc<StagingPool>,
        config: &CacheSystemConfig,
    ) -> Result<Self, AllocError> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .map_err(|e| AllocError::Unknown(e.to_string()))?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(config.max_batch_command_buffers as u32);
        let command_buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| AllocError::Unknown(e.to_string()))?;

        let mut timeline_type_info =
            vk::SemaphoreTypeCreateInfo::default().semaphore_type(vk::SemaphoreType::TIMELINE);
        let semaphore_info = vk::SemaphoreCreateInfo::default().push_next(&mut timeline_type_info);
        let timeline_semaphore = unsafe { device.create_semaphore(&semaphore_info, None) }
            .map_err(|e| AllocError::Unknown(e.to_string()))?;

        Ok(Self {
            device,
            queue,
            command_pool,
            free_command_buffers: Mutex::new(command_buffers.into_iter().collect()),
            timeline_semaphore,
            next_timeline_value: AtomicU64::new(1),
            last_known_completed: AtomicU64::new(0),
            staging_pool,
            pending: Mutex::new(Vec::new()),
            pending_bytes: AtomicU64::new(0),
            oldest_pending_time: Mutex::new(None),
            submitted: Mutex::new(VecDeque::new()),
            status: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            max_pending_uploads: config.max_pending_uploads,
            max_pending_bytes: config.max_pending_bytes,
            flush_deadline: std::time::Duration::from_millis(config.flush_deadline_ms),
        })
    }

    fn new_handle(&self) -> UploadHandle {
        UploadHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    fn push_pending(&self, upload: PendingUpload) {
        self.status.lock().insert(upload.handle, UploadStatus::Pending);
        self.pending_bytes.fetch_add(upload.size, Ordering::Relaxed);
        {
            let mut oldest = self.oldest_pending_time.lock();
            if oldest.is_none() {
                *oldest = Some(Instant::now());
            }
        }
        self.pending.lock().push(upload);

        if self.should_flush() {
            self.flush();
        }
    }

    fn should_flush(&self) -> bool {
        let len = self.pending.lock().len();
        if len >= self.max_pending_uploads {
            return true;
        }
        if self.pending_bytes.load(Ordering::Relaxed) >= self.max_pending_bytes {
            return true;
        }
        if let Some(oldest) = *self.oldest_pending_time.lock() {
            if oldest.elapsed() >= self.flush_deadline {
                return true;
            }
        }
        false
    }

    /// Stage `size` bytes from `src` and queue a copy into `dst_buffer` at
    /// `dst_offset`. Returns `UploadHandle::INVALID` if no staging buffer is
    /// currently available.
    ///
    /// # Safety
    /// `src` must point to at least `size` readable bytes for the duration
    /// of this call.
    pub unsafe fn upload(
        &self,
        src: *const u8,
        size: u64,
        dst_buffer: vk::Buffer,
        dst_offset: u64,
    ) -> UploadHandle {
        let Some(acquisition) = self.staging_pool.acquire(size) else {
            return UploadHandle::INVALID;
        };
        unsafe {
            std::ptr::copy_nonoverlapping(src, acquisition.mapped_ptr.as_ptr(), size as usize);
        }

        let handle = self.new_handle();
        self.push_pending(PendingUpload {
            handle,
            source: Source::Staged {
                handle: acquisition.handle,
                staging_buffer: acquisition.buffer,
                staging_offset: 0,
            },
            dst_buffer,
            dst_offset,
            size,
        });
        handle
    }

    /// Queue a direct buffer-to-buffer copy, bypassing the staging pool.
    pub fn copy_buffer(
        &self,
        src: vk::Buffer,
        src_offset: u64,
        dst: vk::Buffer,
        dst_offset: u64,
        size: u64,
    ) -> UploadHandle {
        let handle = self.new_handle();
        self.push_pending(PendingUpload {
            handle,
            source: Source::Direct {
                src_buffer: src,
                src_offset,
            },
            dst_buffer: dst,
            dst_offset,
            size,
        });
        handle
    }

    /// Record and submit every pending upload as one command buffer.
    /// Returns the timeline value that will be signalled once the batch
    /// completes, or `None` if there was nothing pending.
    pub fn flush(&self) -> Option<u64> {
        let batch: Vec<PendingUpload> = std::mem::take(&mut *self.pending.lock());
        *self.oldest_pending_time.lock() = None;
        if batch.is_empty() {
            return None;
        }

        let Some(cmd_buffer) = self.free_command_buffers.lock().pop_front() else {
            // No free command buffer: put the batch back and let the caller
            // retry after process_completions frees one up.
            self.pending.lock().extend(batch);
            return None;
        };

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let record_result = unsafe {
            self.device.begin_command_buffer(cmd_buffer, &begin_info).and_then(|_| {
                for upload in &batch {
                    let (src_buffer, src_offset) = match upload.source {
                        Source::Staged { staging_buffer, staging_offset, .. } => {
                            (staging_buffer, staging_offset)
                        }
                        Source::Direct { src_buffer, src_offset } => (src_buffer, src_offset),
                    };
                    let region = vk::BufferCopy::default()
                        .src_offset(src_offset)
                        .dst_offset(upload.dst_offset)
                        .size(upload.size);
                    self.device.cmd_copy_buffer(cmd_buffer, src_buffer, upload.dst_buffer, &[region]);
                }
                self.device.end_command_buffer(cmd_buffer)
            })
        };

        let mut status = self.status.lock();
        for upload in &batch {
            status.insert(upload.handle, UploadStatus::Submitted);
        }
        drop(status);

        if record_result.is_err() {
            self.fail_batch(&batch);
            self.free_command_buffers.lock().push_back(cmd_buffer);
            return None;
        }

        let signal_value = self.next_timeline_value.fetch_add(1, Ordering::AcqRel);
        let cmd_buffers = [cmd_buffer];
        let signal_semaphores = [self.timeline_semaphore];
        let signal_values = [signal_value];
        let mut timeline_submit =
            vk::TimelineSemaphoreSubmitInfo::default().signal_semaphore_values(&signal_values);
        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&cmd_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_submit);

        let submit_result =
            unsafe { self.device.queue_submit(self.queue, &[submit_info], vk::Fence::null()) };

        if submit_result.is_err() {
            self.fail_batch(&batch);
            self.free_command_buffers.lock().push_back(cmd_buffer);
            return None;
        }

        let uploads: Vec<SubmittedUpload> = batch
            .iter()
            .map(|u| SubmittedUpload {
                handle: u.handle,
                staging: match u.source {
                    Source::Staged { handle, .. } => Some(handle),
                    Source::Direct { .. } => None,
                },
                size: u.size,
            })
            .collect();
        self.submitted.lock().push_back(SubmittedBatch {
            signal_value,
            cmd_buffer,
            uploads,
            submit_time: Instant::now(),
        });

        // The staging-pool handle itself stays alive in its record table
        // until `process_completions` releases it after the GPU is done.
        Some(signal_value)
    }

    fn fail_batch(&self, batch: &[PendingUpload]) {
        let mut status = self.status.lock();
        for upload in batch {
            status.insert(upload.handle, UploadStatus::Failed);
            if let Source::Staged { handle, .. } = upload.source {
                self.staging_pool.release(handle);
            }
            self.pending_bytes.fetch_sub(upload.size, Ordering::Relaxed);
        }
    }

    /// Poll the timeline semaphore and release every batch that has
    /// completed, invoking nothing beyond status/staging bookkeeping. The
    /// caller is expected to check `status()` for completion.
    pub fn process_completions(&self) -> u32 {
        let completed = unsafe { self.device.get_semaphore_counter_value(self.timeline_semaphore) }
            .unwrap_or(0);
        self.last_known_completed.store(completed, Ordering::Release);

        let mut drained = 0;
        loop {
            let done = {
                let submitted = self.submitted.lock();
                submitted.front().map(|b| b.signal_value <= completed).unwrap_or(false)
            };
            if !done {
                break;
            }
            let Some(batch) = self.submitted.lock().pop_front() else {
                break;
            };

            let mut status = self.status.lock();
            for upload in &batch.uploads {
                status.insert(upload.handle, UploadStatus::Completed);
                if let Some(staging) = upload.staging {
                    self.staging_pool.release(staging);
                }
                self.pending_bytes.fetch_sub(upload.size, Ordering::Relaxed);
            }
            drop(status);

            self.free_command_buffers.lock().push_back(batch.cmd_buffer);
            drained += 1;
        }
        drained
    }

    /// Flush any pending uploads and block until the latest submitted batch
    /// signals.
    pub fn wait_idle(&self) {
        self.flush();
        let target = self.next_timeline_value.load(Ordering::Acquire).saturating_sub(1);
        if target == 0 {
            return;
        }
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(std::slice::from_ref(&self.timeline_semaphore))
            .values(std::slice::from_ref(&target));
        let _ = unsafe { self.device.wait_semaphores(&wait_info, u64::MAX) };
        self.process_completions();
    }

    /// Block on `handle`'s completion for up to `timeout`, returning whether
    /// it finished in time. On timeout the upload keeps running in the
    /// background; the caller may poll `status()` or call this again later
    /// (spec §5's suspension-point contract).
    pub fn wait_for_upload(&self, handle: UploadHandle, timeout: std::time::Duration) -> bool {
        match self.status(handle) {
            Some(UploadStatus::Completed) | Some(UploadStatus::Failed) => return true,
            None => return true,
            _ => {}
        }

        if self.status(handle) == Some(UploadStatus::Pending) {
            self.flush();
        }

        let signal_value = {
            let submitted = self.submitted.lock();
            submitted
                .iter()
                .find(|batch| batch.uploads.iter().any(|u| u.handle == handle))
                .map(|batch| batch.signal_value)
        };

        let Some(signal_value) = signal_value else {
            // A concurrent process_completions already drained this handle's
            // batch between our status check and here.
            return matches!(
                self.status(handle),
                Some(UploadStatus::Completed) | Some(UploadStatus::Failed) | None
            );
        };

        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(std::slice::from_ref(&self.timeline_semaphore))
            .values(std::slice::from_ref(&signal_value));
        let timed_out_nanos = timeout.as_nanos().min(u64::MAX as u128) as u64;
        let completed = unsafe { self.device.wait_semaphores(&wait_info, timed_out_nanos) }.is_ok();
        if completed {
            self.process_completions();
        }
        completed
    }

    pub fn status(&self, handle: UploadHandle) -> Option<UploadStatus> {
        self.status.lock().get(&handle).copied()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn pending_bytes(&self) -> u64 {
        self.pending_bytes.load(Ordering::Relaxed)
    }
}

impl Drop for BatchedUploader {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.timeline_semaphore, None);
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

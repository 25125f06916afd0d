//! Context lifecycle and the `Override` mechanism.
//!
//! Grounded on `ocl_context_t`/`ocl_override_t` in `CL/ocl.h` for the data
//! model, and on `ocl::Context`/`ContextBuilder` in the teacher crate for
//! the builder idiom and the underlying OpenCL context/queue creation.

use crate::error::{Error, Result};
use crate::gpu::device::Device;
use crate::gpu::event::ProfilingRecord;

/// Caps `max_groups`/`max_items[0]` for the lifetime of a [`Context`] and
/// supplies a fixed-capacity profiling buffer.
///
/// Original values are saved on `open` and restored on `close` (spec §3,
/// §4.3). A zero field means "don't override"; `max_profiling_count == 0`
/// means profiling is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct Override {
    pub max_groups: u32,
    pub max_items: u32,
    pub max_profiling_count: usize,
}

/// A context bound to one device, owning one command queue and an optional
/// [`Override`].
pub struct Context {
    pub(crate) ocl_context: ocl::Context,
    pub(crate) ocl_queue: ocl::Queue,
    pub(crate) device: Device,
    override_restore: Option<(u32, u32)>,
    profiling: Vec<ProfilingRecord>,
    profiling_capacity: usize,
}

impl Context {
    /// Open a context on `device`, optionally clamped by `override_`.
    pub fn open(mut device: Device, override_: Option<Override>) -> Result<Self> {
        let ocl_context = ocl::Context::builder()
            .platform(device.ocl_platform)
            .devices(device.ocl_device)
            .build()
            .map_err(|e| Error::device(e))?;

        let profiling_capacity = override_.map(|o| o.max_profiling_count).unwrap_or(0);
        let queue_props = if profiling_capacity > 0 {
            Some(ocl::core::CommandQueueProperties::PROFILING_ENABLE)
        } else {
            None
        };
        let ocl_queue = ocl::Queue::new(&ocl_context, device.ocl_device, queue_props)
            .map_err(|e| Error::device(e))?;

        let override_restore = if let Some(o) = override_ {
            let restore = (device.max_groups, device.max_items[0]);
            if o.max_groups != 0 {
                device.max_groups = o.max_groups;
            }
            if o.max_items != 0 {
                device.max_items[0] = o.max_items;
            }
            Some(restore)
        } else {
            None
        };

        log::debug!(
            "gpu: opened context on device '{}' (profiling capacity {})",
            device.name,
            profiling_capacity
        );

        Ok(Context {
            ocl_context,
            ocl_queue,
            device,
            override_restore,
            profiling: Vec::with_capacity(profiling_capacity),
            profiling_capacity,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn is_profiling_enabled(&self) -> bool {
        self.profiling_capacity > 0
    }

    pub(crate) fn queue(&self) -> &ocl::Queue {
        &self.ocl_queue
    }

    pub(crate) fn ocl_context(&self) -> &ocl::Context {
        &self.ocl_context
    }

    /// Append a zero-initialized profiling record, enforcing the fixed
    /// capacity from the `Override` this context was opened with.
    pub(crate) fn profile_add(&mut self, event: ocl::Event) -> Result<&mut ProfilingRecord> {
        if !self.is_profiling_enabled() {
            return Err(Error::contract_violation("profile_add called on a non-profiling context"));
        }
        if self.profiling.len() >= self.profiling_capacity {
            return Err(Error::contract_violation("profiling buffer capacity exceeded"));
        }
        self.profiling.push(ProfilingRecord::pending(event));
        Ok(self.profiling.last_mut().expect("just pushed"))
    }

    /// Reset the profiling buffer at the start of a new operation.
    pub(crate) fn profiling_reset(&mut self) {
        self.profiling.clear();
    }

    pub fn profiling_records(&self) -> &[ProfilingRecord] {
        &self.profiling
    }

    pub fn flush(&self) -> Result<()> {
        self.ocl_queue.flush().map_err(|e| Error::device(e))
    }

    pub fn finish(&self) -> Result<()> {
        self.ocl_queue.finish().map_err(|e| Error::device(e))
    }

    /// Dispose the queue, release the context, and restore any clamped
    /// device caps. Consuming `self` makes re-use after close impossible at
    /// the type level.
    pub fn close(mut self) -> Device {
        if let Some((max_groups, max_items0)) = self.override_restore.take() {
            self.device.max_groups = max_groups;
            self.device.max_items[0] = max_items0;
        }
        log::debug!("gpu: closed context on device '{}'", self.device.name);
        self.device
    }
}

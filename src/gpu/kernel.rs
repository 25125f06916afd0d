//! Kernel creation and launch.
//!
//! Grounded on `ocl_if.enqueue_range_kernel` in `CL/ocl.h` for the
//! pre-launch cap checks, and on `ocl::Kernel`/`KernelCmd` in the teacher
//! crate for argument binding and the 1-D N-D range launch itself.

use crate::error::{Error, Result};
use crate::gpu::context::Context;
use crate::gpu::program::Program;

pub struct Kernel {
    pub(crate) ocl_kernel: ocl::Kernel,
    name: String,
}

pub fn create(ctx: &Context, program: &Program, name: &str) -> Result<Kernel> {
    let ocl_kernel = ocl::Kernel::builder()
        .program(&program.ocl_program)
        .name(name)
        .queue(ctx.queue().clone())
        .build()
        .map_err(|e| Error::device(e))?;
    Ok(Kernel { ocl_kernel, name: name.to_string() })
}

impl Kernel {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bind a buffer argument at a fixed index.
    pub fn set_arg_buffer<T: ocl::OclPrm>(&self, idx: u32, buffer: &ocl::Buffer<T>) -> Result<()> {
        self.ocl_kernel.set_arg(idx, buffer).map_err(|e| Error::device(e))
    }

    /// Bind a scalar `int` argument at a fixed index.
    pub fn set_arg_i32(&self, idx: u32, value: i32) -> Result<()> {
        self.ocl_kernel.set_arg(idx, value).map_err(|e| Error::device(e))
    }

    /// Enqueue a 1-D N-D range launch: `global = groups * items_per_group`,
    /// `local = items_per_group`. Pre-checks the device's `max_groups`/
    /// `max_items[0]` caps before submitting, per spec §4.3.
    pub fn enqueue_range(&self, ctx: &Context, groups: u32, items_per_group: u32) -> Result<ocl::Event> {
        let device = ctx.device();
        if groups > device.max_groups {
            return Err(Error::contract_violation(format!(
                "groups {groups} exceeds device max_groups {}",
                device.max_groups
            )));
        }
        if items_per_group > device.max_items[0] {
            return Err(Error::contract_violation(format!(
                "items_per_group {items_per_group} exceeds device max_items[0] {}",
                device.max_items[0]
            )));
        }

        let global = (groups * items_per_group) as usize;
        let local = items_per_group as usize;
        let mut event = ocl::Event::empty();
        unsafe {
            self.ocl_kernel
                .cmd()
                .queue(ctx.queue())
                .global_work_size(global)
                .local_work_size(local)
                .enew(&mut event)
                .enq()
                .map_err(|e| Error::device(e))?;
        }
        Ok(event)
    }
}

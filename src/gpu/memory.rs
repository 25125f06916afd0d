//! Device buffer allocation and host-visible mapping.
//!
//! Grounded on `ocl_arg_t` and the map-flag bit layout in `CL/ocl.h`
//! (`ocl_map_write` "invalidates region"), realized through
//! [`ocl::Buffer`]'s `.map()` command builder, whose `.write_invalidate()`
//! call is exactly `CL_MAP_WRITE_INVALIDATE_REGION` — see the Open Question
//! decision in `DESIGN.md`.

use crate::error::{Error, Result};
use crate::gpu::context::Context;

/// Access mode for an allocation or a map, per spec §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

/// A device buffer of `f32` elements plus its owning-context identity.
///
/// Only `f32`-backed storage is modeled directly; fp16 buffers are backed by
/// `u16` (the bit pattern of [`crate::HalfFloat`]) and fp64 by `f64`. A
/// single generic type parameter would force every caller of `HostAPI::dot`
/// to be generic too, so the precision-specific element type is resolved
/// once here and the rest of the crate stays precision-index-driven instead.
pub enum Memory {
    Fp16(TypedMemory<u16>),
    Fp32(TypedMemory<f32>),
    Fp64(TypedMemory<f64>),
}

impl Memory {
    pub fn owning_context_id(&self) -> usize {
        match self {
            Memory::Fp16(m) => m.owning_context_id,
            Memory::Fp32(m) => m.owning_context_id,
            Memory::Fp64(m) => m.owning_context_id,
        }
    }

    pub fn len_elements(&self) -> usize {
        match self {
            Memory::Fp16(m) => m.buffer.len(),
            Memory::Fp32(m) => m.buffer.len(),
            Memory::Fp64(m) => m.buffer.len(),
        }
    }
}

/// A device buffer of one concrete element type, owned by exactly one
/// [`Context`] (enforced by comparing `owning_context_id` on every operation
/// that consumes two buffers — spec §9 "cross-context memory").
pub struct TypedMemory<T: ocl::OclPrm> {
    pub(crate) buffer: ocl::Buffer<T>,
    owning_context_id: usize,
}

fn context_id(ctx: &Context) -> usize {
    ctx.ocl_context() as *const ocl::Context as usize
}

pub fn allocate_f32(ctx: &Context, access: Access, len: usize) -> Result<Memory> {
    let flags = flags_for(access);
    let buffer = ocl::Buffer::builder()
        .queue(ctx.queue().clone())
        .flags(flags)
        .len(len)
        .build()
        .map_err(|_| Error::resource_exhaustion(len * std::mem::size_of::<f32>()))?;
    Ok(Memory::Fp32(TypedMemory { buffer, owning_context_id: context_id(ctx) }))
}

pub fn allocate_f64(ctx: &Context, access: Access, len: usize) -> Result<Memory> {
    let flags = flags_for(access);
    let buffer = ocl::Buffer::builder()
        .queue(ctx.queue().clone())
        .flags(flags)
        .len(len)
        .build()
        .map_err(|_| Error::resource_exhaustion(len * std::mem::size_of::<f64>()))?;
    Ok(Memory::Fp64(TypedMemory { buffer, owning_context_id: context_id(ctx) }))
}

pub fn allocate_f16(ctx: &Context, access: Access, len: usize) -> Result<Memory> {
    let flags = flags_for(access);
    let buffer = ocl::Buffer::builder()
        .queue(ctx.queue().clone())
        .flags(flags)
        .len(len)
        .build()
        .map_err(|_| Error::resource_exhaustion(len * std::mem::size_of::<u16>()))?;
    Ok(Memory::Fp16(TypedMemory { buffer, owning_context_id: context_id(ctx) }))
}

fn flags_for(access: Access) -> ocl::core::MemFlags {
    match access {
        Access::Read => ocl::core::MemFlags::new().read_only().alloc_host_ptr(),
        Access::Write => ocl::core::MemFlags::new().write_only().alloc_host_ptr(),
        Access::ReadWrite => ocl::core::MemFlags::new().read_write().alloc_host_ptr(),
    }
}

/// Assert `a` and `b` belong to the same context (spec §9 cross-context
/// memory contract).
pub fn assert_same_context(ctx: &Context, a: &Memory, b: &Memory) -> Result<()> {
    let id = context_id(ctx);
    if a.owning_context_id() != id || b.owning_context_id() != id {
        return Err(Error::contract_violation("memory handle does not belong to this context"));
    }
    Ok(())
}

/// Map `buffer` read-only, read the contents into `out`, and unmap.
pub fn read_f64(ctx: &Context, buffer: &ocl::Buffer<f64>) -> Result<f64> {
    let mut out = [0f64; 1];
    buffer
        .read(&mut out[..])
        .queue(ctx.queue())
        .enq()
        .map_err(|e| Error::device(e))?;
    Ok(out[0])
}

pub fn read_f32(ctx: &Context, buffer: &ocl::Buffer<f32>) -> Result<f32> {
    let mut out = [0f32; 1];
    buffer
        .read(&mut out[..])
        .queue(ctx.queue())
        .enq()
        .map_err(|e| Error::device(e))?;
    Ok(out[0])
}

pub fn read_f16(ctx: &Context, buffer: &ocl::Buffer<u16>) -> Result<u16> {
    let mut out = [0u16; 1];
    buffer
        .read(&mut out[..])
        .queue(ctx.queue())
        .enq()
        .map_err(|e| Error::device(e))?;
    Ok(out[0])
}

/// Read the single remaining element of a fully-reduced buffer, generic
/// over the precision's storage type (used internally by the tree
/// reduction, which is itself generic over element type).
pub(crate) fn read_one<T: ocl::OclPrm + Default>(ctx: &Context, buffer: &ocl::Buffer<T>) -> Result<T> {
    let mut out = [T::default(); 1];
    buffer
        .read(&mut out[..])
        .queue(ctx.queue())
        .enq()
        .map_err(|e| Error::device(e))?;
    Ok(out[0])
}

/// Write `data` into `buffer` using invalidate-region semantics: the map
/// contract makes these writes visible to the next kernel launch without
/// requiring a prior read of the mapped region.
pub fn write_invalidate_f32(ctx: &Context, buffer: &ocl::Buffer<f32>, data: &[f32]) -> Result<()> {
    write_invalidate(ctx, buffer, data)
}

pub fn write_invalidate_f64(ctx: &Context, buffer: &ocl::Buffer<f64>, data: &[f64]) -> Result<()> {
    write_invalidate(ctx, buffer, data)
}

/// `data` here is the raw bit pattern of each [`crate::HalfFloat`] element.
pub fn write_invalidate_f16(ctx: &Context, buffer: &ocl::Buffer<u16>, data: &[u16]) -> Result<()> {
    write_invalidate(ctx, buffer, data)
}

fn write_invalidate<T: ocl::OclPrm>(ctx: &Context, buffer: &ocl::Buffer<T>, data: &[T]) -> Result<()> {
    let mut mapped = buffer
        .map()
        .queue(ctx.queue())
        .write_invalidate()
        .enq()
        .map_err(|e| Error::device(e))?;
    mapped[..data.len()].copy_from_slice(data);
    mapped.unmap().enq().map_err(|e| Error::device(e))
}

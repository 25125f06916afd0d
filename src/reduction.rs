//! The tiled reduction engine: the heart of the system.
//!
//! Translates `blast_dot`/`sum_and_finish` from the original `blast.c`
//! line-for-line. The tiling loop and the tree-reduction shape selection are
//! exposed as pure functions ([`plan_tile`], [`plan_reduction`]) separable
//! from device execution, so the arithmetic itself is testable without a
//! GPU; [`dot_f32`]/[`dot_f64`]/[`dot_f16`] drive real kernel launches
//! through [`crate::gpu`].

use crate::error::{Error, Result};
use crate::gpu::context::Context;
use crate::gpu::event::OpCounts;
use crate::gpu::kernel::Kernel;
use crate::gpu::memory::{self, Access};
use crate::half::HalfFloat;

/// One outer tiling-loop iteration's launch shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub groups: u32,
    pub items: u32,
    /// Elements consumed by this tile (`groups * items`, or `n` itself when
    /// the whole remainder fits in one group).
    pub ne: usize,
}

/// Compute one tile's launch shape for a remaining element count `n`.
///
/// `groups` is first computed as `min(ceil(n / max_items), max_groups)`. If
/// that single group already covers all of `n` (`groups == 1`), the tile
/// takes exactly `n` elements. Otherwise the tile always uses the full
/// `max_items` per group; if `groups * max_items` overshoots `n` (`n` is not
/// a multiple of `max_items`), `groups` is shrunk by one rather than
/// shrinking `items`, keeping `items` a uniform `max_items` across every
/// group in the tile (the original source's exact strategy — it sacrifices
/// one tile's completeness rather than breaking the power-of-two item
/// width the tree reduction depends on).
///
/// `max_groups`/`max_items` must be powers of two, asserted here the same
/// way `blast_dot` asserts it before tiling; the tree reduction's halving
/// loop assumes it unconditionally.
pub fn plan_tile(n: usize, max_groups: u32, max_items: u32) -> Tile {
    assert!(n > 0, "plan_tile called with n == 0");
    assert!(max_items > 0 && max_groups > 0);
    assert!(max_items.is_power_of_two(), "max_items must be a power of two, got {max_items}");
    assert!(max_groups.is_power_of_two(), "max_groups must be a power of two, got {max_groups}");
    let max_items_sz = max_items as usize;

    let groups_raw = ((n + max_items_sz - 1) / max_items_sz).max(1) as u32;
    let mut groups = groups_raw.min(max_groups);

    let mut ne = if groups == 1 { n } else { groups as usize * max_items_sz };
    if ne > n {
        groups -= 1;
        ne = groups as usize * max_items_sz;
    }

    let items = (ne / groups.max(1) as usize) as u32;
    Tile { groups: groups.max(1), items, ne }
}

/// One tree-reduction pass: halves `n` elements down to `m`, choosing
/// `sum_odd` when `n` is odd (folding the dangling middle element) and
/// `sum_even` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReductionPass {
    pub n: usize,
    pub m: usize,
    pub groups: u32,
    pub items: u32,
    pub odd: bool,
}

/// Compute the full sequence of tree-reduction passes for `n0` elements
/// starting from the dot launch's own `(groups0, items0)` shape, per spec
/// §4.5's work-shape selection rule.
pub fn plan_reduction(n0: usize, groups0: u32, items0: u32, max_items: u32) -> Vec<ReductionPass> {
    let mut passes = Vec::new();
    let mut n = n0;
    let mut groups = groups0;
    let mut items = items0;

    loop {
        let m = n / 2;
        if m == 0 {
            break;
        }
        if (m as u32) < max_items {
            groups = 1;
            items = m as u32;
        } else if groups % 2 == 0 && groups > 1 {
            groups /= 2;
        } else if items % 2 == 0 && items > 1 {
            items /= 2;
        } else {
            unreachable!("power-of-two cap invariant violated: groups={groups} items={items}");
        }
        passes.push(ReductionPass { n, m, groups, items, odd: n % 2 == 1 });
        n = m;
    }
    passes
}

/// Kernel handles for one precision, built once in `HostAPI::init` and held
/// for the table's lifetime.
pub struct PrecisionKernels {
    pub dot: Kernel,
    pub dot_os: Kernel,
    pub sum_even: Kernel,
    pub sum_odd: Kernel,
}

/// Run the tree reduction on a `groups0 * items0`-element buffer down to a
/// single scalar, per spec §4.5's work-shape selection rule. Generic over
/// storage element type so the three precisions share one launch loop.
fn tree_reduce<T: ocl::OclPrm + Default>(
    ctx: &mut Context,
    kernels: &PrecisionKernels,
    buf: ocl::Buffer<T>,
    n0: usize,
    groups0: u32,
    items0: u32,
    max_items: u32,
) -> Result<T> {
    if n0 == 1 {
        ctx.finish()?;
        return memory::read_one(ctx, &buf);
    }

    let passes = plan_reduction(n0, groups0, items0, max_items);
    let mut current = buf;
    for pass in &passes {
        let dest = ocl::Buffer::<T>::builder()
            .queue(ctx.queue().clone())
            .flags(ocl::core::MemFlags::new().read_write())
            .len(pass.m.max(1))
            .build()
            .map_err(|_| Error::resource_exhaustion(pass.m.max(1) * std::mem::size_of::<T>()))?;

        let kernel = if pass.odd { &kernels.sum_odd } else { &kernels.sum_even };
        kernel.set_arg_buffer(0, &current)?;
        kernel.set_arg_buffer(1, &dest)?;
        kernel.set_arg_i32(2, (pass.n / 2) as i32)?;
        let event = kernel.enqueue_range(ctx, pass.groups, pass.items)?;
        record_profile(ctx, event, 1, 0);

        current = dest;
    }

    ctx.finish()?;
    memory::read_one(ctx, &current)
}

/// Bind a `dot`/`dot_os` launch's arguments and enqueue it, returning the
/// output buffer. Uses the offset/stride-free `dot` kernel only when this
/// tile's own offsets and strides have decayed to the compact case; a
/// later tile of an originally-compact call still needs `dot_os` once its
/// running offset has advanced past zero.
fn launch_dot<T: ocl::OclPrm + Default>(
    ctx: &mut Context,
    kernels: &PrecisionKernels,
    v0: &ocl::Buffer<T>,
    off0: usize,
    s0: usize,
    v1: &ocl::Buffer<T>,
    off1: usize,
    s1: usize,
    tile: Tile,
) -> Result<ocl::Buffer<T>> {
    let out = ocl::Buffer::<T>::builder()
        .queue(ctx.queue().clone())
        .flags(ocl::core::MemFlags::new().read_write())
        .len(tile.ne)
        .build()
        .map_err(|_| Error::resource_exhaustion(tile.ne * std::mem::size_of::<T>()))?;

    let compact = off0 == 0 && off1 == 0 && s0 == 1 && s1 == 1;
    let event = if compact {
        kernels.dot.set_arg_buffer(0, v0)?;
        kernels.dot.set_arg_buffer(1, v1)?;
        kernels.dot.set_arg_buffer(2, &out)?;
        kernels.dot.enqueue_range(ctx, tile.groups, tile.items)?
    } else {
        kernels.dot_os.set_arg_buffer(0, v0)?;
        kernels.dot_os.set_arg_i32(1, off0 as i32)?;
        kernels.dot_os.set_arg_i32(2, s0 as i32)?;
        kernels.dot_os.set_arg_buffer(3, v1)?;
        kernels.dot_os.set_arg_i32(4, off1 as i32)?;
        kernels.dot_os.set_arg_i32(5, s1 as i32)?;
        kernels.dot_os.set_arg_buffer(6, &out)?;
        kernels.dot_os.enqueue_range(ctx, tile.groups, tile.items)?
    };
    record_profile(ctx, event, 1, if compact { 0 } else { 4 });

    Ok(out)
}

fn record_profile(ctx: &mut Context, event: ocl::Event, fops: u64, i32ops: u64) {
    if !ctx.is_profiling_enabled() {
        return;
    }
    if let Ok(record) = ctx.profile_add(event) {
        record.user = OpCounts { fops, i32ops, i64ops: 0, count: 1 };
    }
}

/// Compute an fp32 dot product via tiling + tree reduction, accumulating
/// the running host sum in `f64` across tiles, per spec §4.5.
pub fn dot_f32(
    ctx: &mut Context,
    kernels: &PrecisionKernels,
    v0_host: &[f32],
    o0: usize,
    s0: usize,
    v1_host: &[f32],
    o1: usize,
    s1: usize,
    n: usize,
) -> Result<f64> {
    ctx.profiling_reset();

    let v0_mem = crate::gpu::memory::allocate_f32(ctx, Access::Read, n)?;
    let v1_mem = crate::gpu::memory::allocate_f32(ctx, Access::Read, n)?;
    let v0_buf = match &v0_mem {
        crate::gpu::memory::Memory::Fp32(m) => &m.buffer,
        _ => unreachable!(),
    };
    let v1_buf = match &v1_mem {
        crate::gpu::memory::Memory::Fp32(m) => &m.buffer,
        _ => unreachable!(),
    };
    crate::gpu::memory::write_invalidate_f32(ctx, v0_buf, v0_host)?;
    crate::gpu::memory::write_invalidate_f32(ctx, v1_buf, v1_host)?;

    let max_groups = ctx.device().max_groups;
    let max_items = ctx.device().max_items[0];

    let mut remaining = n;
    let mut off0 = o0;
    let mut off1 = o1;
    let mut total = 0.0f64;

    while remaining > 0 {
        let tile = plan_tile(remaining, max_groups, max_items);
        let out = launch_dot(ctx, kernels, v0_buf, off0, s0, v1_buf, off1, s1, tile)?;
        let scalar: f32 = tree_reduce(ctx, kernels, out, tile.ne, tile.groups, tile.items, max_items)?;
        total += scalar as f64;

        off0 += tile.ne * s0;
        off1 += tile.ne * s1;
        remaining -= tile.ne;
    }

    Ok(total)
}

/// Compute an fp64 dot product via tiling + tree reduction, accumulating
/// the running host sum in `f64` across tiles, per spec §4.5.
pub fn dot_f64(
    ctx: &mut Context,
    kernels: &PrecisionKernels,
    v0_host: &[f64],
    o0: usize,
    s0: usize,
    v1_host: &[f64],
    o1: usize,
    s1: usize,
    n: usize,
) -> Result<f64> {
    ctx.profiling_reset();

    let v0_mem = crate::gpu::memory::allocate_f64(ctx, Access::Read, n)?;
    let v1_mem = crate::gpu::memory::allocate_f64(ctx, Access::Read, n)?;
    let v0_buf = match &v0_mem {
        crate::gpu::memory::Memory::Fp64(m) => &m.buffer,
        _ => unreachable!(),
    };
    let v1_buf = match &v1_mem {
        crate::gpu::memory::Memory::Fp64(m) => &m.buffer,
        _ => unreachable!(),
    };
    crate::gpu::memory::write_invalidate_f64(ctx, v0_buf, v0_host)?;
    crate::gpu::memory::write_invalidate_f64(ctx, v1_buf, v1_host)?;

    let max_groups = ctx.device().max_groups;
    let max_items = ctx.device().max_items[0];

    let mut remaining = n;
    let mut off0 = o0;
    let mut off1 = o1;
    let mut total = 0.0f64;

    while remaining > 0 {
        let tile = plan_tile(remaining, max_groups, max_items);
        let out = launch_dot(ctx, kernels, v0_buf, off0, s0, v1_buf, off1, s1, tile)?;
        let scalar: f64 = tree_reduce(ctx, kernels, out, tile.ne, tile.groups, tile.items, max_items)?;
        total += scalar;

        off0 += tile.ne * s0;
        off1 += tile.ne * s1;
        remaining -= tile.ne;
    }

    Ok(total)
}

/// Compute an fp16 dot product via tiling + tree reduction. Host-side
/// vectors are converted to [`HalfFloat`] bit patterns before upload; the
/// finished scalar is promoted back to `f64` via [`HalfFloat::to_float`].
pub fn dot_f16(
    ctx: &mut Context,
    kernels: &PrecisionKernels,
    v0_host: &[HalfFloat],
    o0: usize,
    s0: usize,
    v1_host: &[HalfFloat],
    o1: usize,
    s1: usize,
    n: usize,
) -> Result<f64> {
    ctx.profiling_reset();

    let v0_bits: Vec<u16> = v0_host.iter().map(|h| h.to_bits()).collect();
    let v1_bits: Vec<u16> = v1_host.iter().map(|h| h.to_bits()).collect();

    let v0_mem = crate::gpu::memory::allocate_f16(ctx, Access::Read, n)?;
    let v1_mem = crate::gpu::memory::allocate_f16(ctx, Access::Read, n)?;
    let v0_buf = match &v0_mem {
        crate::gpu::memory::Memory::Fp16(m) => &m.buffer,
        _ => unreachable!(),
    };
    let v1_buf = match &v1_mem {
        crate::gpu::memory::Memory::Fp16(m) => &m.buffer,
        _ => unreachable!(),
    };
    crate::gpu::memory::write_invalidate_f16(ctx, v0_buf, &v0_bits)?;
    crate::gpu::memory::write_invalidate_f16(ctx, v1_buf, &v1_bits)?;

    let max_groups = ctx.device().max_groups;
    let max_items = ctx.device().max_items[0];

    let mut remaining = n;
    let mut off0 = o0;
    let mut off1 = o1;
    let mut total = 0.0f64;

    while remaining > 0 {
        let tile = plan_tile(remaining, max_groups, max_items);
        let out = launch_dot(ctx, kernels, v0_buf, off0, s0, v1_buf, off1, s1, tile)?;
        let scalar_bits: u16 = tree_reduce(ctx, kernels, out, tile.ne, tile.groups, tile.items, max_items)?;
        total += HalfFloat::from_bits(scalar_bits).to_float() as f64;

        off0 += tile.ne * s0;
        off1 += tile.ne * s1;
        remaining -= tile.ne;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_tile_fits_in_one_group_when_small() {
        let tile = plan_tile(5, 64, 16);
        assert_eq!(tile, Tile { groups: 1, items: 5, ne: 5 });
    }

    #[test]
    fn plan_tile_uses_full_groups_when_large() {
        // n = 1000, max_items = 16 -> ceil(1000/16) = 63 groups, capped at max_groups.
        let tile = plan_tile(1000, 32, 16);
        assert_eq!(tile.groups, 32);
        assert_eq!(tile.items, 16);
        assert_eq!(tile.ne, 512);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn plan_tile_rejects_non_power_of_two_max_items() {
        plan_tile(100, 64, 17);
    }

    #[test]
    fn plan_tile_shrinks_groups_to_keep_items_uniform() {
        // n = 100, max_items = 16 -> ceil(100/16) = 7 groups; 7*16=112 > 100, shrink to 6*16=96.
        let tile = plan_tile(100, 64, 16);
        assert_eq!(tile.groups, 6);
        assert_eq!(tile.items, 16);
        assert_eq!(tile.ne, 96);
    }

    #[test]
    fn plan_reduction_halves_to_one_element() {
        let passes = plan_reduction(8, 1, 8, 16);
        assert_eq!(passes.len(), 3); // 8 -> 4 -> 2 -> 1
        assert_eq!(passes.last().unwrap().m, 1);
        assert!(passes.iter().all(|p| !p.odd));
    }

    #[test]
    fn plan_reduction_folds_odd_middle_element() {
        let passes = plan_reduction(5, 1, 5, 16);
        // 5 -> 2 (odd pass folds index 4) -> 1
        assert!(passes[0].odd);
        assert_eq!(passes[0].m, 2);
        assert_eq!(passes.last().unwrap().m, 1);
    }

    #[test]
    fn plan_reduction_is_tiling_invariant_in_element_count() {
        // Same total input processed as one tile vs. two tiles must both
        // reduce down to a single element (spec §8 tiling invariance).
        let whole = plan_reduction(1024, 1, 1024, 256);
        assert_eq!(whole.last().unwrap().m, 1);
        let half = plan_reduction(512, 1, 512, 256);
        assert_eq!(half.last().unwrap().m, 1);
    }
}

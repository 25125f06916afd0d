//! The GPU compute fabric: device enumeration, context/queue lifecycle,
//! buffer allocation with host-visible mapping, program build, kernel
//! launch, and event-based profiling.
//!
//! A thin, typed wrapper around the published [`ocl`] crate — the teacher's
//! own crate — rather than a re-implementation of the OpenCL FFI layer; see
//! `DESIGN.md` for why.

pub mod context;
pub mod device;
pub mod event;
pub mod kernel;
pub mod memory;
pub mod program;

pub use context::{Context, Override};
pub use device::{Device, DeviceFlavor, FpConfig};
pub use event::{FinalizedProfile, OpCounts, ProfilingRecord};
pub use kernel::Kernel;
pub use memory::{Access, Memory};
pub use program::Program;

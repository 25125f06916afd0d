//! Crate-wide error type.
//!
//! Four of the five kinds here are fatal: they are raised, logged, and the
//! process is aborted from inside the same call that constructs them. Only
//! [`Error::ProbeFault`] is ever handed back to a caller as an ordinary
//! `Result::Err` — see [`crate::cpu`] for where it is caught and turned into
//! a disabled dispatch tier instead of a crash.

use std::panic::Location;
use std::process;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The five error kinds named by the specification.
///
/// `DeviceError`, `BuildFailure`, `ContractViolation`, and `ResourceExhaustion`
/// are always fatal: constructing one and handing it to [`fatal`] (which
/// every public fallible entry point in this crate does for these variants)
/// never returns.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Any non-zero status returned by the OpenCL-family backend.
    #[error("device error at {site}: {status}")]
    DeviceError {
        status: ocl::Error,
        site: &'static Location<'static>,
    },

    /// A kernel-language program failed to build; `log` is the build log
    /// retrieved from the backend.
    #[error("build failure at {site}:\n{log}")]
    BuildFailure {
        log: String,
        site: &'static Location<'static>,
    },

    /// A hardware fault during the SIMD-256 or SIMD-512 probe. The only
    /// recoverable variant: callers catch this and disable the tier for the
    /// remainder of the process.
    #[error("probe fault at {site}: {reason}")]
    ProbeFault {
        reason: String,
        site: &'static Location<'static>,
    },

    /// A precondition failure: invalid precision index, foreign memory
    /// crossing a context boundary, profiling capacity exceeded, overlapping
    /// map, or an absent per-precision kernel table entry.
    #[error("contract violation at {site}: {reason}")]
    ContractViolation {
        reason: String,
        site: &'static Location<'static>,
    },

    /// A device or host allocation returned null/error.
    #[error("resource exhaustion at {site}: requested {requested_bytes} bytes")]
    ResourceExhaustion {
        requested_bytes: usize,
        site: &'static Location<'static>,
    },
}

impl Error {
    #[track_caller]
    pub(crate) fn device(status: ocl::Error) -> Self {
        Error::DeviceError { status, site: Location::caller() }
    }

    #[track_caller]
    pub(crate) fn build_failure(log: String) -> Self {
        Error::BuildFailure { log, site: Location::caller() }
    }

    #[track_caller]
    pub(crate) fn probe_fault(reason: impl Into<String>) -> Self {
        Error::ProbeFault { reason: reason.into(), site: Location::caller() }
    }

    #[track_caller]
    pub(crate) fn contract_violation(reason: impl Into<String>) -> Self {
        Error::ContractViolation { reason: reason.into(), site: Location::caller() }
    }

    #[track_caller]
    pub(crate) fn resource_exhaustion(requested_bytes: usize) -> Self {
        Error::ResourceExhaustion { requested_bytes, site: Location::caller() }
    }

    /// True for the one recoverable variant.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::ProbeFault { .. })
    }
}

/// Log `err` at `error` level and abort the process.
///
/// This is the single abort call site in the crate; every fatal-kind
/// constructor above is meant to be routed through this function rather than
/// returned to a caller. `ProbeFault` must never be passed here.
pub(crate) fn fatal(err: Error) -> ! {
    debug_assert!(!err.is_recoverable(), "fatal() called with a recoverable error: {err}");
    log::error!("{err}");
    process::abort()
}

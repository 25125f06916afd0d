//! Kernel-source embedding, abstracted behind a locator trait.
//!
//! Grounded on `blast_init`'s `memmap_resource` call in the original
//! `blast.c` and the locator abstraction named explicitly in spec §9
//! ("a locator function returns (pointer, length) for a named resource.
//! Implementations may embed at link time or load from a file next to the
//! binary"). This crate supplies the link-time-embedded implementation;
//! [`KernelSourceLocator`] lets an embedding host substitute another one
//! without touching [`crate::reduction`] or [`crate::host`].

/// Resolves a named kernel-language resource to (label, source text).
pub trait KernelSourceLocator {
    fn locate(&self) -> (&str, &str);
}

/// The default locator: the kernel-language text embedded in the binary at
/// compile time via `include_str!`, under the resource name `blast_cl`
/// (matching the original source's resource name).
pub struct EmbeddedKernelSource;

const BLAST_CL: &str = include_str!("kernels/blast.cl");

impl KernelSourceLocator for EmbeddedKernelSource {
    fn locate(&self) -> (&str, &str) {
        ("blast_cl", BLAST_CL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_source_exports_required_entry_points() {
        let (label, source) = EmbeddedKernelSource.locate();
        assert_eq!(label, "blast_cl");
        for name in ["dot", "dot_os", "sum_odd", "sum_odd_os", "sum_even", "sum_even_os", "gemv", "gemv_os"] {
            assert!(source.contains(name), "kernel source missing entry point `{name}`");
        }
    }
}

//! Program compilation: per-precision macro substitution and build.
//!
//! The option string mirrors `blast_program_options` in the original
//! `blast.c` exactly (type aliases, vector aliases, suffix token, fp16
//! surrogate define, `-cl-std` version), built through
//! [`ocl::ProgramBuilder`]'s `cmplr_def`/`cmplr_opt` fluent calls.

use crate::error::{Error, Result};
use crate::gpu::context::Context;
use crate::kernel_source::KernelSourceLocator;
use crate::Precision;

pub struct Program {
    pub(crate) ocl_program: ocl::Program,
}

/// Compile the embedded kernel-language source for one precision.
///
/// On build failure, retrieves the build log from the backend and returns
/// [`Error::BuildFailure`] (fatal at the `HostAPI` layer — see spec §4.3,
/// §7).
pub fn compile(ctx: &Context, locator: &dyn KernelSourceLocator, precision: Precision) -> Result<Program> {
    let (label, source) = locator.locate();

    let mut builder = ocl::Program::builder();
    builder.source(source);
    builder.devices(ctx.device().ocl_device);

    let opt_string = build_options(precision, ctx.device().c_version_major, ctx.device().c_version_minor);
    builder.cmplr_opt(opt_string);

    match builder.build(ctx.ocl_context()) {
        Ok(ocl_program) => {
            log::debug!("gpu: compiled program '{label}' for {}", precision.suffix());
            Ok(Program { ocl_program })
        }
        Err(e) => {
            let log = e.to_string();
            Err(Error::build_failure(log))
        }
    }
}

fn build_options(precision: Precision, c_major: u32, c_minor: u32) -> String {
    let t = precision.kernel_type_name();
    let mut opts = format!(
        "-D fp16_t=half -D fp32_t=float -D fp64_t=double -D int32_t=int -D int64_t=long \
         -cl-std=CL{c_major}.{c_minor} -D fp_t={t} -D vec4={t}4 -D vec8={t}8 -D vec16={t}16 \
         -D suffix={}",
        precision.suffix()
    );
    if precision == Precision::Fp16 {
        opts.push_str(" -D fp16_surrogate");
    }
    opts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fp16_build_options_include_surrogate_define() {
        let opts = build_options(Precision::Fp16, 1, 2);
        assert!(opts.contains("fp16_surrogate"));
        assert!(opts.contains("suffix=fp16"));
        assert!(opts.contains("fp_t=half"));
    }

    #[test]
    fn fp64_build_options_omit_surrogate_define() {
        let opts = build_options(Precision::Fp64, 1, 2);
        assert!(!opts.contains("fp16_surrogate"));
        assert!(opts.contains("fp_t=double"));
    }
}

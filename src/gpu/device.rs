//! Device description: vendor flavor, capability flags, work-group/work-item
//! caps.
//!
//! The bit layouts mirror `ocl_device_t` and its `flavor`/`fp_config`
//! bitsets in the original `CL/ocl.h`; the underlying enumeration and info
//! queries are backed by [`ocl::Platform`]/[`ocl::Device`].

use bitflags::bitflags;

use crate::error::{Error, Result};

bitflags! {
    /// Vendor flavor bitset, mirroring `ocl_flavor` in `CL/ocl.h`.
    pub struct DeviceFlavor: u32 {
        const NVIDIA     = 1 << 0;
        const AMD        = 1 << 1;
        const INTEL      = 1 << 2;
        const APPLE      = 1 << 3;
        const ADRENO     = 1 << 4;
        const VIDEO_CORE = 1 << 5;
        const POWER_VR   = 1 << 6;
        const VIVANTE    = 1 << 7;
        const MALI       = 1 << 8;
    }
}

bitflags! {
    /// Floating-point capability bitset, mirroring `ocl_fp_config` in
    /// `CL/ocl.h`: rounding-mode and arithmetic capability bits in 0..8,
    /// plus fp16/fp64 extension-support bits at 29/30.
    pub struct FpConfig: u32 {
        const DENORM                      = 1 << 0;
        const INF_NAN                     = 1 << 1;
        const ROUND_TO_NEAREST            = 1 << 2;
        const ROUND_TO_ZERO               = 1 << 3;
        const ROUND_TO_INF                = 1 << 4;
        const FMA                         = 1 << 5;
        const SOFT_FLOAT                  = 1 << 6;
        const CORRECTLY_ROUNDED_DIV_SQRT  = 1 << 7;
        const FP16                        = 1 << 29;
        const FP64                        = 1 << 30;
    }
}

/// One enumerated compute device.
#[derive(Debug, Clone)]
pub struct Device {
    pub(crate) ocl_device: ocl::Device,
    pub(crate) ocl_platform: ocl::Platform,
    pub name: String,
    pub vendor: String,
    pub flavor: DeviceFlavor,
    pub version_major: u32,
    pub version_minor: u32,
    pub c_version_major: u32,
    pub c_version_minor: u32,
    pub clock_frequency_mhz: u32,
    pub global_memory_bytes: u64,
    pub local_memory_bytes: u64,
    pub compute_units: u32,
    /// Max work-items per work-group, rounded down to a power of two if the
    /// device reports otherwise (spec §9 "power-of-two cap invariant").
    pub max_groups: u32,
    pub dimensions: u32,
    pub max_items: [u32; 3],
    pub float_fp_config: FpConfig,
    pub double_fp_config: FpConfig,
    pub extensions: String,
}

impl Device {
    pub fn supports_fp16(&self) -> bool {
        self.float_fp_config.contains(FpConfig::FP16)
    }

    pub fn supports_fp64(&self) -> bool {
        self.double_fp_config.contains(FpConfig::FP64) || !self.double_fp_config.is_empty()
    }

    pub fn is_available(&self) -> Result<bool> {
        self.ocl_device.is_available().map_err(|e| Error::device(e.into()))
    }
}

fn round_down_pow2(value: u32) -> u32 {
    if value == 0 {
        return 0;
    }
    1u32 << (31 - value.leading_zeros())
}

fn derive_flavor(vendor: &str, name: &str) -> DeviceFlavor {
    let haystack = format!("{vendor} {name}").to_ascii_lowercase();
    let mut flavor = DeviceFlavor::empty();
    let checks: &[(&str, DeviceFlavor)] = &[
        ("nvidia", DeviceFlavor::NVIDIA),
        ("advanced micro devices", DeviceFlavor::AMD),
        ("amd", DeviceFlavor::AMD),
        ("intel", DeviceFlavor::INTEL),
        ("apple", DeviceFlavor::APPLE),
        ("adreno", DeviceFlavor::ADRENO),
        ("qualcomm", DeviceFlavor::ADRENO),
        ("videocore", DeviceFlavor::VIDEO_CORE),
        ("broadcom", DeviceFlavor::VIDEO_CORE),
        ("powervr", DeviceFlavor::POWER_VR),
        ("imagination", DeviceFlavor::POWER_VR),
        ("vivante", DeviceFlavor::VIVANTE),
        ("mali", DeviceFlavor::MALI),
        ("arm", DeviceFlavor::MALI),
    ];
    for (needle, bit) in checks {
        if haystack.contains(needle) {
            flavor |= *bit;
        }
    }
    flavor
}

/// Enumerate every device on every platform.
///
/// Rule from spec §4.3: if a device reports no explicit fp16 flag, set it
/// anyway — NVIDIA platforms are known not to advertise the extension but
/// support the type.
pub fn enumerate() -> Result<Vec<Device>> {
    let mut devices = Vec::new();
    for platform in ocl::Platform::list() {
        let platform_devices = ocl::Device::list_all(platform).map_err(|e| Error::device(e.into()))?;
        for ocl_device in platform_devices {
            devices.push(describe(platform, ocl_device)?);
        }
    }
    log::debug!("gpu: enumerated {} device(s)", devices.len());
    Ok(devices)
}

/// Extract the first "N.M" token from a version string such as
/// `"OpenCL 1.2 CUDA"` or `"OpenCL C 2.0"`. Falls back to `1.2`, the
/// baseline every conformant device supports, if the string carries no
/// such token.
fn parse_version(version_str: &str) -> (u32, u32) {
    for word in version_str.split_whitespace() {
        let parts: Vec<&str> = word.split('.').collect();
        if parts.len() == 2 {
            if let (Ok(major), Ok(minor)) = (parts[0].parse::<u32>(), parts[1].parse::<u32>()) {
                return (major, minor);
            }
        }
    }
    (1, 2)
}

fn info_string(device: &ocl::Device, kind: ocl::core::DeviceInfo) -> String {
    device.info(kind).to_string()
}

fn info_number<T: std::str::FromStr + Default>(device: &ocl::Device, kind: ocl::core::DeviceInfo) -> T {
    device.info(kind).to_string().parse().unwrap_or_default()
}

fn describe(platform: ocl::Platform, ocl_device: ocl::Device) -> Result<Device> {
    let name = ocl_device.name();
    let vendor = ocl_device.vendor();
    let flavor = derive_flavor(&vendor, &name);

    let extensions = info_string(&ocl_device, ocl::core::DeviceInfo::Extensions);

    let mut float_fp_config = FpConfig::empty();
    if extensions.contains("cl_khr_fp16") || flavor.contains(DeviceFlavor::NVIDIA) {
        // NVIDIA does not advertise cl_khr_fp16 on most platforms despite
        // supporting half-precision storage; assume support unconditionally.
        float_fp_config |= FpConfig::FP16;
    }

    let mut double_fp_config = FpConfig::empty();
    if extensions.contains("cl_khr_fp64") {
        double_fp_config |= FpConfig::FP64;
    }

    let (version_major, version_minor) = parse_version(&info_string(&ocl_device, ocl::core::DeviceInfo::Version));
    let (c_version_major, c_version_minor) =
        parse_version(&info_string(&ocl_device, ocl::core::DeviceInfo::OpenclCVersion));

    let clock_frequency_mhz = info_number(&ocl_device, ocl::core::DeviceInfo::MaxClockFrequency);
    let global_memory_bytes = info_number(&ocl_device, ocl::core::DeviceInfo::GlobalMemSize);
    let local_memory_bytes = info_number(&ocl_device, ocl::core::DeviceInfo::LocalMemSize);
    let compute_units = info_number(&ocl_device, ocl::core::DeviceInfo::MaxComputeUnits);

    let max_groups = ocl_device.max_wg_size().map_err(|e| Error::device(e.into()))? as u32;
    let max_groups = round_down_pow2(max_groups);

    Ok(Device {
        ocl_device,
        ocl_platform: platform,
        name,
        vendor,
        flavor,
        version_major,
        version_minor,
        c_version_major,
        c_version_minor,
        clock_frequency_mhz,
        global_memory_bytes,
        local_memory_bytes,
        compute_units,
        max_groups,
        dimensions: 1,
        max_items: [round_down_pow2(max_groups), 1, 1],
        float_fp_config,
        double_fp_config,
        extensions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_down_to_power_of_two() {
        assert_eq!(round_down_pow2(1024), 1024);
        assert_eq!(round_down_pow2(1000), 512);
        assert_eq!(round_down_pow2(1), 1);
        assert_eq!(round_down_pow2(0), 0);
    }

    #[test]
    fn flavor_detects_nvidia_case_insensitively() {
        let flavor = derive_flavor("NVIDIA Corporation", "GeForce RTX 4090");
        assert!(flavor.contains(DeviceFlavor::NVIDIA));
    }

    #[test]
    fn parse_version_extracts_major_minor() {
        assert_eq!(parse_version("OpenCL 1.2 CUDA"), (1, 2));
        assert_eq!(parse_version("OpenCL C 2.0"), (2, 0));
    }

    #[test]
    fn parse_version_falls_back_to_1_2_on_unparsable_string() {
        assert_eq!(parse_version("garbage"), (1, 2));
    }
}

//! Device-facing seams: what the runtime needs to know about an accelerator and
//! how it hands kernels to it.
//!
//! A [`Platform`] enumerates devices and creates one [`KernelLauncher`] per
//! device. The HIP backend implements both against the real runtime; the
//! reference backend implements them in software for tests.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DeviceResult;
use crate::problem::DevicePtr;

/// Unified-memory (xnack) mode a device runs in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XnackMode {
    /// The target name carries no xnack feature; binaries for either mode load.
    #[default]
    Unspecified,
    Enabled,
    Disabled,
}

impl XnackMode {
    pub fn tag(self) -> Option<&'static str> {
        match self {
            XnackMode::Unspecified => None,
            XnackMode::Enabled => Some("xnack+"),
            XnackMode::Disabled => Some("xnack-"),
        }
    }

    /// Tag of binaries built for the other mode, which must not be loaded.
    pub fn opposite_tag(self) -> Option<&'static str> {
        match self {
            XnackMode::Unspecified => None,
            XnackMode::Enabled => Some("xnack-"),
            XnackMode::Disabled => Some("xnack+"),
        }
    }
}

/// Splits a full target name such as `gfx90a:sramecc+:xnack-` into the
/// architecture and its xnack mode.
pub fn parse_target_name(full: &str) -> (String, XnackMode) {
    let mut parts = full.trim().split(':');
    let arch = parts.next().unwrap_or_default().to_string();
    let xnack = parts
        .find_map(|feature| match feature {
            "xnack+" => Some(XnackMode::Enabled),
            "xnack-" => Some(XnackMode::Disabled),
            _ => None,
        })
        .unwrap_or_default();
    (arch, xnack)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProperties {
    pub device_id: usize,
    pub name: String,
    /// Bare architecture name, e.g. `gfx90a`.
    pub arch: String,
    pub xnack: XnackMode,
    pub compute_units: u32,
}

impl DeviceProperties {
    pub fn from_target_name(device_id: usize, name: impl Into<String>, target: &str, compute_units: u32) -> Self {
        let (arch, xnack) = parse_target_name(target);
        Self {
            device_id,
            name: name.into(),
            arch,
            xnack,
            compute_units,
        }
    }

    pub fn hardware(&self) -> Hardware {
        Hardware {
            architecture: self.arch.clone(),
            compute_units: self.compute_units,
        }
    }
}

/// Hardware facts that solution predicates are evaluated against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hardware {
    pub architecture: String,
    pub compute_units: u32,
}

/// Opaque stream handle owned by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub usize);

/// Opaque event handle owned by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EventHandle(pub usize);

/// Events recorded around a launch for timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingEvents {
    pub start: EventHandle,
    pub stop: EventHandle,
}

/// Packed kernel argument block with natural alignment for every field.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct KernelArgs {
    bytes: Vec<u8>,
    fields: Vec<(&'static str, usize)>,
}

impl KernelArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ptr(&mut self, name: &'static str, ptr: DevicePtr) {
        self.push_bytes(name, &ptr.0.to_le_bytes(), 8);
    }

    pub fn push_u32(&mut self, name: &'static str, value: u32) {
        self.push_bytes(name, &value.to_le_bytes(), 4);
    }

    pub fn push_u64(&mut self, name: &'static str, value: u64) {
        self.push_bytes(name, &value.to_le_bytes(), 8);
    }

    pub fn push_bytes(&mut self, name: &'static str, bytes: &[u8], align: usize) {
        let align = align.max(1);
        let padded = self.bytes.len().div_ceil(align) * align;
        self.bytes.resize(padded, 0);
        self.fields.push((name, padded));
        self.bytes.extend_from_slice(bytes);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Byte offset of a named field.
    pub fn offset_of(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, offset)| *offset)
    }
}

impl fmt::Debug for KernelArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelArgs")
            .field("bytes", &self.bytes.len())
            .field("fields", &self.fields.len())
            .finish()
    }
}

/// One kernel launch produced by a solution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelInvocation {
    pub kernel_name: String,
    /// Code object (file stem) that defines `kernel_name`.
    pub code_object: String,
    /// Number of workgroups per dimension.
    pub grid: [u32; 3],
    pub workgroup: [u32; 3],
    pub shared_mem_bytes: u32,
    pub args: KernelArgs,
}

/// Loads kernel binaries for one device and launches kernels from them.
///
/// Mutated only while its device is initialized; shared read-only afterward.
pub trait KernelLauncher: Send + Sync {
    /// Registers every kernel contained in one code object file.
    fn load_code_object_file(&mut self, path: &Path) -> DeviceResult<()>;

    /// Defers code object loading until a kernel is first launched; binaries are
    /// looked up in `directory`, preferring builds tagged for `xnack`.
    fn initialize_lazy_loading(
        &mut self,
        arch: &str,
        xnack: XnackMode,
        directory: &Path,
    ) -> DeviceResult<()>;

    /// Launches `kernels` in order on `stream`.
    fn launch_kernels(
        &self,
        kernels: &[KernelInvocation],
        stream: StreamHandle,
        timing: Option<TimingEvents>,
    ) -> DeviceResult<()>;

    fn loaded_code_objects(&self) -> usize;
}

/// Name a catalog uses for the kernel binary at `path`: the file stem without a
/// trailing xnack tag, so `Kernels_gfx90a-xnack-.co` serves `Kernels_gfx90a`.
///
/// The flag is set when a tag was removed.
pub fn code_object_name(path: &Path) -> Option<(String, bool)> {
    let stem = path.file_stem()?.to_str()?;
    for tag in ["xnack+", "xnack-"] {
        let untagged = stem
            .strip_suffix(tag)
            .and_then(|rest| rest.strip_suffix(|c: char| c == '-' || c == ':'));
        if let Some(base) = untagged.filter(|base| !base.is_empty()) {
            return Some((base.to_string(), true));
        }
    }
    Some((stem.to_string(), false))
}

/// File names that can hold `code_object` on a device in `xnack` mode, in
/// lookup order: the mode-specific build first, then the generic one.
pub fn code_object_file_names(code_object: &str, xnack: XnackMode) -> Vec<String> {
    let mut names = Vec::with_capacity(2);
    if let Some(tag) = xnack.tag() {
        names.push(format!("{code_object}-{tag}.co"));
    }
    names.push(format!("{code_object}.co"));
    names
}

/// Accelerator runtime: device enumeration and launcher construction.
pub trait Platform: Send + Sync {
    fn name(&self) -> &str;

    fn device_count(&self) -> DeviceResult<usize>;

    fn device_properties(&self, device: usize) -> DeviceResult<DeviceProperties>;

    fn new_launcher(&self, device: usize) -> DeviceResult<Box<dyn KernelLauncher>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_names_split_into_arch_and_xnack() {
        assert_eq!(
            parse_target_name("gfx90a:sramecc+:xnack-"),
            ("gfx90a".to_string(), XnackMode::Disabled)
        );
        assert_eq!(
            parse_target_name("gfx942:xnack+"),
            ("gfx942".to_string(), XnackMode::Enabled)
        );
        assert_eq!(
            parse_target_name("gfx1100"),
            ("gfx1100".to_string(), XnackMode::Unspecified)
        );
    }

    #[test]
    fn xnack_builds_share_the_catalog_name() {
        let name = |file: &str| code_object_name(Path::new(file));
        assert_eq!(
            name("/lib/Kernels_gfx90a-xnack-.co"),
            Some(("Kernels_gfx90a".to_string(), true))
        );
        assert_eq!(
            name("Kernels_gfx90a:xnack+.co"),
            Some(("Kernels_gfx90a".to_string(), true))
        );
        assert_eq!(
            name("Kernels_gfx90a.co"),
            Some(("Kernels_gfx90a".to_string(), false))
        );
        assert_eq!(
            code_object_file_names("Kernels_gfx90a", XnackMode::Disabled),
            vec![
                "Kernels_gfx90a-xnack-.co".to_string(),
                "Kernels_gfx90a.co".to_string()
            ]
        );
        assert_eq!(
            code_object_file_names("Kernels_gfx90a", XnackMode::Unspecified),
            vec!["Kernels_gfx90a.co".to_string()]
        );
    }

    #[test]
    fn kernel_args_are_naturally_aligned() {
        let mut args = KernelArgs::new();
        args.push_u32("m", 7);
        args.push_ptr("d", DevicePtr(0x1000));
        args.push_bytes("alpha", &[1, 0], 2);
        assert_eq!(args.offset_of("m"), Some(0));
        assert_eq!(args.offset_of("d"), Some(8));
        assert_eq!(args.offset_of("alpha"), Some(16));
        assert_eq!(args.len(), 18);
    }
}

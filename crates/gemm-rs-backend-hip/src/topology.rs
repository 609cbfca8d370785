//! GPU agents as reported by the KFD topology in sysfs.
//!
//! Each `nodes/<n>/properties` file is a list of `key value` lines. CPU nodes
//! report a `gfx_target_version` of zero and are skipped; GPU nodes appear in
//! the same order as HIP device ordinals.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use gemm_rs::device::XnackMode;

pub const KFD_TOPOLOGY_NODES: &str = "/sys/class/kfd/kfd/topology/nodes";

/// Full target name override, e.g. `gfx90a:xnack-`.
pub const ENV_ARCH: &str = "GEMMRS_ARCH";
pub const ENV_HSA_XNACK: &str = "HSA_XNACK";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuAgent {
    pub node: usize,
    /// Bare architecture name, e.g. `gfx90a`.
    pub arch: String,
    pub compute_units: u32,
}

/// Architecture name for a KFD `gfx_target_version`, e.g. `90010` is `gfx90a`.
///
/// The stepping is printed in hex, as in the compiler's target names.
pub fn gfx_name(target_version: u32) -> Option<String> {
    if target_version == 0 {
        return None;
    }
    let major = target_version / 10_000;
    let minor = (target_version / 100) % 100;
    let stepping = target_version % 100;
    Some(format!("gfx{major}{minor}{stepping:x}"))
}

/// Parses one node `properties` file. Returns `None` for CPU nodes.
pub fn parse_node_properties(node: usize, text: &str) -> Option<GpuAgent> {
    let value = |key: &str| -> Option<u64> {
        text.lines().find_map(|line| {
            let mut parts = line.split_whitespace();
            (parts.next()? == key).then_some(())?;
            parts.next()?.parse().ok()
        })
    };
    let version = u32::try_from(value("gfx_target_version")?).ok()?;
    let arch = gfx_name(version)?;
    let simds = value("simd_count").unwrap_or(0);
    let per_cu = value("simd_per_cu").filter(|&n| n > 0).unwrap_or(1);
    Some(GpuAgent {
        node,
        arch,
        compute_units: u32::try_from(simds / per_cu).unwrap_or(u32::MAX),
    })
}

/// GPU agents under `root`, in node order.
pub fn read_agents(root: &Path) -> io::Result<Vec<GpuAgent>> {
    let mut nodes: Vec<(usize, PathBuf)> = fs::read_dir(root)?
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let node = entry.file_name().to_str()?.parse().ok()?;
            Some((node, entry.path().join("properties")))
        })
        .collect();
    nodes.sort_by_key(|(node, _)| *node);

    let mut agents = Vec::new();
    for (node, path) in nodes {
        let Ok(text) = fs::read_to_string(&path) else {
            continue;
        };
        if let Some(agent) = parse_node_properties(node, &text) {
            agents.push(agent);
        }
    }
    Ok(agents)
}

/// Xnack mode requested through `HSA_XNACK`: `1` enables, `0` disables, any
/// other value leaves it unspecified.
pub fn xnack_from_env(value: Option<&str>) -> XnackMode {
    match value.map(str::trim) {
        Some("1") => XnackMode::Enabled,
        Some("0") => XnackMode::Disabled,
        _ => XnackMode::Unspecified,
    }
}

/// Full target name for an architecture and xnack mode, e.g. `gfx90a:xnack-`.
pub fn target_name(arch: &str, xnack: XnackMode) -> String {
    match xnack.tag() {
        Some(tag) => format!("{arch}:{tag}"),
        None => arch.to_string(),
    }
}

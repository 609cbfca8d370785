use std::env;
use std::path::Path;
use std::sync::Arc;

use gemm_rs::device::{DeviceProperties, KernelLauncher, Platform};
use gemm_rs::error::{DeviceError, DeviceResult};

use crate::launcher::HipLauncher;
use crate::runtime::{self, HipRuntime};
use crate::topology::{self, GpuAgent, ENV_ARCH, ENV_HSA_XNACK, KFD_TOPOLOGY_NODES};

/// HIP devices of this machine.
pub struct HipPlatform {
    runtime: Arc<HipRuntime>,
    agents: Vec<GpuAgent>,
    /// Target name forced through `GEMMRS_ARCH`.
    forced_target: Option<String>,
}

impl HipPlatform {
    /// Loads the HIP runtime and reads the KFD topology.
    pub fn new() -> DeviceResult<Self> {
        Self::with_topology(Path::new(KFD_TOPOLOGY_NODES))
    }

    pub fn with_topology(nodes: &Path) -> DeviceResult<Self> {
        let runtime = runtime::runtime()?;
        let agents = match topology::read_agents(nodes) {
            Ok(agents) => agents,
            Err(err) => {
                tracing::debug!(path = %nodes.display(), error = %err, "KFD topology unavailable");
                Vec::new()
            }
        };
        let forced_target = env::var(ENV_ARCH)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Ok(Self {
            runtime,
            agents,
            forced_target,
        })
    }

    pub fn runtime(&self) -> &Arc<HipRuntime> {
        &self.runtime
    }

    fn ordinal(device: usize) -> DeviceResult<i32> {
        i32::try_from(device).map_err(|_| DeviceError::device(format!("device {device} out of range")))
    }

    fn target(&self, device: usize) -> DeviceResult<(String, u32)> {
        let agent = self.agents.get(device);
        let compute_units = agent.map_or(0, |agent| agent.compute_units);
        if let Some(forced) = &self.forced_target {
            return Ok((forced.clone(), compute_units));
        }
        let agent = agent.ok_or_else(|| {
            DeviceError::device(format!(
                "no GPU agent for device {device} in the KFD topology; set {ENV_ARCH}"
            ))
        })?;
        let xnack = topology::xnack_from_env(env::var(ENV_HSA_XNACK).ok().as_deref());
        Ok((topology::target_name(&agent.arch, xnack), compute_units))
    }
}

impl Platform for HipPlatform {
    fn name(&self) -> &str {
        "hip"
    }

    fn device_count(&self) -> DeviceResult<usize> {
        self.runtime.device_count()
    }

    fn device_properties(&self, device: usize) -> DeviceResult<DeviceProperties> {
        let ordinal = Self::ordinal(device)?;
        let name = self.runtime.device_name(ordinal)?;
        let (target, compute_units) = self.target(device)?;
        tracing::debug!(device, %name, %target, compute_units, "queried HIP device");
        Ok(DeviceProperties::from_target_name(
            device,
            name,
            &target,
            compute_units,
        ))
    }

    fn new_launcher(&self, device: usize) -> DeviceResult<Box<dyn KernelLauncher>> {
        let ordinal = Self::ordinal(device)?;
        self.runtime.set_device(ordinal)?;
        Ok(Box::new(HipLauncher::new(Arc::clone(&self.runtime), ordinal)))
    }
}

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use gemm_rs::device::{DeviceProperties, KernelLauncher, Platform};
use gemm_rs::error::{DeviceError, DeviceResult};

use crate::launcher::{LaunchLog, RecordingLauncher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedDevice {
    pub name: String,
    /// Full target name, e.g. `gfx90a:sramecc+:xnack-`.
    pub target: String,
    pub compute_units: u32,
}

impl SimulatedDevice {
    pub fn new(target: impl Into<String>, compute_units: u32) -> Self {
        let target = target.into();
        Self {
            name: format!("Simulated {target}"),
            target,
            compute_units,
        }
    }
}

/// In-process platform with a fixed set of devices.
pub struct SimulatedPlatform {
    devices: Vec<SimulatedDevice>,
    log: Arc<LaunchLog>,
    init_delay: Option<Duration>,
    failing_launchers: HashSet<usize>,
    panicking_launchers: HashSet<usize>,
    enumeration_fails: bool,
    property_queries: AtomicUsize,
    launchers_created: AtomicUsize,
}

impl SimulatedPlatform {
    pub fn new(devices: Vec<SimulatedDevice>) -> Self {
        Self {
            devices,
            log: Arc::new(LaunchLog::default()),
            init_delay: None,
            failing_launchers: HashSet::new(),
            panicking_launchers: HashSet::new(),
            enumeration_fails: false,
            property_queries: AtomicUsize::new(0),
            launchers_created: AtomicUsize::new(0),
        }
    }

    /// One device with 104 compute units.
    pub fn single(target: &str) -> Self {
        Self::new(vec![SimulatedDevice::new(target, 104)])
    }

    /// Sleeps in every property query, widening the window for racing
    /// initializations.
    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = Some(delay);
        self
    }

    pub fn with_failing_launcher(mut self, device: usize) -> Self {
        self.failing_launchers.insert(device);
        self
    }

    pub fn with_panicking_launches(mut self, device: usize) -> Self {
        self.panicking_launchers.insert(device);
        self
    }

    pub fn with_failing_enumeration(mut self) -> Self {
        self.enumeration_fails = true;
        self
    }

    pub fn log(&self) -> &Arc<LaunchLog> {
        &self.log
    }

    pub fn property_queries(&self) -> usize {
        self.property_queries.load(Ordering::Acquire)
    }

    pub fn launchers_created(&self) -> usize {
        self.launchers_created.load(Ordering::Acquire)
    }

    fn device(&self, device: usize) -> DeviceResult<&SimulatedDevice> {
        self.devices
            .get(device)
            .ok_or_else(|| DeviceError::device(format!("no simulated device {device}")))
    }
}

impl Platform for SimulatedPlatform {
    fn name(&self) -> &str {
        "simulated"
    }

    fn device_count(&self) -> DeviceResult<usize> {
        if self.enumeration_fails {
            return Err(DeviceError::call("device_count", 100));
        }
        Ok(self.devices.len())
    }

    fn device_properties(&self, device: usize) -> DeviceResult<DeviceProperties> {
        self.property_queries.fetch_add(1, Ordering::AcqRel);
        if let Some(delay) = self.init_delay {
            thread::sleep(delay);
        }
        let simulated = self.device(device)?;
        Ok(DeviceProperties::from_target_name(
            device,
            simulated.name.clone(),
            &simulated.target,
            simulated.compute_units,
        ))
    }

    fn new_launcher(&self, device: usize) -> DeviceResult<Box<dyn KernelLauncher>> {
        self.device(device)?;
        if self.failing_launchers.contains(&device) {
            return Err(DeviceError::device(format!(
                "simulated launcher failure on device {device}"
            )));
        }
        self.launchers_created.fetch_add(1, Ordering::AcqRel);
        let launcher = RecordingLauncher::new(device, Arc::clone(&self.log));
        if self.panicking_launchers.contains(&device) {
            return Ok(Box::new(launcher.panicking()));
        }
        Ok(Box::new(launcher))
    }
}

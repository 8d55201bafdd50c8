//! Compute device for the local embedding model, chosen by `embedding.device`.
use anyhow::{anyhow, Result};
use candle_core::Device;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePreference {
    /// Metal when built with the `metal` feature and a GPU answers, else CPU.
    Auto,
    Cpu,
    /// Metal or an error; never silently falls back.
    Metal,
}

impl DevicePreference {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "metal" | "mps" => Ok(Self::Metal),
            other => Err(anyhow!("Unknown embedding device '{other}' (expected auto, cpu or metal)")),
        }
    }
}

pub fn select_device(preference: DevicePreference) -> Result<Device> {
    let device = match preference {
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Metal => metal().ok_or_else(|| anyhow!("Metal device requested but unavailable"))?,
        DevicePreference::Auto => metal().unwrap_or(Device::Cpu),
    };
    info!(device = if device.is_metal() { "metal" } else { "cpu" }, ?preference, "embedding device selected");
    Ok(device)
}

#[cfg(feature = "metal")]
fn metal() -> Option<Device> {
    match Device::new_metal(0) {
        Ok(dev) => Some(dev),
        Err(e) => {
            tracing::warn!(error = %e, "Metal device unavailable");
            None
        }
    }
}

#[cfg(not(feature = "metal"))]
fn metal() -> Option<Device> { None }

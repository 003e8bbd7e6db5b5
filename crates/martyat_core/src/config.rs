/*
    MartyPC
    https://github.com/dbalsom/martypc

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    ---------------------------------------------------------------------------

    config.rs

    Core configuration, deserialized from the [core] table of a TOML file.

*/
use serde_derive::{Deserialize, Serialize};

use crate::cpu_common::{CpuError, CpuType};

const fn _default_true() -> bool {
    true
}
const fn _default_frequency() -> u32 {
    8_000_000
}
const fn _default_ram_size() -> usize {
    0x10_0000
}
const fn _default_refresh_interval() -> f64 {
    15.085
}
const fn _default_refresh_penalty() -> u32 {
    4
}

/// What to do when the CPU fails to deliver a double fault.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TripleFaultPolicy {
    /// Stay in the SHUTDOWN activity state until an external reset.
    #[default]
    Shutdown,
    /// Reset the CPU, as an AT board does when it decodes the shutdown cycle.
    Reset,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RefreshConfig {
    #[serde(default = "_default_true")]
    pub enabled: bool,
    /// Refresh period in microseconds.
    #[serde(default = "_default_refresh_interval")]
    pub interval_us: f64,
    /// Cycles lost to a refresh cycle that lands on a bus-active instruction.
    #[serde(default = "_default_refresh_penalty")]
    pub penalty: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_us: _default_refresh_interval(),
            penalty: _default_refresh_penalty(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub cpu_type: CpuType,
    /// CPU clock in Hz.
    #[serde(default = "_default_frequency")]
    pub frequency: u32,
    #[serde(default = "_default_ram_size")]
    pub ram_size: usize,
    #[serde(default)]
    pub ram_wait_states: u32,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub trace: bool,
    #[serde(default)]
    pub on_triple_fault: TripleFaultPolicy,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            cpu_type: CpuType::default(),
            frequency: _default_frequency(),
            ram_size: _default_ram_size(),
            ram_wait_states: 0,
            refresh: RefreshConfig::default(),
            trace: false,
            on_triple_fault: TripleFaultPolicy::default(),
        }
    }
}

impl CoreConfig {
    pub fn from_toml(toml_str: &str) -> Result<Self, CpuError> {
        let config: CoreConfig = toml::from_str(toml_str).map_err(|e| CpuError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CpuError> {
        if self.ram_size == 0 || self.ram_size > 0x100_0000 || self.ram_size % 0x1000 != 0 {
            return Err(CpuError::ConfigError(format!(
                "ram_size must be a non-zero multiple of 4K no larger than 16M, got {:#X}",
                self.ram_size
            )));
        }
        if self.frequency == 0 {
            return Err(CpuError::ConfigError("frequency must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Length of a DRAM refresh period in CPU cycles.
    pub fn refresh_interval_cycles(&self) -> u64 {
        ((self.frequency as f64 * self.refresh.interval_us) / 1_000_000.0).round() as u64
    }
}

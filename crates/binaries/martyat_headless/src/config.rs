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

    Runner configuration. A TOML file supplies the core and runner settings, and
    command line arguments override them.

*/
use std::path::{Path, PathBuf};

use anyhow::Context;
use bpaf::Bpaf;
use serde_derive::Deserialize;

use martyat_core::{config::CoreConfig, cpu_common::CpuType};

const fn _default_cycles() -> u64 {
    10_000_000
}

#[derive(Clone, Debug, Deserialize)]
pub struct RunnerConfig {
    /// BIOS image mapped below 1MB and below 16MB.
    #[serde(default)]
    pub bios: Option<PathBuf>,
    #[serde(default = "_default_cycles")]
    pub cycles: u64,
    #[serde(default)]
    pub save_state: Option<PathBuf>,
    #[serde(default)]
    pub load_state: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            bios: None,
            cycles: _default_cycles(),
            save_state: None,
            load_state: None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConfigFileParams {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

#[derive(Debug, Bpaf)]
#[bpaf(options, version, generate(cli_args))]
pub struct CmdLineArgs {
    #[bpaf(long("config_file"))]
    pub config_file: Option<PathBuf>,

    /// Intel80286 or Intel80386SX
    #[bpaf(long)]
    pub cpu: Option<CpuType>,

    #[bpaf(long)]
    pub bios: Option<PathBuf>,

    /// Number of CPU cycles to run
    #[bpaf(long)]
    pub cycles: Option<u64>,

    #[bpaf(long("save_state"))]
    pub save_state: Option<PathBuf>,

    #[bpaf(long("load_state"))]
    pub load_state: Option<PathBuf>,

    /// Log every instruction at trace level
    #[bpaf(long, switch)]
    pub trace: bool,
}

impl ConfigFileParams {
    pub fn from_toml(toml_str: &str) -> Result<Self, anyhow::Error> {
        let params: ConfigFileParams = toml::from_str(toml_str)?;
        params.core.validate()?;
        Ok(params)
    }

    /// Command line arguments override config file arguments.
    pub fn overlay(&mut self, shell_args: CmdLineArgs) {
        if let Some(cpu) = shell_args.cpu {
            self.core.cpu_type = cpu;
        }
        if let Some(bios) = shell_args.bios {
            self.runner.bios = Some(bios);
        }
        if let Some(cycles) = shell_args.cycles {
            self.runner.cycles = cycles;
        }
        if let Some(save_state) = shell_args.save_state {
            self.runner.save_state = Some(save_state);
        }
        if let Some(load_state) = shell_args.load_state {
            self.runner.load_state = Some(load_state);
        }
        self.core.trace |= shell_args.trace;
    }
}

/// Read the configuration file named on the command line, or `default_path` if it exists, and
/// overlay the command line.
pub fn get_config<P>(default_path: P) -> Result<ConfigFileParams, anyhow::Error>
where
    P: AsRef<Path>,
{
    let shell_args: CmdLineArgs = cli_args().run();

    let mut params = match shell_args.config_file.as_ref() {
        Some(path) => {
            let toml_str =
                std::fs::read_to_string(path).with_context(|| format!("reading config file {}", path.display()))?;
            ConfigFileParams::from_toml(&toml_str)?
        }
        None if default_path.as_ref().exists() => {
            let toml_str = std::fs::read_to_string(default_path.as_ref())?;
            ConfigFileParams::from_toml(&toml_str)?
        }
        None => ConfigFileParams::default(),
    };
    log::debug!("toml_config: {:?}", params);

    params.overlay(shell_args);
    params.core.validate()?;
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cpu: Option<CpuType>, cycles: Option<u64>) -> CmdLineArgs {
        CmdLineArgs {
            config_file: None,
            cpu,
            bios: None,
            cycles,
            save_state: None,
            load_state: None,
            trace: true,
        }
    }

    #[test]
    fn test_parse_and_overlay() {
        let mut params = ConfigFileParams::from_toml(
            r#"
            [core]
            cpu_type = "Intel80286"
            ram_size = 0x100000

            [runner]
            bios = "bios/at.bin"
            cycles = 5000
            "#,
        )
        .unwrap();
        assert_eq!(params.runner.cycles, 5000);
        assert_eq!(params.runner.bios, Some(PathBuf::from("bios/at.bin")));

        params.overlay(args(Some(CpuType::Intel80386SX), None));
        assert_eq!(params.core.cpu_type, CpuType::Intel80386SX);
        assert_eq!(params.runner.cycles, 5000);
        assert!(params.core.trace);
    }

    #[test]
    fn test_defaults_without_file() {
        let params = ConfigFileParams::from_toml("").unwrap();
        assert_eq!(params.core.cpu_type, CpuType::Intel80286);
        assert_eq!(params.runner.cycles, _default_cycles());
        assert!(params.runner.bios.is_none());
    }

    #[test]
    fn test_bad_core_config_is_rejected() {
        assert!(ConfigFileParams::from_toml("[core]\nram_size = 0x123").is_err());
    }

    #[test]
    fn test_cpu_names() {
        assert_eq!("386sx".parse::<CpuType>().unwrap(), CpuType::Intel80386SX);
        assert_eq!("Intel80286".parse::<CpuType>().unwrap(), CpuType::Intel80286);
    }
}

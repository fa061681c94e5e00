use std::time::Duration;

use facet::Facet;

/// Bounds for a polling loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Facet)]
pub struct PollConfig {
    pub retries: u32,
    pub interval_ms: u32,
}

impl PollConfig {
    /// 200 ms budget for a firmware command.
    pub const COMMAND: Self = Self {
        retries: 10,
        interval_ms: 20,
    };
    /// 2 s budget for the patched firmware to come up.
    pub const BOOT: Self = Self {
        retries: 100,
        interval_ms: 20,
    };
    /// 500 ms for a DiSEqC message or burst to leave the FIFO.
    pub const DISEQC: Self = Self {
        retries: 500,
        interval_ms: 1,
    };

    pub fn interval(self) -> Duration {
        Duration::from_millis(self.interval_ms.into())
    }
}

/// One of the three on-chip PLLs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Facet)]
pub struct PllConfig {
    pub divr: u32,
    pub divf: u32,
    pub divq: u32,
    pub range: u32,
    pub divq2: u32,
    pub divq3: u32,
    pub enable2: u32,
    pub enable3: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Facet)]
pub struct BootConfig {
    /// Largest I2C message, address bytes included.
    pub max_frame: u32,
    pub sys_pll: PllConfig,
    pub mpeg_pll: PllConfig,
    pub adc_pll: PllConfig,
    pub dll_out_phase: u32,
    pub dll_rd_phase: u32,
    pub deglitch_mode: u32,
    /// Wait after strobing the PLL reset.
    pub pll_settle_ms: u32,
    pub command_poll: PollConfig,
    pub boot_poll: PollConfig,
    pub diseqc_poll: PollConfig,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            max_frame: dvbfw_io::DEFAULT_MAX_FRAME as u32,
            sys_pll: PllConfig {
                divr: 2,
                divf: 99,
                divq: 7,
                range: 1,
                divq2: 11,
                divq3: 13,
                enable2: 0,
                enable3: 0,
            },
            mpeg_pll: PllConfig {
                divr: 0,
                divf: 35,
                divq: 7,
                range: 3,
                divq2: 11,
                divq3: 13,
                enable2: 0,
                enable3: 0,
            },
            adc_pll: PllConfig {
                divr: 2,
                divf: 99,
                divq: 7,
                range: 1,
                divq2: 11,
                divq3: 13,
                enable2: 1,
                enable3: 1,
            },
            dll_out_phase: 96,
            dll_rd_phase: 0,
            deglitch_mode: 1,
            pll_settle_ms: 20,
            command_poll: PollConfig::COMMAND,
            boot_poll: PollConfig::BOOT,
            diseqc_poll: PollConfig::DISEQC,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid boot config: {0}")]
pub struct ConfigError(String);

impl BootConfig {
    /// Parse a complete config. Every field must be present.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        facet_json::from_str(json).map_err(|e| ConfigError(e.to_string()))
    }

    pub fn pll_settle(&self) -> Duration {
        Duration::from_millis(self.pll_settle_ms.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_overrides_defaults() {
        let json = r#"{
            "max_frame": 32,
            "sys_pll": {"divr": 2, "divf": 99, "divq": 7, "range": 1, "divq2": 11, "divq3": 13, "enable2": 0, "enable3": 0},
            "mpeg_pll": {"divr": 0, "divf": 35, "divq": 7, "range": 3, "divq2": 11, "divq3": 13, "enable2": 0, "enable3": 0},
            "adc_pll": {"divr": 2, "divf": 99, "divq": 7, "range": 1, "divq2": 11, "divq3": 13, "enable2": 1, "enable3": 1},
            "dll_out_phase": 96,
            "dll_rd_phase": 0,
            "deglitch_mode": 1,
            "pll_settle_ms": 20,
            "command_poll": {"retries": 5, "interval_ms": 1},
            "boot_poll": {"retries": 100, "interval_ms": 20},
            "diseqc_poll": {"retries": 500, "interval_ms": 1}
        }"#;
        let config = BootConfig::from_json(json).unwrap();
        assert_eq!(config.max_frame, 32);
        assert_eq!(
            config.command_poll,
            PollConfig {
                retries: 5,
                interval_ms: 1
            }
        );
        assert_eq!(config.sys_pll, BootConfig::default().sys_pll);
        assert_eq!(config.diseqc_poll, PollConfig::DISEQC);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(BootConfig::from_json("{\"max_frame\": \"big\"}").is_err());
    }
}

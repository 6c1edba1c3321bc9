//! Configuration loading (ambient stack, §9 "Configuration"): a TOML file
//! on disk, overridden field-by-field by CLI flags, producing the
//! `CoreConfig` the coordinator runs with and the `ZmqRfConfig` the radio
//! driver binds with.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use interfaces::zmq_rf::ZmqRfConfig;
use layers::coordinator::CoreConfig;

use crate::Args;

/// On-disk radio front-end settings; defaults mirror [`ZmqRfConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub rx_gain: i32,
    pub tx_gain: i32,
    pub frequency_hz: Option<f64>,
    pub tx_address: String,
    pub rx_address: String,
}

impl Default for RadioConfig {
    fn default() -> Self {
        let zmq = ZmqRfConfig::default();
        Self {
            rx_gain: 70,
            tx_gain: 0,
            frequency_hz: None,
            tx_address: zmq.tx_address,
            rx_address: zmq.rx_address,
        }
    }
}

/// On-disk core timing/link settings; defaults mirror [`CoreConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreFileConfig {
    pub dl_ul_shift_compensation: u8,
    pub reassembly_deadline_subframes: u64,
    pub tx_deadline_us: u64,
    pub slot_decode_deadline_us: u64,
}

impl Default for CoreFileConfig {
    fn default() -> Self {
        let core = CoreConfig::default();
        Self {
            dl_ul_shift_compensation: core.dl_ul_shift_compensation,
            reassembly_deadline_subframes: core.reassembly_deadline_subframes,
            tx_deadline_us: core.tx_deadline.as_micros() as u64,
            slot_decode_deadline_us: core.slot_decode_deadline.as_micros() as u64,
        }
    }
}

/// On-disk logging settings. `filter` is a `RUST_LOG`-style directive
/// string; the CLI's numeric `--log` flag, when given, overrides it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LogConfig {
    pub filter: Option<String>,
}

/// The full on-disk configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub radio: RadioConfig,
    pub core: CoreFileConfig,
    pub log: LogConfig,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }
}

/// The fully-resolved settings `main()` hands to the driver and the
/// coordinator, after CLI overrides have been applied on top of the file
/// (or the built-in defaults, if no `--config` was given).
pub struct EffectiveConfig {
    pub core: CoreConfig,
    pub radio: ZmqRfConfig,
    pub log_filter: String,
}

/// Map the original program's `0..5` numeric `--log` level onto a
/// `tracing` filter directive (§9 "Logging").
fn numeric_log_level(level: u8) -> &'static str {
    match level {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

/// Merge a loaded (or default) file config with CLI overrides into the
/// structs the rest of the binary consumes. CLI flags win field-by-field,
/// the way `--frequency` overrides a configured carrier frequency.
pub fn resolve(file: FileConfig, args: &Args) -> Result<EffectiveConfig> {
    let FileConfig { radio, core, log } = file;

    if !(0..=15).contains(&core.dl_ul_shift_compensation) {
        anyhow::bail!(
            "dl_ul_shift_compensation must be in 0..=15, got {}",
            core.dl_ul_shift_compensation
        );
    }

    let rx_gain = args.rxgain.unwrap_or(radio.rx_gain);
    let tx_gain = args.txgain.unwrap_or(radio.tx_gain);
    let frequency_hz = args.frequency.or(radio.frequency_hz);

    let core_config = CoreConfig {
        rx_gain,
        tx_gain,
        frequency_hz,
        dl_ul_shift_compensation: core.dl_ul_shift_compensation,
        reassembly_deadline_subframes: core.reassembly_deadline_subframes,
        tx_deadline: Duration::from_micros(core.tx_deadline_us),
        slot_decode_deadline: Duration::from_micros(core.slot_decode_deadline_us),
    };

    let radio_config = ZmqRfConfig {
        sample_rate: common::SAMPLE_RATE_HZ,
        tx_address: radio.tx_address,
        rx_address: radio.rx_address,
        tx_gain: tx_gain as f32,
        rx_gain: rx_gain as f32,
    };

    let log_filter = match args.log {
        Some(level) => numeric_log_level(level).to_string(),
        None => log.filter.unwrap_or_else(|| "info".to_string()),
    };

    Ok(EffectiveConfig {
        core: core_config,
        radio: radio_config,
        log_filter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_overrides() -> Args {
        Args {
            rxgain: None,
            txgain: None,
            frequency: None,
            config: None,
            log: None,
        }
    }

    #[test]
    fn defaults_round_trip_into_core_config() {
        let resolved = resolve(FileConfig::default(), &no_overrides()).unwrap();
        assert_eq!(resolved.core.rx_gain, 70);
        assert_eq!(resolved.log_filter, "info");
    }

    #[test]
    fn cli_gain_overrides_file_config() {
        let mut args = no_overrides();
        args.rxgain = Some(42);
        args.txgain = Some(-10);
        let resolved = resolve(FileConfig::default(), &args).unwrap();
        assert_eq!(resolved.core.rx_gain, 42);
        assert_eq!(resolved.core.tx_gain, -10);
        assert_eq!(resolved.radio.rx_gain, 42.0);
    }

    #[test]
    fn numeric_log_flag_overrides_file_filter() {
        let mut file = FileConfig::default();
        file.log.filter = Some("warn".to_string());
        let mut args = no_overrides();
        args.log = Some(4);
        let resolved = resolve(file, &args).unwrap();
        assert_eq!(resolved.log_filter, "trace");
    }

    #[test]
    fn out_of_range_shift_compensation_is_rejected() {
        let mut file = FileConfig::default();
        file.core.dl_ul_shift_compensation = 16;
        assert!(resolve(file, &no_overrides()).is_err());
    }
}

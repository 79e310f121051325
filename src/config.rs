use std::path::PathBuf;

use anyhow::{bail, Context};

use crate::serial::protocol::{MAX_CHANNELS, MAX_LEDS_PER_CHANNEL};

/// Process configuration, read from `SHOWRUNNER_*` environment variables.
/// Every knob has a documented default; invalid values are fatal at
/// startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub coords_file: PathBuf,
    pub animation_dir: PathBuf,
    pub control_file: PathBuf,
    pub initial_animation: String,
    pub serial_base: String,
    pub serial_baud: u32,
    pub leds_per_channel: usize,
    pub channels: usize,
    pub fps: u32,
    pub status_file: PathBuf,
    pub ws_listen: String,
    pub ws_eviction_age_secs: u64,
    pub ws_idle_timeout_secs: u64,
}

impl Config {
    fn default_coords_file() -> PathBuf {
        PathBuf::from("coordinates.txt")
    }
    fn default_animation_dir() -> PathBuf {
        PathBuf::from("animations")
    }
    fn default_control_file() -> PathBuf {
        PathBuf::from("animation.ctl")
    }
    fn default_initial_animation() -> String {
        "default.rhai".to_string()
    }
    fn default_serial_base() -> String {
        "/dev/ttyACM".to_string()
    }
    fn default_serial_baud() -> u32 {
        115_200
    }
    fn default_leds_per_channel() -> usize {
        200
    }
    fn default_channels() -> usize {
        8
    }
    fn default_fps() -> u32 {
        30
    }
    fn default_status_file() -> PathBuf {
        PathBuf::from("status.json")
    }
    fn default_ws_listen() -> String {
        "0.0.0.0:8080".to_string()
    }
    fn default_ws_eviction_age_secs() -> u64 {
        300
    }
    fn default_ws_idle_timeout_secs() -> u64 {
        30
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source (tests inject a map here).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let string = |name: &str, default: fn() -> String| -> String {
            lookup(name).unwrap_or_else(default)
        };
        let path = |name: &str, default: fn() -> PathBuf| -> PathBuf {
            lookup(name).map(PathBuf::from).unwrap_or_else(default)
        };

        let cfg = Self {
            coords_file: path("SHOWRUNNER_COORDS_FILE", Self::default_coords_file),
            animation_dir: path("SHOWRUNNER_ANIMATION_DIR", Self::default_animation_dir),
            control_file: path("SHOWRUNNER_CONTROL_FILE", Self::default_control_file),
            initial_animation: string(
                "SHOWRUNNER_INITIAL_ANIMATION",
                Self::default_initial_animation,
            ),
            serial_base: string("SHOWRUNNER_SERIAL_BASE", Self::default_serial_base),
            serial_baud: parse(&lookup, "SHOWRUNNER_SERIAL_BAUD", Self::default_serial_baud)?,
            leds_per_channel: parse(
                &lookup,
                "SHOWRUNNER_LEDS_PER_CHANNEL",
                Self::default_leds_per_channel,
            )?,
            channels: parse(&lookup, "SHOWRUNNER_CHANNELS", Self::default_channels)?,
            fps: parse(&lookup, "SHOWRUNNER_FPS", Self::default_fps)?,
            status_file: path("SHOWRUNNER_STATUS_FILE", Self::default_status_file),
            ws_listen: string("SHOWRUNNER_WS_LISTEN", Self::default_ws_listen),
            ws_eviction_age_secs: parse(
                &lookup,
                "SHOWRUNNER_WS_EVICTION_AGE",
                Self::default_ws_eviction_age_secs,
            )?,
            ws_idle_timeout_secs: parse(
                &lookup,
                "SHOWRUNNER_WS_IDLE_TIMEOUT",
                Self::default_ws_idle_timeout_secs,
            )?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.leds_per_channel == 0 || self.leds_per_channel > MAX_LEDS_PER_CHANNEL {
            bail!(
                "SHOWRUNNER_LEDS_PER_CHANNEL must be 1..={MAX_LEDS_PER_CHANNEL}, got {}",
                self.leds_per_channel
            );
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            bail!(
                "SHOWRUNNER_CHANNELS must be 1..={MAX_CHANNELS}, got {}",
                self.channels
            );
        }
        if self.fps == 0 || self.fps > 120 {
            bail!("SHOWRUNNER_FPS must be 1..=120, got {}", self.fps);
        }
        if self.serial_baud == 0 {
            bail!("SHOWRUNNER_SERIAL_BAUD must be positive");
        }
        if self.ws_idle_timeout_secs == 0 {
            bail!("SHOWRUNNER_WS_IDLE_TIMEOUT must be positive");
        }
        if self.initial_animation.trim().is_empty() {
            bail!("SHOWRUNNER_INITIAL_ANIMATION must not be empty");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None).expect("defaults are valid")
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: fn() -> T,
) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {name}: {raw:?}")),
        None => Ok(default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_are_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.coords_file, PathBuf::from("coordinates.txt"));
        assert_eq!(cfg.serial_base, "/dev/ttyACM");
        assert_eq!(cfg.serial_baud, 115_200);
        assert_eq!(cfg.leds_per_channel, 200);
        assert_eq!(cfg.channels, 8);
        assert_eq!(cfg.fps, 30);
        assert_eq!(cfg.ws_listen, "0.0.0.0:8080");
        assert_eq!(cfg.ws_eviction_age_secs, 300);
        assert_eq!(cfg.ws_idle_timeout_secs, 30);
    }

    #[test]
    fn environment_overrides_apply() {
        let cfg = from_map(&[
            ("SHOWRUNNER_CHANNELS", "2"),
            ("SHOWRUNNER_LEDS_PER_CHANNEL", "64"),
            ("SHOWRUNNER_FPS", "60"),
            ("SHOWRUNNER_SERIAL_BASE", "/dev/ttyUSB"),
        ])
        .unwrap();
        assert_eq!(cfg.channels, 2);
        assert_eq!(cfg.leds_per_channel, 64);
        assert_eq!(cfg.fps, 60);
        assert_eq!(cfg.serial_base, "/dev/ttyUSB");
    }

    #[test]
    fn out_of_range_values_are_fatal() {
        assert!(from_map(&[("SHOWRUNNER_CHANNELS", "9")]).is_err());
        assert!(from_map(&[("SHOWRUNNER_CHANNELS", "0")]).is_err());
        assert!(from_map(&[("SHOWRUNNER_LEDS_PER_CHANNEL", "201")]).is_err());
        assert!(from_map(&[("SHOWRUNNER_FPS", "121")]).is_err());
        assert!(from_map(&[("SHOWRUNNER_FPS", "0")]).is_err());
        assert!(from_map(&[("SHOWRUNNER_WS_IDLE_TIMEOUT", "0")]).is_err());
    }

    #[test]
    fn unparseable_values_are_fatal() {
        assert!(from_map(&[("SHOWRUNNER_FPS", "fast")]).is_err());
        assert!(from_map(&[("SHOWRUNNER_SERIAL_BAUD", "")]).is_err());
    }

    #[test]
    fn eviction_age_zero_is_allowed() {
        let cfg = from_map(&[("SHOWRUNNER_WS_EVICTION_AGE", "0")]).unwrap();
        assert_eq!(cfg.ws_eviction_age_secs, 0);
    }
}

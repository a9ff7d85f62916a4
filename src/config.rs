// ==============================================================================
// config.rs — SERVER CONFIGURATION (ENVIRONMENT VARIABLES)
// ==============================================================================
// DRIVE_BIND      listen address              default 0.0.0.0:9001
// DRIVE_TICK_HZ   simulation rate             default 60
// DRIVE_PROFILE   preset name or .json path   default sedan
// DRIVE_SEED      demo track seed             default 7
// DRIVE_RAIN      precipitation on/off        default off
// ==============================================================================

use std::net::SocketAddr;
use std::path::Path;

use thiserror::Error;

use crate::profile::{ProfileError, VehicleProfile};

pub const DEFAULT_BIND: &str = "0.0.0.0:9001";
pub const DEFAULT_TICK_HZ: u32 = 60;
pub const DEFAULT_PROFILE: &str = "sedan";
pub const DEFAULT_SEED: u64 = 7;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("unknown vehicle profile {0:?} (expected sedan, sports, truck or a .json path)")]
    UnknownProfile(String),
    #[error(transparent)]
    Profile(#[from] ProfileError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub tick_hz: u32,
    pub profile: String,
    pub seed: u64,
    pub precipitation: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 9001)),
            tick_hz: DEFAULT_TICK_HZ,
            profile: DEFAULT_PROFILE.to_string(),
            seed: DEFAULT_SEED,
            precipitation: false,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset keys take their default.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(value) = lookup("DRIVE_BIND") {
            cfg.bind = value.parse().map_err(|_| ConfigError::Invalid {
                var: "DRIVE_BIND",
                value: value.clone(),
                reason: "expected host:port",
            })?;
        }

        if let Some(value) = lookup("DRIVE_TICK_HZ") {
            cfg.tick_hz = match value.parse::<u32>() {
                Ok(hz) if (1..=1000).contains(&hz) => hz,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "DRIVE_TICK_HZ",
                        value,
                        reason: "expected an integer in 1..=1000",
                    });
                }
            };
        }

        if let Some(value) = lookup("DRIVE_PROFILE") {
            cfg.profile = value;
        }

        if let Some(value) = lookup("DRIVE_SEED") {
            cfg.seed = value.parse().map_err(|_| ConfigError::Invalid {
                var: "DRIVE_SEED",
                value: value.clone(),
                reason: "expected an unsigned integer",
            })?;
        }

        if let Some(value) = lookup("DRIVE_RAIN") {
            cfg.precipitation = match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => true,
                "0" | "false" | "off" | "no" | "" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "DRIVE_RAIN",
                        value,
                        reason: "expected on/off",
                    });
                }
            };
        }

        Ok(cfg)
    }

    pub fn tick_seconds(&self) -> f32 {
        1.0 / self.tick_hz as f32
    }

    /// Resolves `profile` to a validated vehicle profile.
    pub fn load_profile(&self) -> Result<VehicleProfile, ConfigError> {
        if let Some(profile) = VehicleProfile::preset(&self.profile) {
            return Ok(profile);
        }
        let path = Path::new(&self.profile);
        if path.extension().is_some_and(|ext| ext == "json") {
            return Ok(VehicleProfile::load(path)?);
        }
        Err(ConfigError::UnknownProfile(self.profile.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = ServerConfig::from_vars(vars(&[])).unwrap();
        assert_eq!(cfg, ServerConfig::default());
        assert_eq!(cfg.bind.to_string(), DEFAULT_BIND);
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = ServerConfig::from_vars(vars(&[
            ("DRIVE_BIND", "127.0.0.1:7000"),
            ("DRIVE_TICK_HZ", "120"),
            ("DRIVE_PROFILE", "truck"),
            ("DRIVE_SEED", "42"),
            ("DRIVE_RAIN", "on"),
        ]))
        .unwrap();
        assert_eq!(cfg.bind.port(), 7000);
        assert_eq!(cfg.tick_hz, 120);
        assert_eq!(cfg.seed, 42);
        assert!(cfg.precipitation);
        assert_eq!(cfg.load_profile().unwrap().name, "truck");
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = ServerConfig::from_vars(vars(&[("DRIVE_TICK_HZ", "0")])).unwrap_err();
        assert!(err.to_string().starts_with("DRIVE_TICK_HZ"));
        assert!(ServerConfig::from_vars(vars(&[("DRIVE_BIND", "nowhere")])).is_err());
        assert!(ServerConfig::from_vars(vars(&[("DRIVE_RAIN", "maybe")])).is_err());
    }

    #[test]
    fn unknown_profile_is_rejected() {
        let cfg = ServerConfig { profile: "hovercraft".into(), ..ServerConfig::default() };
        assert!(matches!(cfg.load_profile(), Err(ConfigError::UnknownProfile(_))));
        let missing = ServerConfig { profile: "/nonexistent/car.json".into(), ..ServerConfig::default() };
        assert!(matches!(missing.load_profile(), Err(ConfigError::Profile(ProfileError::Io(_)))));
    }
}

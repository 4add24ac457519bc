use serde_derive::{Deserialize, Serialize};
use std::env;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DOMAIN: &str = "heating_oil_level";

pub const DEFAULT_TANK_CAPACITY: f64 = 1000.0;
pub const DEFAULT_KWH_PER_LITRE: f64 = 10.35;
pub const TANK_CAPACITY_RANGE: RangeInclusive<f64> = 100.0..=10000.0;
pub const KWH_PER_LITRE_RANGE: RangeInclusive<f64> = 8.0..=12.0;

const DEFAULT_STORAGE_DIR: &str = ".storage";
const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("setting {name} has invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
    #[error("tank capacity {0} L is outside 100-10000 L")]
    TankCapacityOutOfRange(f64),
    #[error("conversion factor {0} kWh/L is outside 8.0-12.0 kWh/L")]
    KwhPerLitreOutOfRange(f64),
}

/// Tank parameters used by every estimation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TankConfig {
    tank_capacity_litres: f64,
    kwh_per_litre: f64,
}

impl Default for TankConfig {
    fn default() -> Self {
        Self {
            tank_capacity_litres: DEFAULT_TANK_CAPACITY,
            kwh_per_litre: DEFAULT_KWH_PER_LITRE,
        }
    }
}

impl TankConfig {
    pub fn new(tank_capacity_litres: f64, kwh_per_litre: f64) -> Result<Self, ConfigError> {
        if !TANK_CAPACITY_RANGE.contains(&tank_capacity_litres) {
            return Err(ConfigError::TankCapacityOutOfRange(tank_capacity_litres));
        }
        if !KWH_PER_LITRE_RANGE.contains(&kwh_per_litre) {
            return Err(ConfigError::KwhPerLitreOutOfRange(kwh_per_litre));
        }
        Ok(Self {
            tank_capacity_litres,
            kwh_per_litre,
        })
    }

    pub fn tank_capacity_litres(&self) -> f64 {
        self.tank_capacity_litres
    }

    pub fn kwh_per_litre(&self) -> f64 {
        self.kwh_per_litre
    }

    /// Applies later overrides on top of this config. Overrides win.
    pub fn with_options(&self, options: &ConfigOptions) -> Result<Self, ConfigError> {
        Self::new(
            options.tank_capacity.unwrap_or(self.tank_capacity_litres),
            options.kwh_per_litre.unwrap_or(self.kwh_per_litre),
        )
    }
}

/// Overrides set after the initial setup. Persisted next to the reading.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigOptions {
    #[serde(default)]
    pub tank_capacity: Option<f64>,
    #[serde(default)]
    pub kwh_per_litre: Option<f64>,
}

/// Everything the service needs to run, normally read from the environment
#[derive(Debug, Clone)]
pub struct Settings {
    pub ha_url: String,
    pub ha_token: String,
    pub energy_entity: String,
    pub reading_entity: Option<String>,
    pub instance_id: String,
    pub storage_dir: PathBuf,
    pub poll_interval: Duration,
    pub tank: TankConfig,
}

impl Settings {
    /// Settings for `energy_entity` with every other value at its default
    pub fn new(energy_entity: &str) -> Self {
        Self {
            ha_url: String::new(),
            ha_token: String::new(),
            energy_entity: energy_entity.to_string(),
            reading_entity: None,
            instance_id: default_instance_id(energy_entity),
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            tank: TankConfig::default(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let energy_entity = non_empty_var("OIL_ENERGY_ENTITY")
            .ok_or(ConfigError::Missing("OIL_ENERGY_ENTITY"))?;
        let mut settings = Self::new(&energy_entity);

        settings.ha_url = env::var("HA_URL").unwrap_or_default();
        settings.ha_token = env::var("HA_TOKEN").unwrap_or_default();
        settings.reading_entity = non_empty_var("OIL_READING_ENTITY");
        if let Some(instance_id) = non_empty_var("OIL_INSTANCE_ID") {
            settings.instance_id = instance_id;
        }
        if let Some(dir) = non_empty_var("OIL_STORAGE_DIR") {
            settings.storage_dir = PathBuf::from(dir);
        }
        if let Some(ms) = parse_var::<u64>("OIL_POLL_INTERVAL_MS")? {
            settings.poll_interval = Duration::from_millis(ms);
        }

        let tank_capacity = parse_var("OIL_TANK_CAPACITY")?.unwrap_or(DEFAULT_TANK_CAPACITY);
        let kwh_per_litre = parse_var("OIL_KWH_PER_LITRE")?.unwrap_or(DEFAULT_KWH_PER_LITRE);
        settings.tank = TankConfig::new(tank_capacity, kwh_per_litre)?;

        Ok(settings)
    }

    pub fn reading_storage_key(&self) -> String {
        format!("{DOMAIN}.storage_{}", self.instance_id)
    }

    pub fn options_storage_key(&self) -> String {
        format!("{DOMAIN}.options_{}", self.instance_id)
    }
}

fn default_instance_id(energy_entity: &str) -> String {
    format!("heating_oil_{energy_entity}")
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match non_empty_var(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

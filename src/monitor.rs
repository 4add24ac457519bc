use crate::config::TankConfig;
use crate::estimator::{self, Reading};
use crate::storage::{JsonStore, StorageError};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("reading {litres} L is outside 0-{capacity} L")]
    InvalidReading { litres: f64, capacity: f64 },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Derived values for one combination of config, reading and energy
#[derive(Debug, Clone, PartialEq)]
pub struct TankSnapshot {
    pub config: TankConfig,
    pub reading: Reading,
    pub current_energy: Option<f64>,
    pub oil_consumed: Option<f64>,
    pub current_level: Option<f64>,
    pub percentage: Option<f64>,
}

impl TankSnapshot {
    pub fn evaluate(config: TankConfig, reading: Reading, current_energy: Option<f64>) -> Self {
        let kwh_per_litre = config.kwh_per_litre();
        let oil_consumed = estimator::oil_consumed(&reading, current_energy, kwh_per_litre);
        let current_level = estimator::current_level(&reading, current_energy, kwh_per_litre);
        let percentage = estimator::percentage(current_level, config.tank_capacity_litres());

        Self {
            config,
            reading,
            current_energy,
            oil_consumed,
            current_level,
            percentage,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    ReadingRecorded(Reading),
    ValuesChanged(TankSnapshot),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn Fn(&MonitorEvent) + Send>;

/// Owns the tank state for one installation and tells listeners when it moves.
///
/// Every mutation goes through `&mut self`, so a single owner serialises updates.
pub struct TankMonitor {
    config: TankConfig,
    reading: Reading,
    current_energy: Option<f64>,
    store: JsonStore<Reading>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener_id: u64,
}

impl TankMonitor {
    /// Restores the last reading from `store`, or starts with no reading at all
    pub async fn load(config: TankConfig, store: JsonStore<Reading>) -> Result<Self, StorageError> {
        let reading = store.load().await?.unwrap_or_default();
        match reading.last_reading {
            Some(litres) => info!(
                "Restored oil reading {} L (energy baseline {:?} kWh)",
                litres, reading.energy_at_reading
            ),
            None => info!("No oil reading stored yet"),
        }

        Ok(Self {
            config,
            reading,
            current_energy: None,
            store,
            listeners: Vec::new(),
            next_listener_id: 0,
        })
    }

    pub fn config(&self) -> TankConfig {
        self.config
    }

    pub fn reading(&self) -> &Reading {
        &self.reading
    }

    pub fn snapshot(&self) -> TankSnapshot {
        TankSnapshot::evaluate(self.config, self.reading.clone(), self.current_energy)
    }

    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&MonitorEvent) + Send + 'static,
    {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns false if `id` was not subscribed
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    /// Takes a new energy meter value (`None` when the meter is unavailable)
    pub fn energy_changed(&mut self, current_energy: Option<f64>) {
        debug!("Energy meter now {:?} kWh", current_energy);
        self.current_energy = current_energy;
        self.notify(&MonitorEvent::ValuesChanged(self.snapshot()));
    }

    /// Stores a manual dip reading against the current energy value
    pub async fn record_reading(&mut self, litres: f64) -> Result<Reading, MonitorError> {
        let capacity = self.config.tank_capacity_litres();
        if !litres.is_finite() || litres < 0.0 || litres > capacity {
            return Err(MonitorError::InvalidReading { litres, capacity });
        }

        let reading = estimator::record_reading(litres, self.current_energy);
        self.store.save(&reading).await?;
        self.reading = reading.clone();

        info!(
            "Oil reading updated: {} L, energy baseline: {:?} kWh",
            litres, reading.energy_at_reading
        );

        self.notify(&MonitorEvent::ReadingRecorded(reading.clone()));
        self.notify(&MonitorEvent::ValuesChanged(self.snapshot()));
        Ok(reading)
    }

    pub fn reconfigure(&mut self, config: TankConfig) {
        info!(
            "Tank reconfigured: {} L, {} kWh/L",
            config.tank_capacity_litres(),
            config.kwh_per_litre()
        );
        self.config = config;
        self.notify(&MonitorEvent::ValuesChanged(self.snapshot()));
    }

    fn notify(&self, event: &MonitorEvent) {
        for (_, listener) in &self.listeners {
            listener(event);
        }
    }
}

use crate::config::{ConfigOptions, Settings, TankConfig};
use crate::entity_watcher::EntityWatcher;
use crate::estimator::Reading;
use crate::home_assistant::HomeAssistantAPI;
use crate::monitor::{MonitorEvent, TankMonitor};
use crate::sensor_publisher::SensorPublisher;
use crate::storage::JsonStore;
use anyhow::Context;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Something that happened upstream of the monitor
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorInput {
    /// The energy meter moved, or became unavailable
    EnergyChanged(Option<f64>),
    /// A user entered a new dip reading, in litres
    ManualReading(f64),
    /// Tank parameters were changed after setup
    Reconfigure(ConfigOptions),
}

/// Wires the watcher, the monitor and the publisher together for one tank.
///
/// The coordinator owns the monitor and applies inputs one at a time.
pub struct Coordinator {
    monitor: TankMonitor,
    base_config: TankConfig,
    options_store: JsonStore<ConfigOptions>,
    inputs: Receiver<MonitorInput>,
    input_sender: Option<Sender<MonitorInput>>,
}

impl Coordinator {
    /// Checks the energy entity, restores state and starts the worker tasks
    pub async fn setup(settings: Settings) -> anyhow::Result<Self> {
        info!("Setting up heating oil monitor {}", settings.instance_id);

        let ha_client = HomeAssistantAPI::new(&settings.ha_url, &settings.ha_token);
        ha_client
            .read_sensor_value(&settings.energy_entity)
            .await
            .with_context(|| format!("entity_not_found: {}", settings.energy_entity))?;

        let options_store: JsonStore<ConfigOptions> =
            JsonStore::new(&settings.storage_dir, &settings.options_storage_key());
        let options = options_store.load().await?.unwrap_or_default();
        let config = settings.tank.with_options(&options)?;

        let reading_store: JsonStore<Reading> =
            JsonStore::new(&settings.storage_dir, &settings.reading_storage_key());
        let mut monitor = TankMonitor::load(config, reading_store).await?;

        let (snapshot_tx, snapshot_rx) = watch::channel(monitor.snapshot());
        monitor.subscribe(move |event| {
            if let MonitorEvent::ValuesChanged(snapshot) = event {
                if snapshot_tx.send(snapshot.clone()).is_err() {
                    debug!("Sensor publisher is gone, dropping snapshot");
                }
            }
        });
        SensorPublisher::new(&settings.instance_id, ha_client.clone()).spawn(snapshot_rx);

        let (input_sender, inputs) = mpsc::channel::<MonitorInput>(32);
        let restored_reading = monitor.reading().last_reading;
        EntityWatcher::new(&settings, restored_reading, ha_client, input_sender.clone()).spawn();

        info!("Heating oil monitor ready");

        Ok(Self {
            monitor,
            base_config: settings.tank,
            options_store,
            inputs,
            input_sender: Some(input_sender),
        })
    }

    /// A handle for feeding inputs from outside the watcher.
    ///
    /// Only available before `run`.
    pub fn sender(&self) -> Option<Sender<MonitorInput>> {
        self.input_sender.clone()
    }

    pub fn monitor(&self) -> &TankMonitor {
        &self.monitor
    }

    /// Applies inputs until every sender is dropped
    pub async fn run(mut self) {
        // Only the watcher and handed out senders keep the loop alive
        self.input_sender = None;
        while let Some(input) = self.inputs.recv().await {
            self.handle(input).await;
        }
        info!("Heating oil monitor stopped");
    }

    async fn handle(&mut self, input: MonitorInput) {
        match input {
            MonitorInput::EnergyChanged(energy) => self.monitor.energy_changed(energy),
            MonitorInput::ManualReading(litres) => {
                if let Err(e) = self.monitor.record_reading(litres).await {
                    warn!("Manual reading of {} L not recorded: {}", litres, e);
                }
            }
            MonitorInput::Reconfigure(options) => {
                if let Err(e) = self.apply_options(options).await {
                    warn!("Options not applied: {:#}", e);
                }
            }
        }
    }

    async fn apply_options(&mut self, options: ConfigOptions) -> anyhow::Result<()> {
        let config = self.base_config.with_options(&options)?;
        self.options_store.save(&options).await?;
        self.monitor.reconfigure(config);
        Ok(())
    }
}

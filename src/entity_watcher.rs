use crate::config::Settings;
use crate::coordinator::MonitorInput;
use crate::home_assistant::{HASensor, HomeAssistantAPI};
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Polls the energy meter and manual reading entities and reports changes
pub struct EntityWatcher {
    energy_entity: String,
    reading_entity: Option<String>,
    poll_interval: Duration,
    update_sender: Sender<MonitorInput>,
    ha_client: HomeAssistantAPI,
    last_energy: Option<Option<f64>>,
    manual_reading_observed: bool,
    last_manual_reading: Option<f64>,
    last_manual_report: Option<String>,
}

impl EntityWatcher {
    /// `restored_reading` is the last reading the monitor has on record, so a
    /// dip entered while the service was down is still picked up.
    pub fn new(
        settings: &Settings,
        restored_reading: Option<f64>,
        ha_client: HomeAssistantAPI,
        update_sender: Sender<MonitorInput>,
    ) -> Self {
        info!(
            energy_entity = %settings.energy_entity,
            reading_entity = settings.reading_entity.as_deref().unwrap_or("none"),
            poll_interval_ms = settings.poll_interval.as_millis() as u64,
            restored_reading = ?restored_reading,
            "Entity watcher config"
        );

        Self {
            energy_entity: settings.energy_entity.clone(),
            reading_entity: settings.reading_entity.clone(),
            poll_interval: settings.poll_interval,
            update_sender,
            ha_client,
            last_energy: None,
            manual_reading_observed: false,
            last_manual_reading: restored_reading,
            last_manual_report: None,
        }
    }

    /// Spawns the watcher on its own task
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!("Starting entity watcher");

        let mut read_interval = interval(self.poll_interval);
        read_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            read_interval.tick().await;

            if let Err(e) = self.poll_once().await {
                info!("Monitor went away ({}), stopping entity watcher", e);
                return;
            }
        }
    }

    async fn poll_once(&mut self) -> Result<(), String> {
        let energy = match self.read_with_retry(&self.energy_entity.clone()).await {
            Ok(sensor) => sensor.numeric_state(),
            Err(e) => {
                warn!("Energy meter read error: {}", e);
                None
            }
        };
        if self.observe_energy(energy) {
            self.send(MonitorInput::EnergyChanged(energy)).await?;
        }

        let Some(reading_entity) = self.reading_entity.clone() else {
            return Ok(());
        };
        match self.read_with_retry(&reading_entity).await {
            Ok(sensor) => {
                if let Some(litres) = self.observe_manual_reading(&sensor) {
                    info!("New manual oil reading: {} litres", litres);
                    self.send(MonitorInput::ManualReading(litres)).await?;
                }
            }
            Err(e) => warn!("Manual reading entity read error: {}", e),
        }

        Ok(())
    }

    /// Records the energy value, returning true when it differs from the last one seen
    fn observe_energy(&mut self, energy: Option<f64>) -> bool {
        let previous = self.last_energy.replace(energy);
        previous != Some(energy)
    }

    /// Records the reading entity state and returns a newly entered value.
    ///
    /// A value counts as entered when it differs from the last one seen, or
    /// when the same value is reported again without the entity having been
    /// unavailable in between. On the first observation the value is compared
    /// against the restored reading; with nothing restored it is only a baseline.
    fn observe_manual_reading(&mut self, sensor: &HASensor) -> Option<f64> {
        let first = !std::mem::replace(&mut self.manual_reading_observed, true);

        let value = sensor.numeric_state();
        let report = value.and(submission_stamp(sensor));
        let previous_report = std::mem::replace(&mut self.last_manual_report, report);

        let litres = value?;
        let previous = self.last_manual_reading.replace(litres);
        let reported_again =
            previous_report.is_some() && previous_report != self.last_manual_report;

        let entered = if first {
            previous.is_some_and(|restored| restored != litres)
        } else {
            previous != Some(litres) || reported_again
        };
        entered.then_some(litres)
    }

    async fn send(&self, input: MonitorInput) -> Result<(), String> {
        debug!("Watcher sending {:?}", input);
        self.update_sender
            .send(input)
            .await
            .map_err(|e| e.to_string())
    }

    /// Reads an entity with automatic retry
    async fn read_with_retry(&self, entity_id: &str) -> Result<HASensor, String> {
        const MAX_RETRIES: u32 = 3;

        for attempt in 1..=MAX_RETRIES {
            match self.ha_client.read_sensor_value(entity_id).await {
                Ok(sensor) => return Ok(sensor),
                Err(e) => {
                    if attempt < MAX_RETRIES {
                        debug!("Read of {} attempt {} failed: {}. Retrying...", entity_id, attempt, e);
                        sleep(Duration::from_millis(200 * attempt as u64)).await;
                    } else {
                        return Err(format!(
                            "All {} attempts to read {} failed. Last error: {}",
                            MAX_RETRIES, entity_id, e
                        ));
                    }
                }
            }
        }

        unreachable!()
    }
}

/// When the entity state was last written, even with an unchanged value
fn submission_stamp(sensor: &HASensor) -> Option<String> {
    [&sensor.last_reported, &sensor.last_updated]
        .into_iter()
        .find(|stamp| !stamp.is_empty())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn watcher(ha_url: &str, reading_entity: Option<&str>) -> (EntityWatcher, mpsc::Receiver<MonitorInput>) {
        restored_watcher(ha_url, reading_entity, None)
    }

    fn restored_watcher(
        ha_url: &str,
        reading_entity: Option<&str>,
        restored_reading: Option<f64>,
    ) -> (EntityWatcher, mpsc::Receiver<MonitorInput>) {
        let (tx, rx) = mpsc::channel(32);
        let mut settings = Settings::new("sensor.boiler_energy");
        settings.reading_entity = reading_entity.map(str::to_string);
        settings.poll_interval = Duration::from_millis(10);
        let ha_client = HomeAssistantAPI::new(ha_url, "test_token");
        let watcher = EntityWatcher::new(&settings, restored_reading, ha_client, tx);
        (watcher, rx)
    }

    fn dip(state: &str, reported: &str) -> HASensor {
        HASensor {
            entity_id: "input_number.oil_dip".to_string(),
            state: state.to_string(),
            last_changed: String::new(),
            last_reported: reported.to_string(),
            last_updated: String::new(),
        }
    }

    #[test]
    fn test_observe_energy_reports_changes_only() {
        let (mut watcher, _rx) = watcher("", None);

        // First value always counts, including "unavailable"
        assert!(watcher.observe_energy(None));
        assert!(!watcher.observe_energy(None));
        assert!(watcher.observe_energy(Some(1000.0)));
        assert!(!watcher.observe_energy(Some(1000.0)));
        assert!(watcher.observe_energy(Some(1000.5)));
        assert!(watcher.observe_energy(None));
    }

    #[test]
    fn test_observe_manual_reading() {
        let (mut watcher, _rx) = watcher("", Some("input_number.oil_dip"));

        // Nothing restored, so the first value is only a baseline
        assert_eq!(watcher.observe_manual_reading(&dip("450", "")), None);
        assert_eq!(watcher.observe_manual_reading(&dip("450", "")), None);

        assert_eq!(watcher.observe_manual_reading(&dip("900", "")), Some(900.0));

        // Going unavailable and back to the same value is not a new reading
        assert_eq!(watcher.observe_manual_reading(&dip("unavailable", "")), None);
        assert_eq!(watcher.observe_manual_reading(&dip("900", "")), None);
        assert_eq!(watcher.observe_manual_reading(&dip("880", "")), Some(880.0));
    }

    #[test]
    fn test_observe_manual_reading_after_unknown_start() {
        let (mut watcher, _rx) = watcher("", Some("input_number.oil_dip"));

        assert_eq!(watcher.observe_manual_reading(&dip("unknown", "")), None);
        assert_eq!(watcher.observe_manual_reading(&dip("300", "")), Some(300.0));
    }

    #[test]
    fn test_observe_manual_reading_entered_while_stopped() {
        // 800 L on record, but the entity was set to 650 L while the service was down
        let (mut watcher, _rx) = restored_watcher("", Some("input_number.oil_dip"), Some(800.0));
        assert_eq!(
            watcher.observe_manual_reading(&dip("650", "2024-11-03T08:00:00+00:00")),
            Some(650.0)
        );
        assert_eq!(
            watcher.observe_manual_reading(&dip("650", "2024-11-03T08:00:00+00:00")),
            None
        );

        // Matching the record is not a new reading
        let (mut watcher, _rx) = restored_watcher("", Some("input_number.oil_dip"), Some(800.0));
        assert_eq!(
            watcher.observe_manual_reading(&dip("800", "2024-11-02T17:04:31+00:00")),
            None
        );
    }

    #[test]
    fn test_observe_manual_reading_same_value_entered_again() {
        let (mut watcher, _rx) = restored_watcher("", Some("input_number.oil_dip"), Some(500.0));

        assert_eq!(
            watcher.observe_manual_reading(&dip("500", "2024-11-02T17:04:31+00:00")),
            None
        );
        assert_eq!(
            watcher.observe_manual_reading(&dip("500", "2024-11-02T17:04:31+00:00")),
            None
        );
        // Same litres, written again later
        assert_eq!(
            watcher.observe_manual_reading(&dip("500", "2024-11-09T09:12:00+00:00")),
            Some(500.0)
        );

        // A fresh stamp after the entity was unavailable is a restore, not a dip
        assert_eq!(
            watcher.observe_manual_reading(&dip("unavailable", "2024-11-10T00:00:00+00:00")),
            None
        );
        assert_eq!(
            watcher.observe_manual_reading(&dip("500", "2024-11-10T00:00:05+00:00")),
            None
        );
    }

    #[tokio::test]
    async fn test_poll_once_records_same_value_reported_again() {
        let mut server = mockito::Server::new_async().await;
        let _energy = server
            .mock("GET", "/api/states/sensor.boiler_energy")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"entity_id": "sensor.boiler_energy", "state": "1000"}"#)
            .create();
        let first = server
            .mock("GET", "/api/states/input_number.oil_dip")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"entity_id": "input_number.oil_dip", "state": "500", "last_reported": "2024-11-02T17:04:31+00:00"}"#,
            )
            .expect(1)
            .create();

        let (mut watcher, mut rx) =
            restored_watcher(&server.url(), Some("input_number.oil_dip"), Some(500.0));
        watcher.poll_once().await.unwrap();
        assert_eq!(rx.try_recv().unwrap(), MonitorInput::EnergyChanged(Some(1000.0)));
        assert!(rx.try_recv().is_err());
        first.assert();
        first.remove();

        let _again = server
            .mock("GET", "/api/states/input_number.oil_dip")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"entity_id": "input_number.oil_dip", "state": "500", "last_reported": "2024-11-09T09:12:00+00:00"}"#,
            )
            .create();
        watcher.poll_once().await.unwrap();
        assert_eq!(rx.try_recv().unwrap(), MonitorInput::ManualReading(500.0));
    }

    #[tokio::test]
    async fn test_poll_once_sends_energy() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/states/sensor.boiler_energy")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"entity_id": "sensor.boiler_energy", "state": "1234.5"}"#)
            .expect(2)
            .create();

        let (mut watcher, mut rx) = watcher(&server.url(), None);
        watcher.poll_once().await.unwrap();
        watcher.poll_once().await.unwrap();

        match rx.try_recv() {
            Ok(MonitorInput::EnergyChanged(energy)) => assert_eq!(energy, Some(1234.5)),
            other => panic!("Expected EnergyChanged, got {:?}", other),
        }
        // Unchanged value is not sent twice
        assert!(rx.try_recv().is_err());
        mock.assert();
    }

    #[tokio::test]
    async fn test_poll_once_unreachable_meter_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/states/sensor.boiler_energy")
            .with_status(500)
            .expect(3)
            .create();

        let (mut watcher, mut rx) = watcher(&server.url(), None);
        watcher.poll_once().await.unwrap();

        match rx.try_recv() {
            Ok(MonitorInput::EnergyChanged(energy)) => assert_eq!(energy, None),
            other => panic!("Expected EnergyChanged, got {:?}", other),
        }
    }
}

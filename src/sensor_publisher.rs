use crate::home_assistant::HomeAssistantAPI;
use crate::monitor::TankSnapshot;
use crate::sensors::{self, SensorState};
use std::collections::HashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Writes derived sensor states to Home Assistant, skipping unchanged ones
pub struct SensorPublisher {
    instance_id: String,
    ha_client: HomeAssistantAPI,
    published: HashMap<String, SensorState>,
}

impl SensorPublisher {
    pub fn new(instance_id: &str, ha_client: HomeAssistantAPI) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            ha_client,
            published: HashMap::new(),
        }
    }

    /// Publishes every snapshot that lands in `snapshots` until the sender is gone
    pub fn spawn(mut self, mut snapshots: watch::Receiver<TankSnapshot>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Starting sensor publisher");

            // The value the channel was created with counts as already seen
            let initial = snapshots.borrow_and_update().clone();
            self.publish(&initial).await;

            while snapshots.changed().await.is_ok() {
                let snapshot = snapshots.borrow_and_update().clone();
                self.publish(&snapshot).await;
            }

            info!("Sensor publisher exiting");
        })
    }

    /// Returns how many entity states were written
    pub async fn publish(&mut self, snapshot: &TankSnapshot) -> usize {
        let mut written = 0;

        for state in sensors::render(&self.instance_id, snapshot) {
            if self.published.get(&state.entity_id) == Some(&state) {
                continue;
            }

            match self
                .ha_client
                .set_state(&state.entity_id, &state.state, &state.attributes)
                .await
            {
                Ok(()) => {
                    debug!("Published {} = {}", state.entity_id, state.state);
                    self.published.insert(state.entity_id.clone(), state);
                    written += 1;
                }
                // Left out of `published` so the next snapshot retries it
                Err(e) => warn!("Failed to publish {}: {}", state.entity_id, e),
            }
        }

        written
    }
}

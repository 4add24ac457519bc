use serde_derive::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// States Home Assistant reports when an entity has no usable value
const UNUSABLE_STATES: [&str; 2] = ["unknown", "unavailable"];

#[derive(Clone)]
pub struct HomeAssistantAPI {
    endpoint_url: String,
    auth_token: String,
    client: reqwest::Client,
}

impl HomeAssistantAPI {
    pub fn new(endpoint_url: &str, auth_token: &str) -> Self {
        Self {
            endpoint_url: endpoint_url.trim_end_matches('/').to_string(),
            auth_token: auth_token.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub async fn read_sensor_value(&self, entity_id: &str) -> Result<HASensor, anyhow::Error> {
        if self.endpoint_url.is_empty() {
            anyhow::bail!("No HA connection");
        }
        let result = self
            .client
            .get(self.state_url(entity_id))
            .bearer_auth(&self.auth_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(result)
    }

    /// Creates or replaces the state of `entity_id`
    pub async fn set_state(
        &self,
        entity_id: &str,
        state: &str,
        attributes: &Map<String, Value>,
    ) -> Result<(), anyhow::Error> {
        if self.endpoint_url.is_empty() {
            anyhow::bail!("No HA connection");
        }
        self.client
            .post(self.state_url(entity_id))
            .bearer_auth(&self.auth_token)
            .json(&StateUpdate { state, attributes })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn state_url(&self, entity_id: &str) -> String {
        format!("{}/api/states/{}", self.endpoint_url, entity_id)
    }
}

#[derive(Serialize)]
struct StateUpdate<'a> {
    state: &'a str,
    attributes: &'a Map<String, Value>,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HASensor {
    #[serde(rename = "entity_id")]
    pub entity_id: String,
    pub state: String,
    #[serde(rename = "last_changed", default)]
    pub last_changed: String,
    #[serde(rename = "last_reported", default)]
    pub last_reported: String,
    #[serde(rename = "last_updated", default)]
    pub last_updated: String,
}

impl HASensor {
    /// The state as a number, or `None` when it is unknown, unavailable or not numeric
    pub fn numeric_state(&self) -> Option<f64> {
        parse_numeric_state(&self.state)
    }
}

pub fn parse_numeric_state(state: &str) -> Option<f64> {
    let state = state.trim();
    if UNUSABLE_STATES.contains(&state) {
        return None;
    }
    state.parse::<f64>().ok().filter(|value| value.is_finite())
}

use crate::config::MeterEndpoint;
use crate::error::{BridgeError, Result};
use serde_derive::{Deserialize, Serialize};
use tracing::trace;

/// Thin HTTP client for the Shelly EM `/status` document.
pub struct ShellyEmClient {
    endpoint: MeterEndpoint,
    client: reqwest::Client,
}

impl ShellyEmClient {
    pub fn new(endpoint: MeterEndpoint) -> Self {
        Self {
            endpoint,
            client: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> &MeterEndpoint {
        &self.endpoint
    }

    /// Issues one GET against the status endpoint. No retries; the poll loop
    /// decides what to do with a failure.
    pub async fn fetch_reading(&self) -> Result<RawMeterReading> {
        // Credentials in the URL authority are sent as basic auth by reqwest.
        let response = self
            .client
            .get(self.endpoint.url().clone())
            .send()
            .await
            .map_err(|e| {
                BridgeError::MeterUnreachable(format!(
                    "no response from Shelly EM - {}: {}",
                    self.endpoint,
                    e.without_url()
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::MeterUnreachable(format!(
                "Shelly EM - {} answered with {status}",
                self.endpoint
            )));
        }

        let body = response.text().await.map_err(|e| {
            BridgeError::InvalidResponse(format!("reading body failed: {}", e.without_url()))
        })?;
        trace!(bytes = body.len(), "status document received");

        parse_status_document(&body)
    }
}

/// Decodes a `/status` body. Empty, `null`, `{}` and `[]` documents are
/// rejected the same way a malformed body is.
pub fn parse_status_document(body: &str) -> Result<RawMeterReading> {
    if body.trim().is_empty() {
        return Err(BridgeError::InvalidResponse("empty body".to_string()));
    }

    let document: serde_json::Value = serde_json::from_str(body).map_err(|e| {
        BridgeError::InvalidResponse(format!("converting response to JSON failed: {e}"))
    })?;

    let is_empty = match &document {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        _ => false,
    };
    if is_empty {
        return Err(BridgeError::InvalidResponse(
            "status document is empty".to_string(),
        ));
    }

    serde_json::from_value(document)
        .map_err(|e| BridgeError::InvalidResponse(format!("unexpected status document: {e}")))
}

/// The subset of the Shelly EM status document this bridge reads.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMeterReading {
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub emeters: Vec<EmeterChannel>,
}

impl RawMeterReading {
    /// The meter's MAC, unless missing or blank.
    pub fn device_identifier(&self) -> Option<&str> {
        self.mac.as_deref().filter(|mac| !mac.trim().is_empty())
    }
}

/// One measuring channel. `total` and `total_returned` are cumulative
/// watt-hour counters.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmeterChannel {
    pub voltage: f64,
    pub power: f64,
    pub total: f64,
    pub total_returned: f64,
}

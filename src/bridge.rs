use crate::attribute_store::{
    register_measurement_paths, AttributeStore, AttributeValue, MemoryAttributeStore,
};
use crate::config::ConfigSnapshot;
use crate::error::{BridgeError, Result};
use crate::heartbeat::{next_heartbeat, HeartbeatReporter, HeartbeatSummary};
use crate::poll_scheduler::{poll_interval, PollScheduler};
use crate::shelly_em_client::ShellyEmClient;
use std::future::Future;
use tracing::info;

pub const PRODUCT_NAME: &str = "Shelly EM";
pub const CONNECTION: &str = "Shelly EM HTTP JSON service";
// Announced as an ET340 energy meter
pub const PRODUCT_ID: i64 = 45069;
pub const DEVICE_TYPE: i64 = 345;
const FIRMWARE_VERSION: f64 = 0.1;
const HARDWARE_VERSION: i64 = 0;

/// Wires the meter client, the attribute store, the poll loop and the
/// heartbeat together and runs them on one event loop.
pub struct MeterBridge {
    scheduler: PollScheduler<MemoryAttributeStore>,
    heartbeat: HeartbeatReporter,
    heartbeats_sent: u64,
    last_heartbeat: Option<HeartbeatSummary>,
    serial: String,
}

impl MeterBridge {
    /// Derives the device identity with one blocking fetch, then registers
    /// every path. Any failure here is fatal; no timer is armed yet.
    pub async fn start(config: &ConfigSnapshot) -> Result<Self> {
        info!(
            service = %config.service_name(),
            endpoint = %config.endpoint,
            channel = config.channel,
            "Starting Shelly EM bridge"
        );

        let client = ShellyEmClient::new(config.endpoint.clone());
        let serial = derive_identity(&client).await?;
        info!(serial = %serial, "Meter identified");

        let mut store = MemoryAttributeStore::new(config.service_name());
        register_device_paths(&mut store, config, &serial)?;
        register_measurement_paths(&mut store)?;

        Ok(Self {
            scheduler: PollScheduler::new(client, config.channel, store),
            heartbeat: HeartbeatReporter::new(config.heartbeat_interval_minutes),
            heartbeats_sent: 0,
            last_heartbeat: None,
            serial,
        })
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn scheduler(&self) -> &PollScheduler<MemoryAttributeStore> {
        &self.scheduler
    }

    /// Replaces the reporter built from the config. Takes effect on the
    /// next `run_until`.
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatReporter) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn heartbeats_sent(&self) -> u64 {
        self.heartbeats_sent
    }

    pub fn last_heartbeat(&self) -> Option<&HeartbeatSummary> {
        self.last_heartbeat.as_ref()
    }

    /// Runs the poll and heartbeat timers until `shutdown` resolves.
    /// Handlers are awaited inline, so neither ever overlaps the other or
    /// itself.
    pub async fn run_until<F>(mut self, shutdown: F) -> Self
    where
        F: Future<Output = ()>,
    {
        let mut poll_ticker = poll_interval();
        let mut heartbeat_ticker = self.heartbeat.interval();
        tokio::pin!(shutdown);

        info!(
            heartbeat = ?self.heartbeat.period(),
            "Connected, switching over to the poll loop"
        );

        loop {
            // Heartbeat before poll: with a slow meter the poll timer is due
            // on every pass.
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = next_heartbeat(&mut heartbeat_ticker) => {
                    let summary = self
                        .heartbeat
                        .report(self.scheduler.store(), self.scheduler.state());
                    self.heartbeats_sent += 1;
                    self.last_heartbeat = Some(summary);
                }
                _ = poll_ticker.tick() => {
                    self.scheduler.tick().await;
                }
            }
        }

        self
    }
}

/// The meter's MAC, used as the stable serial on the bus.
pub async fn derive_identity(client: &ShellyEmClient) -> Result<String> {
    let reading = client.fetch_reading().await?;
    reading
        .device_identifier()
        .map(str::to_string)
        .ok_or(BridgeError::IdentityUnavailable)
}

/// Management and identity paths, all read-only.
pub fn register_device_paths<S: AttributeStore>(
    store: &mut S,
    config: &ConfigSnapshot,
    serial: &str,
) -> Result<()> {
    let paths = [
        (
            "/Mgmt/ProcessName",
            AttributeValue::Text(env!("CARGO_PKG_NAME").to_string()),
        ),
        (
            "/Mgmt/ProcessVersion",
            AttributeValue::Text(env!("CARGO_PKG_VERSION").to_string()),
        ),
        ("/Mgmt/Connection", AttributeValue::Text(CONNECTION.to_string())),
        (
            "/DeviceInstance",
            AttributeValue::Int(config.device_instance.into()),
        ),
        ("/ProductId", AttributeValue::Int(PRODUCT_ID)),
        ("/DeviceType", AttributeValue::Int(DEVICE_TYPE)),
        ("/ProductName", AttributeValue::Text(PRODUCT_NAME.to_string())),
        ("/CustomName", AttributeValue::Text(config.custom_name.clone())),
        ("/Latency", AttributeValue::Empty),
        ("/FirmwareVersion", AttributeValue::Float(FIRMWARE_VERSION)),
        ("/HardwareVersion", AttributeValue::Int(HARDWARE_VERSION)),
        ("/Connected", AttributeValue::Int(1)),
        ("/Role", AttributeValue::Text(config.role.as_str().to_string())),
        ("/Position", AttributeValue::Int(config.ac_position.into())),
        ("/Serial", AttributeValue::Text(serial.to_string())),
    ];

    for (path, value) in paths {
        store.register(path, value, false)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(host: &str) -> ConfigSnapshot {
        ConfigSnapshot::from_toml_str(&format!(
            r#"
            [default]
            device_instance = 41
            custom_name = "Garage"
            channel = 0
            role = "grid"
            ac_position = 2
            sign_of_life_log = 0
            access_type = "OnPremise"

            [onpremise]
            host = "{host}"
            "#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_start_registers_device_paths() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/status")
            .with_status(200)
            .with_body(
                r#"{"mac":"AA:BB:CC:DD:EE:FF","emeters":[{"voltage":230.0,"power":460.0,"total":1000,"total_returned":50}]}"#,
            )
            .create_async()
            .await;

        let bridge = MeterBridge::start(&config_for(&server.host_with_port()))
            .await
            .unwrap();
        let store = bridge.scheduler().store();

        assert_eq!(bridge.serial(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(store.service_name(), "com.victronenergy.grid.http_41");
        assert_eq!(
            store.get("/Serial"),
            Some(AttributeValue::Text("AA:BB:CC:DD:EE:FF".to_string()))
        );
        assert_eq!(store.get("/DeviceInstance"), Some(AttributeValue::Int(41)));
        assert_eq!(store.get("/ProductId"), Some(AttributeValue::Int(45069)));
        assert_eq!(store.get("/DeviceType"), Some(AttributeValue::Int(345)));
        assert_eq!(store.get("/Position"), Some(AttributeValue::Int(2)));
        assert_eq!(
            store.get("/Role"),
            Some(AttributeValue::Text("grid".to_string()))
        );
        assert_eq!(
            store.get("/CustomName"),
            Some(AttributeValue::Text("Garage".to_string()))
        );
        assert_eq!(store.get("/Latency"), Some(AttributeValue::Empty));
        assert_eq!(store.get("/Connected"), Some(AttributeValue::Int(1)));
        assert_eq!(store.get("/UpdateIndex"), Some(AttributeValue::Int(0)));
        assert_eq!(store.get("/Ac/Power"), Some(AttributeValue::Float(0.0)));
        // 15 device paths, 10 measurements, the update index
        assert_eq!(store.len(), 26);
        // No poll has happened yet
        assert_eq!(bridge.scheduler().state().successful_polls, 0);
    }

    #[tokio::test]
    async fn test_start_fails_without_mac() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/status")
            .with_status(200)
            .with_body(
                r#"{"emeters":[{"voltage":230.0,"power":460.0,"total":1000,"total_returned":50}]}"#,
            )
            .create_async()
            .await;

        let result = MeterBridge::start(&config_for(&server.host_with_port())).await;
        assert!(matches!(result, Err(BridgeError::IdentityUnavailable)));
    }

    #[tokio::test]
    async fn test_start_fails_when_meter_unreachable() {
        let result = MeterBridge::start(&config_for("127.0.0.1:1")).await;
        assert!(matches!(result, Err(BridgeError::MeterUnreachable(_))));
    }

    #[test]
    fn test_device_paths_are_read_only() {
        let config = config_for("10.0.0.2");
        let mut store = MemoryAttributeStore::new(config.service_name());
        register_device_paths(&mut store, &config, "AA:BB").unwrap();

        assert!(!store.write_external("/Serial", AttributeValue::Text("x".into())));
        assert_eq!(
            store.get("/Serial"),
            Some(AttributeValue::Text("AA:BB".to_string()))
        );
        assert_eq!(store.text("/FirmwareVersion").as_deref(), Some("0.1"));
    }
}

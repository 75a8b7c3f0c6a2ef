use crate::error::{BridgeError, Result};
use std::{collections::HashMap, fmt};
use tracing::debug;

pub const UPDATE_INDEX_PATH: &str = "/UpdateIndex";

/// Measurement paths the bridge writes on every successful poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributePath {
    EnergyForward,
    EnergyReverse,
    Power,
    Current,
    Voltage,
    L1Voltage,
    L1Current,
    L1Power,
    L1EnergyForward,
    L1EnergyReverse,
}

/// How a measurement path is rendered for humans: fixed decimals plus unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayFormat {
    pub unit: &'static str,
    pub decimals: usize,
}

const KWH: DisplayFormat = DisplayFormat {
    unit: "kWh",
    decimals: 2,
};
const WATTS: DisplayFormat = DisplayFormat {
    unit: "W",
    decimals: 1,
};
const AMPS: DisplayFormat = DisplayFormat {
    unit: "A",
    decimals: 1,
};
const VOLTS: DisplayFormat = DisplayFormat {
    unit: "V",
    decimals: 1,
};

impl DisplayFormat {
    pub fn render(&self, value: f64) -> String {
        format!("{:.*}{}", self.decimals, value, self.unit)
    }
}

impl AttributePath {
    pub const ALL: [AttributePath; 10] = [
        AttributePath::EnergyForward,
        AttributePath::EnergyReverse,
        AttributePath::Power,
        AttributePath::Current,
        AttributePath::Voltage,
        AttributePath::L1Voltage,
        AttributePath::L1Current,
        AttributePath::L1Power,
        AttributePath::L1EnergyForward,
        AttributePath::L1EnergyReverse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttributePath::EnergyForward => "/Ac/Energy/Forward",
            AttributePath::EnergyReverse => "/Ac/Energy/Reverse",
            AttributePath::Power => "/Ac/Power",
            AttributePath::Current => "/Ac/Current",
            AttributePath::Voltage => "/Ac/Voltage",
            AttributePath::L1Voltage => "/Ac/L1/Voltage",
            AttributePath::L1Current => "/Ac/L1/Current",
            AttributePath::L1Power => "/Ac/L1/Power",
            AttributePath::L1EnergyForward => "/Ac/L1/Energy/Forward",
            AttributePath::L1EnergyReverse => "/Ac/L1/Energy/Reverse",
        }
    }

    pub fn display_format(&self) -> DisplayFormat {
        match self {
            AttributePath::EnergyForward
            | AttributePath::EnergyReverse
            | AttributePath::L1EnergyForward
            | AttributePath::L1EnergyReverse => KWH,
            AttributePath::Power | AttributePath::L1Power => WATTS,
            AttributePath::Current | AttributePath::L1Current => AMPS,
            AttributePath::Voltage | AttributePath::L1Voltage => VOLTS,
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == path)
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Empty,
    Int(i64),
    Float(f64),
    Text(String),
}

impl AttributeValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(v) => Some(*v as f64),
            AttributeValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Empty => f.write_str("---"),
            AttributeValue::Int(v) => write!(f, "{v}"),
            AttributeValue::Float(v) => write!(f, "{v}"),
            AttributeValue::Text(v) => f.write_str(v),
        }
    }
}

/// Path-keyed attribute store the bridge publishes into.
///
/// Implementations sit in front of the energy-management bus. `publish`
/// must apply a whole batch or nothing, so a failing tick never leaves a
/// half-updated snapshot behind.
pub trait AttributeStore {
    fn register(&mut self, path: &str, initial: AttributeValue, writeable: bool) -> Result<()>;

    fn publish(&mut self, updates: &[(&str, AttributeValue)]) -> Result<()>;

    fn get(&self, path: &str) -> Option<AttributeValue>;

    /// A write coming from another bus client. Accepted on writeable paths
    /// only; returns whether it was applied.
    fn write_external(&mut self, path: &str, value: AttributeValue) -> bool;
}

/// Registers every measurement path (writeable, initial 0) and the
/// read-only update index.
pub fn register_measurement_paths<S: AttributeStore>(store: &mut S) -> Result<()> {
    for path in AttributePath::ALL {
        store.register(path.as_str(), AttributeValue::Float(0.0), true)?;
    }
    store.register(UPDATE_INDEX_PATH, AttributeValue::Int(0), false)
}

#[derive(Debug, Clone)]
struct Entry {
    value: AttributeValue,
    writeable: bool,
}

/// In-process attribute store, used by the binary and the tests.
#[derive(Debug, Clone)]
pub struct MemoryAttributeStore {
    service_name: String,
    entries: HashMap<String, Entry>,
}

impl MemoryAttributeStore {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            entries: HashMap::new(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Human-readable value; measurement paths use their unit table.
    pub fn text(&self, path: &str) -> Option<String> {
        let value = self.get(path)?;
        match (AttributePath::from_path(path), value.as_f64()) {
            (Some(attribute), Some(v)) => Some(attribute.display_format().render(v)),
            _ => Some(value.to_string()),
        }
    }
}

impl AttributeStore for MemoryAttributeStore {
    fn register(&mut self, path: &str, initial: AttributeValue, writeable: bool) -> Result<()> {
        if self.entries.contains_key(path) {
            return Err(BridgeError::PublishFailure(format!(
                "{path} is already registered on {}",
                self.service_name
            )));
        }
        self.entries.insert(
            path.to_string(),
            Entry {
                value: initial,
                writeable,
            },
        );
        Ok(())
    }

    fn publish(&mut self, updates: &[(&str, AttributeValue)]) -> Result<()> {
        if let Some((path, _)) = updates
            .iter()
            .find(|(path, _)| !self.entries.contains_key(*path))
        {
            return Err(BridgeError::PublishFailure(format!(
                "{path} is not registered on {}",
                self.service_name
            )));
        }

        for (path, value) in updates {
            if let Some(entry) = self.entries.get_mut(*path) {
                entry.value = value.clone();
            }
        }
        Ok(())
    }

    fn get(&self, path: &str) -> Option<AttributeValue> {
        self.entries.get(path).map(|entry| entry.value.clone())
    }

    fn write_external(&mut self, path: &str, value: AttributeValue) -> bool {
        match self.entries.get_mut(path) {
            Some(entry) if entry.writeable => {
                debug!("someone else updated {path} to {value}");
                entry.value = value;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_measurements() -> MemoryAttributeStore {
        let mut store = MemoryAttributeStore::new("com.victronenergy.grid.http_40");
        register_measurement_paths(&mut store).unwrap();
        store
    }

    #[test]
    fn test_path_table() {
        assert_eq!(AttributePath::ALL.len(), 10);
        for path in AttributePath::ALL {
            assert_eq!(AttributePath::from_path(path.as_str()), Some(path));
        }
        assert_eq!(AttributePath::from_path("/Ac/L2/Power"), None);
        assert_eq!(AttributePath::L1EnergyReverse.to_string(), "/Ac/L1/Energy/Reverse");
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(AttributePath::Power.display_format().render(460.04), "460.0W");
        assert_eq!(AttributePath::L1Current.display_format().render(2.0), "2.0A");
        assert_eq!(AttributePath::Voltage.display_format().render(229.96), "230.0V");
        assert_eq!(
            AttributePath::EnergyReverse.display_format().render(0.05),
            "0.05kWh"
        );
        assert_eq!(
            AttributePath::L1EnergyForward.display_format().render(1234.567),
            "1234.57kWh"
        );
    }

    #[test]
    fn test_publish_and_read_back() {
        let mut store = store_with_measurements();
        store
            .publish(&[
                ("/Ac/Power", AttributeValue::Float(460.0)),
                (UPDATE_INDEX_PATH, AttributeValue::Int(1)),
            ])
            .unwrap();

        assert_eq!(store.get("/Ac/Power"), Some(AttributeValue::Float(460.0)));
        assert_eq!(store.get(UPDATE_INDEX_PATH).and_then(|v| v.as_i64()), Some(1));
        assert_eq!(store.text("/Ac/Power").as_deref(), Some("460.0W"));
        assert_eq!(store.text(UPDATE_INDEX_PATH).as_deref(), Some("1"));
        assert_eq!(store.get("/Ac/L2/Power"), None);
    }

    #[test]
    fn test_publish_is_all_or_nothing() {
        let mut store = store_with_measurements();
        let result = store.publish(&[
            ("/Ac/Power", AttributeValue::Float(460.0)),
            ("/Ac/L2/Power", AttributeValue::Float(1.0)),
        ]);

        assert!(matches!(result, Err(BridgeError::PublishFailure(_))));
        assert_eq!(store.get("/Ac/Power"), Some(AttributeValue::Float(0.0)));
    }

    #[test]
    fn test_duplicate_registration() {
        let mut store = store_with_measurements();
        let result = store.register("/Ac/Power", AttributeValue::Float(1.0), true);
        assert!(matches!(result, Err(BridgeError::PublishFailure(_))));
        assert_eq!(store.len(), 11);
    }

    #[test]
    fn test_external_writes() {
        let mut store = store_with_measurements();
        assert!(store.write_external("/Ac/Power", AttributeValue::Float(12.0)));
        assert_eq!(store.get("/Ac/Power"), Some(AttributeValue::Float(12.0)));

        assert!(!store.write_external(UPDATE_INDEX_PATH, AttributeValue::Int(99)));
        assert_eq!(store.get(UPDATE_INDEX_PATH), Some(AttributeValue::Int(0)));

        assert!(!store.write_external("/Unknown", AttributeValue::Int(1)));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(AttributeValue::Empty.to_string(), "---");
        assert_eq!(AttributeValue::Text("grid".into()).to_string(), "grid");
        assert_eq!(AttributeValue::Int(45069).to_string(), "45069");
        assert_eq!(AttributeValue::Float(0.1).to_string(), "0.1");
    }
}

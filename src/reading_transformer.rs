use crate::attribute_store::{AttributePath, AttributeValue};
use crate::error::{BridgeError, Result};
use crate::shelly_em_client::RawMeterReading;

/// Electrical quantities for the selected channel, in bus units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedMeasurement {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub energy_forward: f64,
    pub energy_reverse: f64,
}

impl NormalizedMeasurement {
    /// Path/value pairs for one publish: the L1 values and their aggregate
    /// mirrors. The meter only ever reports one active phase, so the
    /// aggregate view carries identical numbers.
    pub fn attribute_updates(&self) -> Vec<(AttributePath, AttributeValue)> {
        let per_phase = [
            (AttributePath::L1Voltage, AttributePath::Voltage, self.voltage),
            (AttributePath::L1Current, AttributePath::Current, self.current),
            (AttributePath::L1Power, AttributePath::Power, self.power),
            (
                AttributePath::L1EnergyForward,
                AttributePath::EnergyForward,
                self.energy_forward,
            ),
            (
                AttributePath::L1EnergyReverse,
                AttributePath::EnergyReverse,
                self.energy_reverse,
            ),
        ];

        let mut updates = Vec::with_capacity(per_phase.len() * 2);
        for (phase_path, _, value) in per_phase {
            updates.push((phase_path, AttributeValue::Float(value)));
        }
        for (_, aggregate_path, value) in per_phase {
            updates.push((aggregate_path, AttributeValue::Float(value)));
        }
        updates
    }
}

/// Converts one channel of a raw status document.
///
/// Current is derived as `power / voltage` with no guard: a meter reporting
/// 0 V yields an infinite current (NaN when power is 0 too), which is
/// published as-is.
pub fn transform(reading: &RawMeterReading, channel: usize) -> Result<NormalizedMeasurement> {
    let emeter = reading
        .emeters
        .get(channel)
        .ok_or(BridgeError::ChannelOutOfRange {
            channel,
            available: reading.emeters.len(),
        })?;

    Ok(NormalizedMeasurement {
        voltage: emeter.voltage,
        current: emeter.power / emeter.voltage,
        power: emeter.power,
        energy_forward: emeter.total / 1000.0,
        energy_reverse: emeter.total_returned / 1000.0,
    })
}

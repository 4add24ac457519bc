use chrono::{Local, NaiveDateTime};
use serde_derive::{Deserialize, Serialize};

/// The last manual oil measurement and the energy meter value at that moment.
///
/// A `Reading` with every field absent means no measurement was ever recorded.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(default)]
    pub last_reading: Option<f64>,
    #[serde(default)]
    pub last_reading_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub energy_at_reading: Option<f64>,
}

/// Builds a fresh reading stamped with the current local time.
///
/// `current_energy_reading` is absent when the meter could not be read; the
/// level then stays at `current_reading_litres` until a new reading is taken.
pub fn record_reading(current_reading_litres: f64, current_energy_reading: Option<f64>) -> Reading {
    Reading {
        last_reading: Some(current_reading_litres),
        last_reading_date: Some(Local::now().naive_local()),
        energy_at_reading: current_energy_reading,
    }
}

/// Litres burnt since the reading, or `None` when either energy value is unknown.
pub fn oil_consumed(
    reading: &Reading,
    current_energy_reading: Option<f64>,
    kwh_per_litre: f64,
) -> Option<f64> {
    let baseline = reading.energy_at_reading?;
    let current = current_energy_reading?;

    // A meter reset shows up as a negative delta
    let energy_used = (current - baseline).max(0.0);

    Some(round_to(energy_used / kwh_per_litre, 2))
}

/// Estimated litres left in the tank.
///
/// Falls back to the manual reading unchanged when consumption can't be computed.
pub fn current_level(
    reading: &Reading,
    current_energy_reading: Option<f64>,
    kwh_per_litre: f64,
) -> Option<f64> {
    let last_reading = reading.last_reading?;

    match oil_consumed(reading, current_energy_reading, kwh_per_litre) {
        None => Some(last_reading),
        Some(consumed) => Some(round_to(last_reading - consumed, 2).max(0.0)),
    }
}

/// Fill percentage in `[0, 100]`, rounded to one decimal.
pub fn percentage(current_level: Option<f64>, tank_capacity_litres: f64) -> Option<f64> {
    let level = current_level?;
    let percentage = level / tank_capacity_litres * 100.0;
    Some(round_to(percentage.clamp(0.0, 100.0), 1))
}

/// Rounds the exact binary value to `places` decimals, ties to even.
///
/// Fixed-precision formatting rounds the exact value, unlike `(v * 10^n).round()`
/// whose multiply can land on a half that was not there.
fn round_to(value: f64, places: usize) -> f64 {
    let rounded = format!("{:.*}", places, value).parse().unwrap_or(value);
    // "-0.00" parses to -0.0
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

//! Telemetry snapshot types for Helion
//!
//! A [`SystemStateSnapshot`] is captured once per evaluation tick and
//! treated as immutable for all consumers of that tick, so the warning
//! monitor and the decision engine never see inconsistent reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable electrical state captured from the inverter telemetry feed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemStateSnapshot {
    /// Battery state of charge in percent
    pub battery_soc: Option<f64>,

    /// Photovoltaic production in watts
    pub pv_power: Option<f64>,

    /// House load in watts
    pub load: Option<f64>,

    /// Grid import/export power in watts
    pub grid_power: Option<f64>,

    /// Grid voltage in volts
    pub grid_voltage: Option<f64>,

    /// When this snapshot was captured
    pub timestamp: DateTime<Utc>,
}

impl SystemStateSnapshot {
    /// Look up a telemetry field by its wire name.
    ///
    /// Returns `None` for unknown names and for fields absent from the
    /// underlying message, which callers treat as "skip this rule".
    pub fn field(&self, name: &str) -> Option<f64> {
        match name {
            "battery_soc" => self.battery_soc,
            "pv_power" => self.pv_power,
            "load" => self.load,
            "grid_power" => self.grid_power,
            "grid_voltage" => self.grid_voltage,
            _ => None,
        }
    }

    /// Parse a snapshot from a telemetry bus message
    pub fn from_message(payload: &serde_json::Value, timestamp: DateTime<Utc>) -> Self {
        let num = |key: &str| payload.get(key).and_then(serde_json::Value::as_f64);
        Self {
            battery_soc: num("battery_soc"),
            pv_power: num("pv_power"),
            load: num("load"),
            grid_power: num("grid_power"),
            grid_voltage: num("grid_voltage"),
            timestamp,
        }
    }
}

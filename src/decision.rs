//! Charging decision engine for Helion
//!
//! The decision is a pure function of the telemetry snapshot, the
//! current price signal, and the battery configuration, evaluated in a
//! fixed priority order. Publication is edge-triggered: only a change
//! in mode relative to the last published decision reaches the command
//! publisher, and a learner-mode gate can suppress publication entirely
//! while still computing and logging every decision.

use crate::config::PriceConfig;
use crate::logging::get_logger;
use crate::price::PriceLevel;
use crate::telemetry::SystemStateSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Grid voltage band considered stable, in volts
const GRID_VOLTAGE_MIN: f64 = 200.0;
const GRID_VOLTAGE_MAX: f64 = 250.0;

/// PV production below this is treated as "no solar" (inverter idle noise)
const PV_IDLE_FLOOR_W: f64 = 50.0;

/// Whether to start or stop grid charging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeAction {
    StartCharging,
    StopCharging,
}

/// Abstract inverter charging mode; translated per inverter family
/// by the command publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeMode {
    SolarFirst,
    SolarOnly,
    UtilityFirst,
    SolarBatteryUtility,
    SolarAndUtility,
    SolarUtilityBattery,
}

impl ChargeMode {
    /// Wire value for modern-vocabulary inverters
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SolarFirst => "Solar first",
            Self::SolarOnly => "Solar only",
            Self::UtilityFirst => "Utility first",
            Self::SolarBatteryUtility => "Solar/Battery/Utility",
            Self::SolarAndUtility => "Solar and utility simultaneously",
            Self::SolarUtilityBattery => "Solar/Utility/Battery",
        }
    }

    /// Whether this mode implies the grid is not used for charging
    pub fn excludes_grid_charge(&self) -> bool {
        matches!(
            self,
            Self::SolarFirst | Self::SolarOnly | Self::SolarBatteryUtility
        )
    }
}

/// Price signal as seen by the engine at one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceSignal {
    /// Level of the current price point, when a forecast is available
    pub level: Option<PriceLevel>,
    /// Verdict of the provider's `is_price_good` for the current point
    pub acceptable: bool,
}

impl PriceSignal {
    /// Signal used when no price data is available: never acceptable
    pub fn unavailable() -> Self {
        Self {
            level: None,
            acceptable: false,
        }
    }
}

/// Echo of the inputs a decision was computed from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionConditions {
    pub pv_power: Option<f64>,
    pub load: Option<f64>,
    pub price_level: Option<PriceLevel>,
    pub battery_soc: Option<f64>,
    pub grid_voltage: Option<f64>,
}

/// One computed charging decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingDecision {
    #[serde(rename = "decision")]
    pub action: ChargeAction,
    pub mode: ChargeMode,
    pub reason: String,
    pub conditions: DecisionConditions,
    pub timestamp: DateTime<Utc>,
}

/// Compute a charging decision from one tick's inputs.
///
/// Pure: identical `(snapshot, price, config)` always yield an
/// identical decision for a given `now`.
pub fn evaluate(
    snapshot: &SystemStateSnapshot,
    price: &PriceSignal,
    config: &PriceConfig,
    now: DateTime<Utc>,
) -> ChargingDecision {
    let conditions = DecisionConditions {
        pv_power: snapshot.pv_power,
        load: snapshot.load,
        price_level: price.level,
        battery_soc: snapshot.battery_soc,
        grid_voltage: snapshot.grid_voltage,
    };
    let decide = |action, mode, reason: String| ChargingDecision {
        action,
        mode,
        reason,
        conditions: conditions.clone(),
        timestamp: now,
    };

    // 1. Safety override: full battery or unstable grid always wins
    if let Some(soc) = snapshot.battery_soc
        && soc >= config.target_soc
    {
        return decide(
            ChargeAction::StopCharging,
            ChargeMode::SolarFirst,
            format!("Battery at {:.0}% >= target {:.0}%", soc, config.target_soc),
        );
    }
    if let Some(voltage) = snapshot.grid_voltage
        && !(GRID_VOLTAGE_MIN..=GRID_VOLTAGE_MAX).contains(&voltage)
    {
        return decide(
            ChargeAction::StopCharging,
            ChargeMode::SolarFirst,
            format!("Grid voltage {:.0}V outside stable band", voltage),
        );
    }

    let pv = snapshot.pv_power.unwrap_or(0.0);
    let load = snapshot.load.unwrap_or(0.0);
    let soc = snapshot.battery_soc.unwrap_or(0.0);

    // 2. Strong solar surplus: charge from solar alone
    if pv > load * 2.0 && soc < 90.0 {
        return decide(
            ChargeAction::StartCharging,
            ChargeMode::SolarOnly,
            format!("PV {:.0}W more than double load {:.0}W", pv, load),
        );
    }

    // 3. No solar: charge from grid only while the price is acceptable
    if pv < PV_IDLE_FLOOR_W {
        if price.acceptable {
            return decide(
                ChargeAction::StartCharging,
                ChargeMode::UtilityFirst,
                "No solar and price acceptable".to_string(),
            );
        }
        return decide(
            ChargeAction::StopCharging,
            ChargeMode::SolarBatteryUtility,
            "No solar and price unacceptable, avoiding grid draw".to_string(),
        );
    }

    // 4. Some solar, not strong
    if price.acceptable {
        return decide(
            ChargeAction::StartCharging,
            ChargeMode::SolarAndUtility,
            "Partial solar and price acceptable".to_string(),
        );
    }
    if soc < 50.0 {
        return decide(
            ChargeAction::StartCharging,
            ChargeMode::SolarUtilityBattery,
            format!("Partial solar, battery low at {:.0}%", soc),
        );
    }

    // 5. Default: nothing matched
    decide(
        ChargeAction::StopCharging,
        ChargeMode::SolarFirst,
        "No charging rule matched".to_string(),
    )
}

/// Tracks published decisions and applies the edge-trigger and
/// learner-mode gates
pub struct DecisionEngine {
    last_published: Option<ChargeMode>,
    active_control: bool,
    logger: crate::logging::StructuredLogger,
}

impl DecisionEngine {
    /// Create a new engine; `active_control = false` is learner mode
    pub fn new(active_control: bool) -> Self {
        Self {
            last_published: None,
            active_control,
            logger: get_logger("decision"),
        }
    }

    /// Toggle active control at runtime
    pub fn set_active_control(&mut self, active: bool) {
        self.active_control = active;
        self.logger.info(&format!(
            "Active control {}",
            if active { "enabled" } else { "disabled (learner mode)" }
        ));
    }

    pub fn active_control(&self) -> bool {
        self.active_control
    }

    /// Mode of the last decision actually handed to the publisher
    pub fn last_published_mode(&self) -> Option<ChargeMode> {
        self.last_published
    }

    /// Process one computed decision.
    ///
    /// Every decision is logged. Returns the decision when it should be
    /// published: mode changed relative to the last published decision
    /// and the engine is in active control.
    pub fn step(&mut self, decision: ChargingDecision) -> Option<ChargingDecision> {
        match serde_json::to_string(&decision) {
            Ok(record) => self.logger.info(&format!("Decision: {}", record)),
            Err(e) => self
                .logger
                .warn(&format!("Decision record serialization failed: {}", e)),
        }

        if self.last_published == Some(decision.mode) {
            self.logger.debug("Mode unchanged, publication suppressed");
            return None;
        }

        if !self.active_control {
            self.logger
                .info("Learner mode: decision computed but not published");
            return None;
        }

        self.last_published = Some(decision.mode);
        Some(decision)
    }
}

use chrono::Utc;
use helion::config::PriceConfig;
use helion::decision::{
    ChargeAction, ChargeMode, DecisionEngine, PriceSignal, evaluate,
};
use helion::price::PriceLevel;
use helion::telemetry::SystemStateSnapshot;

fn snapshot(soc: f64, pv: f64, load: f64, voltage: f64) -> SystemStateSnapshot {
    SystemStateSnapshot {
        battery_soc: Some(soc),
        pv_power: Some(pv),
        load: Some(load),
        grid_power: Some(0.0),
        grid_voltage: Some(voltage),
        timestamp: Utc::now(),
    }
}

fn cheap() -> PriceSignal {
    PriceSignal {
        level: Some(PriceLevel::Cheap),
        acceptable: true,
    }
}

fn expensive() -> PriceSignal {
    PriceSignal {
        level: Some(PriceLevel::Expensive),
        acceptable: false,
    }
}

#[test]
fn sunny_surplus_charges_from_solar_alone() {
    let d = evaluate(
        &snapshot(60.0, 3000.0, 1000.0, 230.0),
        &expensive(),
        &PriceConfig::default(),
        Utc::now(),
    );
    assert_eq!(d.action, ChargeAction::StartCharging);
    assert_eq!(d.mode, ChargeMode::SolarOnly);
}

#[test]
fn night_with_cheap_price_charges_from_grid() {
    let d = evaluate(
        &snapshot(40.0, 0.0, 500.0, 230.0),
        &cheap(),
        &PriceConfig::default(),
        Utc::now(),
    );
    assert_eq!(d.action, ChargeAction::StartCharging);
    assert_eq!(d.mode, ChargeMode::UtilityFirst);
}

#[test]
fn night_with_expensive_price_avoids_grid_draw() {
    let d = evaluate(
        &snapshot(40.0, 0.0, 500.0, 230.0),
        &expensive(),
        &PriceConfig::default(),
        Utc::now(),
    );
    assert_eq!(d.action, ChargeAction::StopCharging);
    assert_eq!(d.mode, ChargeMode::SolarBatteryUtility);
}

#[test]
fn full_battery_wins_over_cheap_price() {
    let d = evaluate(
        &snapshot(85.0, 0.0, 500.0, 230.0),
        &cheap(),
        &PriceConfig::default(), // target_soc 80
        Utc::now(),
    );
    assert_eq!(d.action, ChargeAction::StopCharging);
    assert_eq!(d.mode, ChargeMode::SolarFirst);
}

#[test]
fn unstable_grid_stops_charging() {
    let d = evaluate(
        &snapshot(40.0, 0.0, 500.0, 190.0),
        &cheap(),
        &PriceConfig::default(),
        Utc::now(),
    );
    assert_eq!(d.action, ChargeAction::StopCharging);
    assert_eq!(d.mode, ChargeMode::SolarFirst);
}

#[test]
fn repeated_identical_decisions_publish_once() {
    let mut engine = DecisionEngine::new(true);
    let config = PriceConfig::default();
    let now = Utc::now();

    let first = evaluate(&snapshot(40.0, 0.0, 500.0, 230.0), &cheap(), &config, now);
    assert!(engine.step(first.clone()).is_some());

    // Same mode again: suppressed
    for _ in 0..5 {
        let again = evaluate(&snapshot(40.0, 0.0, 500.0, 230.0), &cheap(), &config, now);
        assert!(engine.step(again).is_none());
    }

    // Price turns expensive: mode changes, publish fires again
    let changed = evaluate(&snapshot(40.0, 0.0, 500.0, 230.0), &expensive(), &config, now);
    assert_eq!(changed.mode, ChargeMode::SolarBatteryUtility);
    assert!(engine.step(changed).is_some());
}

#[test]
fn learner_mode_never_publishes() {
    let mut engine = DecisionEngine::new(false);
    let config = PriceConfig::default();
    let now = Utc::now();

    let d = evaluate(&snapshot(40.0, 0.0, 500.0, 230.0), &cheap(), &config, now);
    assert!(engine.step(d.clone()).is_none());
    assert!(engine.step(d).is_none());
}

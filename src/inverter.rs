//! Inverter command translation and publishing for Helion
//!
//! A charging decision's abstract mode is translated into the wire
//! vocabulary of each configured inverter family and handed to the
//! injected transport. Legacy units only understand a boolean grid
//! charge switch; modern units take a charger/output source priority
//! pair; hybrid units receive both vocabularies.

use crate::decision::{ChargeMode, ChargingDecision};
use crate::error::Result;
use crate::logging::get_logger;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Inverter command vocabulary family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InverterType {
    Legacy,
    Modern,
    Hybrid,
}

/// Capability to hand a command to the external message bus
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()>;
}

/// One (parameter, value) pair bound for an inverter command topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub parameter: &'static str,
    pub value: &'static str,
}

fn legacy_commands(mode: ChargeMode) -> Vec<Command> {
    vec![Command {
        parameter: "grid_charge",
        value: if mode.excludes_grid_charge() {
            "Disabled"
        } else {
            "Enabled"
        },
    }]
}

fn modern_commands(mode: ChargeMode) -> Vec<Command> {
    let charger = match mode {
        ChargeMode::SolarFirst => "Solar first",
        ChargeMode::SolarOnly | ChargeMode::SolarBatteryUtility => "Solar only",
        ChargeMode::UtilityFirst => "Utility first",
        ChargeMode::SolarAndUtility | ChargeMode::SolarUtilityBattery => {
            "Solar and utility simultaneously"
        }
    };
    let output = match mode {
        ChargeMode::SolarFirst | ChargeMode::SolarOnly | ChargeMode::SolarAndUtility => {
            "Solar first"
        }
        ChargeMode::UtilityFirst => "Utility first",
        ChargeMode::SolarBatteryUtility => "Solar/Battery/Utility",
        ChargeMode::SolarUtilityBattery => "Solar/Utility/Battery",
    };
    vec![
        Command {
            parameter: "charger_source_priority",
            value: charger,
        },
        Command {
            parameter: "output_source_priority",
            value: output,
        },
    ]
}

/// Translate an abstract mode into the commands for one inverter family
pub fn translate(mode: ChargeMode, kind: InverterType) -> Vec<Command> {
    match kind {
        InverterType::Legacy => legacy_commands(mode),
        InverterType::Modern => modern_commands(mode),
        InverterType::Hybrid => {
            let mut commands = legacy_commands(mode);
            commands.extend(modern_commands(mode));
            commands
        }
    }
}

/// Outcome of publishing one decision across all configured inverters
#[derive(Debug, Clone, Default)]
pub struct PublishReport {
    /// Topics successfully handed to the transport
    pub published: Vec<String>,
    /// Inverter indices that failed, with the failure message
    pub failures: Vec<(u32, String)>,
}

/// Publishes translated decisions to all configured inverters
pub struct CommandPublisher {
    topic_prefix: String,
    profiles: Vec<crate::config::InverterConfig>,
    transport: Arc<dyn Transport>,
    logger: crate::logging::StructuredLogger,
}

impl CommandPublisher {
    /// Create a new publisher over the injected transport
    pub fn new(
        topic_prefix: String,
        profiles: Vec<crate::config::InverterConfig>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            topic_prefix,
            profiles,
            transport,
            logger: get_logger("commands"),
        }
    }

    fn topic(&self, index: u32, parameter: &str) -> String {
        format!("{}/inverter_{}/{}/set", self.topic_prefix, index, parameter)
    }

    /// Publish a decision to every configured inverter.
    ///
    /// A failure on one inverter is recorded and does not block the
    /// remaining inverters.
    pub async fn publish_decision(&self, decision: &ChargingDecision) -> PublishReport {
        let mut report = PublishReport::default();

        for profile in &self.profiles {
            let mut failed = false;
            for command in translate(decision.mode, profile.kind) {
                let topic = self.topic(profile.index, command.parameter);
                match self.transport.publish(&topic, command.value).await {
                    Ok(()) => {
                        self.logger
                            .debug(&format!("Published {} = {}", topic, command.value));
                        report.published.push(topic);
                    }
                    Err(e) => {
                        self.logger.error(&format!(
                            "Publish to inverter_{} failed: {}",
                            profile.index, e
                        ));
                        if !failed {
                            report.failures.push((profile.index, e.to_string()));
                            failed = true;
                        }
                    }
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InverterConfig;
    use crate::decision::{ChargeAction, DecisionConditions};
    use crate::error::HelionError;
    use chrono::Utc;
    use tokio::sync::Mutex;

    struct RecordingTransport {
        messages: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
            if topic.contains("inverter_9") {
                return Err(HelionError::network("broken inverter"));
            }
            self.messages
                .lock()
                .await
                .push((topic.to_string(), payload.to_string()));
            Ok(())
        }
    }

    fn decision(mode: ChargeMode) -> ChargingDecision {
        ChargingDecision {
            action: ChargeAction::StartCharging,
            mode,
            reason: "test".to_string(),
            conditions: DecisionConditions {
                pv_power: Some(0.0),
                load: Some(0.0),
                price_level: None,
                battery_soc: Some(50.0),
                grid_voltage: Some(230.0),
            },
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn legacy_collapses_to_grid_charge_boolean() {
        let cmds = translate(ChargeMode::UtilityFirst, InverterType::Legacy);
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].parameter, "grid_charge");
        assert_eq!(cmds[0].value, "Enabled");

        let cmds = translate(ChargeMode::SolarFirst, InverterType::Legacy);
        assert_eq!(cmds[0].value, "Disabled");
    }

    #[test]
    fn modern_maps_to_priority_pair() {
        let cmds = translate(ChargeMode::UtilityFirst, InverterType::Modern);
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].parameter, "charger_source_priority");
        assert_eq!(cmds[0].value, "Utility first");
        assert_eq!(cmds[1].parameter, "output_source_priority");

        let cmds = translate(ChargeMode::SolarBatteryUtility, InverterType::Modern);
        assert_eq!(cmds[1].value, "Solar/Battery/Utility");
    }

    #[test]
    fn hybrid_receives_both_vocabularies() {
        let cmds = translate(ChargeMode::SolarOnly, InverterType::Hybrid);
        assert_eq!(cmds.len(), 3);
        assert_eq!(cmds[0].parameter, "grid_charge");
        assert_eq!(cmds[0].value, "Disabled");
    }

    #[tokio::test]
    async fn publishes_to_topic_pattern() {
        let transport = Arc::new(RecordingTransport {
            messages: Mutex::new(Vec::new()),
        });
        let publisher = CommandPublisher::new(
            "helion".to_string(),
            vec![InverterConfig {
                kind: InverterType::Modern,
                index: 1,
            }],
            transport.clone(),
        );

        let report = publisher.publish_decision(&decision(ChargeMode::UtilityFirst)).await;
        assert!(report.failures.is_empty());

        let messages = transport.messages.lock().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0, "helion/inverter_1/charger_source_priority/set");
        assert_eq!(messages[0].1, "Utility first");
        assert_eq!(messages[1].0, "helion/inverter_1/output_source_priority/set");
    }

    #[tokio::test]
    async fn one_broken_inverter_does_not_block_others() {
        let transport = Arc::new(RecordingTransport {
            messages: Mutex::new(Vec::new()),
        });
        let publisher = CommandPublisher::new(
            "helion".to_string(),
            vec![
                InverterConfig {
                    kind: InverterType::Legacy,
                    index: 9, // fails
                },
                InverterConfig {
                    kind: InverterType::Legacy,
                    index: 2,
                },
            ],
            transport.clone(),
        );

        let report = publisher.publish_decision(&decision(ChargeMode::UtilityFirst)).await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, 9);
        assert_eq!(report.published.len(), 1);

        let messages = transport.messages.lock().await;
        assert_eq!(messages[0].0, "helion/inverter_2/grid_charge/set");
    }
}

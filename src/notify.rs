//! Notification dispatch for Helion
//!
//! Warning events and notable charging decisions are rendered into
//! human-readable messages and fanned out to every configured recipient
//! independently. A hung or failing send never aborts the remaining
//! recipients; the broadcast succeeds when at least one send does.

use crate::decision::{ChargeAction, ChargingDecision};
use crate::error::{HelionError, Result};
use crate::logging::get_logger;
use crate::store::Store;
use crate::warnings::WarningEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// What a notification rule is linked to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    /// Forwards warning events whose rule id matches `linked_id`
    Warning,
    /// Forwards decision-engine transitions
    Rule,
}

/// Governs whether an event class is forwarded to the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRule {
    pub id: String,
    pub kind: NotificationKind,
    pub linked_id: String,
    pub enabled: bool,
}

/// External message-send capability keyed by opaque recipient ids
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, recipient: &str, text: &str) -> Result<()>;
}

const RULES_KEY: &str = "notification_rules";

/// Renders and fans out notification messages
pub struct NotificationDispatcher {
    sink: Arc<dyn NotificationSink>,
    recipients: Vec<String>,
    send_timeout: Duration,
    enabled: bool,
    rules: Vec<NotificationRule>,
    store: Option<Arc<dyn Store>>,
    logger: crate::logging::StructuredLogger,
}

impl NotificationDispatcher {
    /// Create a new dispatcher over the injected sink
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        recipients: Vec<String>,
        send_timeout: Duration,
        enabled: bool,
        store: Option<Arc<dyn Store>>,
    ) -> Self {
        Self {
            sink,
            recipients,
            send_timeout,
            enabled,
            rules: Vec::new(),
            store,
            logger: get_logger("notify"),
        }
    }

    /// Restore notification rules from the durable store, best-effort
    pub async fn initialize(&mut self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        match store.get(RULES_KEY).await {
            Ok(Some(value)) => match serde_json::from_value::<Vec<NotificationRule>>(value) {
                Ok(rules) => {
                    self.logger
                        .info(&format!("Restored {} notification rules", rules.len()));
                    self.rules = rules;
                }
                Err(e) => self
                    .logger
                    .warn(&format!("Persisted notification rules unreadable: {}", e)),
            },
            Ok(None) => {}
            Err(e) => self
                .logger
                .warn(&format!("Notification rules restore failed: {}", e)),
        }
    }

    /// Validate and add a rule
    pub async fn add_rule(&mut self, rule: NotificationRule) -> Result<()> {
        Self::validate_rule(&rule)?;
        if self.rules.iter().any(|r| r.id == rule.id) {
            return Err(HelionError::validation("id", "Rule id already exists"));
        }
        self.rules.push(rule);
        self.persist_rules().await;
        Ok(())
    }

    /// Remove a rule by id
    pub async fn remove_rule(&mut self, id: &str) -> Result<()> {
        let before = self.rules.len();
        self.rules.retain(|r| r.id != id);
        if self.rules.len() == before {
            return Err(HelionError::validation("id", "No such rule"));
        }
        self.persist_rules().await;
        Ok(())
    }

    fn validate_rule(rule: &NotificationRule) -> Result<()> {
        if rule.id.trim().is_empty() {
            return Err(HelionError::validation("id", "Rule id cannot be empty"));
        }
        if rule.linked_id.trim().is_empty() {
            return Err(HelionError::validation(
                "linked_id",
                "Linked id cannot be empty",
            ));
        }
        Ok(())
    }

    /// Current rules, read-only
    pub fn rules(&self) -> &[NotificationRule] {
        &self.rules
    }

    fn warning_forwarding_enabled(&self, rule_id: &str) -> bool {
        self.rules.iter().any(|r| {
            r.enabled && r.kind == NotificationKind::Warning && r.linked_id == rule_id
        })
    }

    fn decision_forwarding_enabled(&self) -> bool {
        self.rules
            .iter()
            .any(|r| r.enabled && r.kind == NotificationKind::Rule)
    }

    /// Render a warning event into a message, substituting the snapshot
    /// fields that are present
    pub fn render_warning(event: &WarningEvent) -> String {
        let mut lines = vec![format!(
            "⚠ Warning '{}': {} {} {} (measured {})",
            event.rule_id,
            event.triggered.parameter,
            match event.triggered.condition {
                crate::warnings::Condition::Lt => "<",
                crate::warnings::Condition::Gt => ">",
                crate::warnings::Condition::Eq => "=",
                crate::warnings::Condition::Lte => "<=",
                crate::warnings::Condition::Gte => ">=",
            },
            event.triggered.threshold,
            event.triggered.value
        )];

        let state = &event.system_state;
        let mut fields = Vec::new();
        if let Some(v) = state.battery_soc {
            fields.push(format!("SoC {:.0}%", v));
        }
        if let Some(v) = state.pv_power {
            fields.push(format!("PV {:.0}W", v));
        }
        if let Some(v) = state.load {
            fields.push(format!("load {:.0}W", v));
        }
        if let Some(v) = state.grid_voltage {
            fields.push(format!("grid {:.0}V", v));
        }
        if !fields.is_empty() {
            lines.push(fields.join(", "));
        }
        lines.join("\n")
    }

    /// Render a published decision transition into a message
    pub fn render_decision(decision: &ChargingDecision) -> String {
        format!(
            "{} battery charging: mode '{}' ({})",
            match decision.action {
                ChargeAction::StartCharging => "Started",
                ChargeAction::StopCharging => "Stopped",
            },
            decision.mode.as_str(),
            decision.reason
        )
    }

    /// Forward a warning event if an enabled rule references it
    pub async fn notify_warning(&self, event: &WarningEvent) -> bool {
        if !self.enabled || !self.warning_forwarding_enabled(&event.rule_id) {
            return false;
        }
        self.broadcast_message(&Self::render_warning(event)).await
    }

    /// Forward a decision transition if decision forwarding is enabled
    pub async fn notify_decision(&self, decision: &ChargingDecision) -> bool {
        if !self.enabled || !self.decision_forwarding_enabled() {
            return false;
        }
        self.broadcast_message(&Self::render_decision(decision)).await
    }

    /// Send a message to every recipient independently.
    ///
    /// Each send is bounded by the configured timeout; a failure or
    /// timeout on one recipient never propagates to the others. Returns
    /// true iff at least one send succeeded.
    pub async fn broadcast_message(&self, text: &str) -> bool {
        let mut handles = Vec::with_capacity(self.recipients.len());
        for recipient in &self.recipients {
            let sink = self.sink.clone();
            let recipient = recipient.clone();
            let text = text.to_string();
            let timeout = self.send_timeout;
            handles.push(tokio::spawn(async move {
                match tokio::time::timeout(timeout, sink.send(&recipient, &text)).await {
                    Ok(Ok(())) => (recipient, Ok(())),
                    Ok(Err(e)) => (recipient, Err(e)),
                    Err(_) => (recipient, Err(HelionError::timeout("send timed out"))),
                }
            }));
        }

        let mut any_success = false;
        for handle in handles {
            match handle.await {
                Ok((_, Ok(()))) => any_success = true,
                Ok((recipient, Err(e))) => self
                    .logger
                    .warn(&format!("Send to '{}' failed: {}", recipient, e)),
                Err(e) => self.logger.warn(&format!("Send task panicked: {}", e)),
            }
        }
        any_success
    }

    async fn persist_rules(&self) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        match serde_json::to_value(&self.rules) {
            Ok(value) => {
                if let Err(e) = store.put(RULES_KEY, &value).await {
                    self.logger
                        .warn(&format!("Notification rules persist failed: {}", e));
                }
            }
            Err(e) => self
                .logger
                .warn(&format!("Notification rules serialization failed: {}", e)),
        }
    }
}

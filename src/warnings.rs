//! Threshold warning rules for Helion
//!
//! User-defined rules compare a single telemetry field against a
//! threshold, with a per-rule cooldown and an optional local-time
//! window. Triggered events embed the full snapshot for auditability
//! and are kept in a bounded history, newest first.

use crate::error::{HelionError, Result};
use crate::logging::get_logger;
use crate::store::Store;
use crate::telemetry::SystemStateSnapshot;
use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Comparison operator applied to a telemetry field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Lt,
    Gt,
    Eq,
    Lte,
    Gte,
}

impl Condition {
    fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Condition::Lt => value < threshold,
            Condition::Gt => value > threshold,
            Condition::Eq => (value - threshold).abs() < 1e-9,
            Condition::Lte => value <= threshold,
            Condition::Gte => value >= threshold,
        }
    }
}

/// Optional local-time gate for a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeCondition {
    /// Local hour in [8, 18)
    Daytime,
}

/// A user-defined threshold rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarningRule {
    pub id: String,
    /// Telemetry field name this rule watches
    pub parameter: String,
    pub condition: Condition,
    pub threshold: f64,
    /// Rules are disabled on creation until the user enables them
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub priority: u8,
    pub cooldown_minutes: i64,
    #[serde(default)]
    pub time_condition: Option<TimeCondition>,
}

/// Echo of the comparison that fired, embedded in the event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggeredCondition {
    pub parameter: String,
    pub value: f64,
    pub threshold: f64,
    pub condition: Condition,
}

/// A single triggered warning, append-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarningEvent {
    pub id: String,
    pub rule_id: String,
    pub timestamp: DateTime<Utc>,
    pub system_state: SystemStateSnapshot,
    pub triggered: TriggeredCondition,
}

const RULES_KEY: &str = "warning_rules";
const HISTORY_KEY: &str = "warning_history";

/// Evaluates warning rules against telemetry snapshots
pub struct WarningMonitor {
    rules: Vec<WarningRule>,
    history: VecDeque<WarningEvent>,
    /// Indexed last-trigger lookup, rebuilt from history on restore
    last_trigger: HashMap<String, DateTime<Utc>>,
    max_history_items: usize,
    enabled: bool,
    timezone: Tz,
    store: Option<Arc<dyn Store>>,
    logger: crate::logging::StructuredLogger,
}

impl WarningMonitor {
    /// Create a new monitor
    pub fn new(
        enabled: bool,
        max_history_items: usize,
        timezone: Tz,
        store: Option<Arc<dyn Store>>,
    ) -> Self {
        Self {
            rules: Vec::new(),
            history: VecDeque::new(),
            last_trigger: HashMap::new(),
            max_history_items,
            enabled,
            timezone,
            store,
            logger: get_logger("warnings"),
        }
    }

    /// Restore rules and history from the durable store, best-effort,
    /// and rebuild the last-trigger index so cooldowns survive restarts.
    pub async fn initialize(&mut self) {
        let Some(store) = self.store.clone() else {
            return;
        };

        match store.get(RULES_KEY).await {
            Ok(Some(value)) => match serde_json::from_value::<Vec<WarningRule>>(value) {
                Ok(rules) => {
                    self.logger
                        .info(&format!("Restored {} warning rules", rules.len()));
                    self.rules = rules;
                }
                Err(e) => self
                    .logger
                    .warn(&format!("Persisted warning rules unreadable: {}", e)),
            },
            Ok(None) => {}
            Err(e) => self
                .logger
                .warn(&format!("Warning rules restore failed: {}", e)),
        }

        match store.get(HISTORY_KEY).await {
            Ok(Some(value)) => match serde_json::from_value::<Vec<WarningEvent>>(value) {
                Ok(events) => {
                    self.history = events.into_iter().collect();
                    self.history.truncate(self.max_history_items);
                    for event in &self.history {
                        let entry = self
                            .last_trigger
                            .entry(event.rule_id.clone())
                            .or_insert(event.timestamp);
                        if event.timestamp > *entry {
                            *entry = event.timestamp;
                        }
                    }
                    self.logger
                        .info(&format!("Restored {} warning events", self.history.len()));
                }
                Err(e) => self
                    .logger
                    .warn(&format!("Persisted warning history unreadable: {}", e)),
            },
            Ok(None) => {}
            Err(e) => self
                .logger
                .warn(&format!("Warning history restore failed: {}", e)),
        }
    }

    /// Validate and add a rule. New rules are always disabled.
    pub async fn add_rule(&mut self, mut rule: WarningRule) -> Result<()> {
        Self::validate_rule(&rule)?;
        if self.rules.iter().any(|r| r.id == rule.id) {
            return Err(HelionError::validation("id", "Rule id already exists"));
        }
        rule.enabled = false;
        self.rules.push(rule);
        self.persist_rules().await;
        Ok(())
    }

    /// Replace an existing rule by id
    pub async fn update_rule(&mut self, rule: WarningRule) -> Result<()> {
        Self::validate_rule(&rule)?;
        let Some(existing) = self.rules.iter_mut().find(|r| r.id == rule.id) else {
            return Err(HelionError::validation("id", "No such rule"));
        };
        *existing = rule;
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

    fn validate_rule(rule: &WarningRule) -> Result<()> {
        if rule.id.trim().is_empty() {
            return Err(HelionError::validation("id", "Rule id cannot be empty"));
        }
        if rule.parameter.trim().is_empty() {
            return Err(HelionError::validation(
                "parameter",
                "Parameter cannot be empty",
            ));
        }
        if rule.cooldown_minutes < 0 {
            return Err(HelionError::validation(
                "cooldown_minutes",
                "Cannot be negative",
            ));
        }
        if !rule.threshold.is_finite() {
            return Err(HelionError::validation("threshold", "Must be finite"));
        }
        Ok(())
    }

    /// Current rules, read-only
    pub fn rules(&self) -> &[WarningRule] {
        &self.rules
    }

    /// Event history, newest first, read-only
    pub fn history(&self) -> impl Iterator<Item = &WarningEvent> {
        self.history.iter()
    }

    /// Whether a rule is still inside its cooldown window at `now`.
    ///
    /// A rule with no prior trigger is never on cooldown; a rule whose
    /// id cannot be resolved is treated as on cooldown (fail-closed).
    fn on_cooldown(&self, rule: &WarningRule, now: DateTime<Utc>) -> bool {
        if rule.id.trim().is_empty() {
            return true;
        }
        match self.last_trigger.get(&rule.id) {
            Some(last) => now.signed_duration_since(*last) < Duration::minutes(rule.cooldown_minutes),
            None => false,
        }
    }

    fn daytime(&self, now: DateTime<Utc>) -> bool {
        let hour = now.with_timezone(&self.timezone).hour();
        (8..18).contains(&hour)
    }

    /// Evaluate all enabled rules against a snapshot.
    ///
    /// Every triggered event is appended to history and persisted as
    /// part of evaluation, not deferred.
    pub async fn evaluate(
        &mut self,
        snapshot: &SystemStateSnapshot,
        now: DateTime<Utc>,
    ) -> Vec<WarningEvent> {
        if !self.enabled {
            return Vec::new();
        }

        let mut events = Vec::new();
        let rules = self.rules.clone();
        for rule in rules.iter().filter(|r| r.enabled) {
            if self.on_cooldown(rule, now) {
                continue;
            }
            if rule.time_condition == Some(TimeCondition::Daytime) && !self.daytime(now) {
                continue;
            }
            let Some(value) = snapshot.field(&rule.parameter) else {
                continue;
            };
            if !rule.condition.holds(value, rule.threshold) {
                continue;
            }

            let event = WarningEvent {
                id: uuid::Uuid::new_v4().to_string(),
                rule_id: rule.id.clone(),
                timestamp: now,
                system_state: *snapshot,
                triggered: TriggeredCondition {
                    parameter: rule.parameter.clone(),
                    value,
                    threshold: rule.threshold,
                    condition: rule.condition,
                },
            };
            self.logger.warn(&format!(
                "Rule '{}' triggered: {} = {} (threshold {})",
                rule.id, rule.parameter, value, rule.threshold
            ));

            self.last_trigger.insert(rule.id.clone(), now);
            self.history.push_front(event.clone());
            self.history.truncate(self.max_history_items);
            events.push(event);
        }

        if !events.is_empty() {
            self.persist_history().await;
        }
        events
    }

    async fn persist_rules(&self) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        match serde_json::to_value(&self.rules) {
            Ok(value) => {
                if let Err(e) = store.put(RULES_KEY, &value).await {
                    self.logger
                        .warn(&format!("Warning rules persist failed: {}", e));
                }
            }
            Err(e) => self
                .logger
                .warn(&format!("Warning rules serialization failed: {}", e)),
        }
    }

    async fn persist_history(&self) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let events: Vec<&WarningEvent> = self.history.iter().collect();
        match serde_json::to_value(&events) {
            Ok(value) => {
                if let Err(e) = store.put(HISTORY_KEY, &value).await {
                    self.logger
                        .warn(&format!("Warning history persist failed: {}", e));
                }
            }
            Err(e) => self
                .logger
                .warn(&format!("Warning history serialization failed: {}", e)),
        }
    }
}

//! Core evaluation loop for Helion
//!
//! The driver coordinates all components: once per tick it captures a
//! telemetry snapshot, runs the warning monitor and the decision engine
//! against it, and dispatches commands and notifications asynchronously
//! so a slow sink never blocks evaluation. Evaluation is mutually
//! exclusive across ticks because the loop owns the engine; command
//! ordering is semantically significant.

use crate::config::{Config, PriceConfig};
use crate::decision::{self, DecisionEngine, PriceSignal};
use crate::error::Result;
use crate::inverter::{CommandPublisher, Transport};
use crate::logging::get_logger;
use crate::notify::{NotificationDispatcher, NotificationSink};
use crate::price::{PriceProvider, PriceSource};
use crate::store::Store;
use crate::telemetry::SystemStateSnapshot;
use crate::warnings::WarningMonitor;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc, watch};
use tokio::time::{Duration, interval};

/// Main driver state
#[derive(Debug, Clone)]
pub enum DriverState {
    /// Driver is initializing
    Initializing,
    /// Driver is running normally
    Running,
    /// Driver is shutting down
    ShuttingDown,
}

/// Commands accepted by the driver from external components
#[derive(Debug, Clone)]
pub enum DriverCommand {
    /// Trigger an on-demand price refresh
    RefreshPrices,
    /// Toggle active control (false = learner mode)
    SetActiveControl(bool),
    /// Replace the price configuration after validation
    UpdatePriceConfig(PriceConfig),
}

/// Store key for the persisted price configuration record
const PRICE_CONFIG_KEY: &str = "price_config";

/// Main driver for Helion
pub struct HelionDriver {
    config: Config,
    state: watch::Sender<DriverState>,
    logger: crate::logging::StructuredLogger,

    prices: PriceProvider,
    warnings: WarningMonitor,
    engine: DecisionEngine,
    publisher: Arc<CommandPublisher>,
    notifications: Arc<RwLock<NotificationDispatcher>>,
    store: Option<Arc<dyn Store>>,

    /// Telemetry ingress, an injected subscribe capability
    telemetry_rx: mpsc::UnboundedReceiver<serde_json::Value>,
    /// Last snapshot seen, re-evaluated on the timer tick
    latest_snapshot: Option<SystemStateSnapshot>,

    commands_rx: mpsc::UnboundedReceiver<DriverCommand>,
    shutdown_tx: mpsc::UnboundedSender<()>,
    shutdown_rx: mpsc::UnboundedReceiver<()>,
}

impl HelionDriver {
    /// Create a new driver instance over injected capabilities
    pub fn new(
        config: Config,
        store: Option<Arc<dyn Store>>,
        price_source: Arc<dyn PriceSource>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn NotificationSink>,
        telemetry_rx: mpsc::UnboundedReceiver<serde_json::Value>,
        commands_rx: mpsc::UnboundedReceiver<DriverCommand>,
    ) -> Result<Self> {
        config.validate()?;

        let logger = get_logger("driver");
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(DriverState::Initializing);

        let timezone = config
            .timezone
            .parse::<chrono_tz::Tz>()
            .unwrap_or(chrono_tz::UTC);

        let prices = PriceProvider::new(price_source, store.clone());
        let warnings = WarningMonitor::new(
            config.warnings.enabled,
            config.warnings.max_history_items,
            timezone,
            store.clone(),
        );
        let engine = DecisionEngine::new(config.active_control);
        let publisher = Arc::new(CommandPublisher::new(
            config.mqtt.topic_prefix.clone(),
            config.inverters.clone(),
            transport,
        ));
        let notifications = Arc::new(RwLock::new(NotificationDispatcher::new(
            sink,
            config.notifications.recipients.clone(),
            Duration::from_secs(config.notifications.send_timeout_secs),
            config.notifications.enabled,
            store.clone(),
        )));

        Ok(Self {
            config,
            state: state_tx,
            logger,
            prices,
            warnings,
            engine,
            publisher,
            notifications,
            store,
            telemetry_rx,
            latest_snapshot: None,
            commands_rx,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Restore persisted state before the evaluation loop starts.
    ///
    /// Must complete before `run()` so the loop never reads stale
    /// defaults while an async restore is still in flight.
    pub async fn initialize(&mut self) {
        if let Some(store) = self.store.clone() {
            // The price config is a single persisted record that wins
            // over the YAML defaults when present
            match store.get(PRICE_CONFIG_KEY).await {
                Ok(Some(value)) => match serde_json::from_value::<PriceConfig>(value) {
                    Ok(price) => {
                        if self.config.update_price_config(price).is_ok() {
                            self.logger.info("Restored persisted price configuration");
                        }
                    }
                    Err(e) => self
                        .logger
                        .warn(&format!("Persisted price config unreadable: {}", e)),
                },
                Ok(None) => {}
                Err(e) => self
                    .logger
                    .warn(&format!("Price config restore failed: {}", e)),
            }
        }

        self.prices.initialize().await;
        self.warnings.initialize().await;
        self.notifications.write().await.initialize().await;

        if self.config.price.enabled
            && let Err(e) = self.prices.refresh(&self.config.price).await
        {
            self.logger
                .warn(&format!("Initial price refresh failed: {}", e));
        }

        self.logger.info("Driver initialized");
    }

    /// Run the driver main loop
    pub async fn run(&mut self) -> Result<()> {
        self.logger.info("Starting evaluation loop");
        self.state.send(DriverState::Running).ok();

        let mut poll_interval = interval(Duration::from_millis(self.config.poll_interval_ms));
        let mut refresh_interval = interval(Duration::from_secs(
            self.config.price_refresh_interval_secs.max(1),
        ));

        loop {
            tokio::select! {
                Some(payload) = self.telemetry_rx.recv() => {
                    let snapshot = SystemStateSnapshot::from_message(&payload, Utc::now());
                    self.latest_snapshot = Some(snapshot);
                    self.tick(snapshot).await;
                }
                _ = poll_interval.tick() => {
                    // Re-evaluate the last snapshot so a price change
                    // mid-hour takes effect without fresh telemetry
                    if let Some(snapshot) = self.latest_snapshot {
                        self.tick(snapshot).await;
                    }
                }
                _ = refresh_interval.tick() => {
                    if self.config.price.enabled
                        && let Err(e) = self.prices.refresh(&self.config.price).await
                    {
                        self.logger.warn(&format!("Scheduled price refresh failed: {}", e));
                    }
                }
                Some(cmd) = self.commands_rx.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = self.shutdown_rx.recv() => {
                    self.logger.info("Shutdown signal received");
                    break;
                }
            }
        }

        self.state.send(DriverState::ShuttingDown).ok();
        self.logger.info("Driver shutdown complete");
        Ok(())
    }

    /// One full evaluation pass over an immutable snapshot
    async fn tick(&mut self, snapshot: SystemStateSnapshot) {
        let now = Utc::now();

        // Warning monitor first; events are persisted as part of evaluation
        let events = self.warnings.evaluate(&snapshot, now).await;
        for event in events {
            let notifications = self.notifications.clone();
            tokio::spawn(async move {
                notifications.read().await.notify_warning(&event).await;
            });
        }

        // Price signal for this tick
        let signal = match self.prices.current_price() {
            Some(point) => PriceSignal {
                level: Some(point.level),
                acceptable: self.prices.is_price_good(point, &self.config.price, now),
            },
            None => PriceSignal::unavailable(),
        };

        let decision = decision::evaluate(&snapshot, &signal, &self.config.price, now);

        // Edge-triggered: only a mode change reaches the publisher, and
        // dispatch never blocks the evaluation tick
        if let Some(published) = self.engine.step(decision) {
            let publisher = self.publisher.clone();
            let notifications = self.notifications.clone();
            let logger = self.logger.clone();
            tokio::spawn(async move {
                let report = publisher.publish_decision(&published).await;
                if !report.failures.is_empty() {
                    logger.warn(&format!(
                        "Decision published with {} inverter failure(s)",
                        report.failures.len()
                    ));
                }
                notifications.read().await.notify_decision(&published).await;
            });
        }
    }

    /// Handle an external command
    async fn handle_command(&mut self, cmd: DriverCommand) {
        match cmd {
            DriverCommand::RefreshPrices => {
                if let Err(e) = self.prices.refresh(&self.config.price).await {
                    self.logger
                        .warn(&format!("On-demand price refresh failed: {}", e));
                }
            }
            DriverCommand::SetActiveControl(active) => {
                self.engine.set_active_control(active);
            }
            DriverCommand::UpdatePriceConfig(price) => {
                match self.config.update_price_config(price) {
                    Ok(()) => {
                        self.logger.info("Price configuration updated");
                        self.persist_price_config().await;
                    }
                    Err(e) => self
                        .logger
                        .warn(&format!("Price config update rejected: {}", e)),
                }
            }
        }
    }

    async fn persist_price_config(&self) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        match serde_json::to_value(&self.config.price) {
            Ok(value) => {
                if let Err(e) = store.put(PRICE_CONFIG_KEY, &value).await {
                    self.logger
                        .warn(&format!("Price config persist failed: {}", e));
                }
            }
            Err(e) => self
                .logger
                .warn(&format!("Price config serialization failed: {}", e)),
        }
    }

    /// Get current driver state
    pub fn get_state(&self) -> DriverState {
        self.state.borrow().clone()
    }

    /// Request shutdown
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send(()).ok();
    }

    /// Get configuration reference
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Warning monitor accessor for rule management
    pub fn warnings_mut(&mut self) -> &mut WarningMonitor {
        &mut self.warnings
    }

    /// Notification dispatcher handle for rule management
    pub fn notifications(&self) -> Arc<RwLock<NotificationDispatcher>> {
        self.notifications.clone()
    }

    /// Price provider accessor for derived signals
    pub fn prices(&self) -> &PriceProvider {
        &self.prices
    }
}

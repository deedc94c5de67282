//! # Helion - Price-Aware Battery Charging Controller
//!
//! A Rust implementation of a home battery charging controller. Helion
//! watches system telemetry, day-ahead electricity prices and
//! user-defined warning rules, decides once per tick whether the battery
//! should charge from the grid, and publishes the resulting inverter
//! commands and notifications.
//!
//! ## Features
//!
//! - **High Performance**: Async-first design with Tokio runtime
//! - **Dynamic Pricing**: Tibber API integration with level-based and
//!   average-relative charging windows
//! - **Multi-Inverter**: Legacy, modern and hybrid command vocabularies
//! - **Warning Rules**: Threshold rules with cooldowns and time windows
//! - **Notifications**: Rule-gated fan-out with per-send timeouts
//! - **Persistence**: Durable rule, history and cache recovery
//! - **Configuration**: YAML-based configuration with validation
//!
//! ## Architecture
//!
//! The application follows a modular architecture with clear separation of concerns:
//!
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing
//! - `driver`: Core evaluation loop and state management
//! - `telemetry`: System state snapshots
//! - `price`: Price cache, refresh and the Tibber client
//! - `decision`: Charging decision ladder and edge-triggered engine
//! - `warnings`: Warning rules, evaluation and history
//! - `inverter`: Decision-to-command translation and publishing
//! - `notify`: Notification rules and dispatch
//! - `store`: Durable key/document persistence

pub mod config;
pub mod decision;
pub mod driver;
pub mod error;
pub mod inverter;
pub mod logging;
pub mod notify;
pub mod price;
pub mod store;
pub mod telemetry;
pub mod warnings;

// Re-export commonly used types
pub use config::Config;
pub use driver::HelionDriver;
pub use error::{HelionError, Result};

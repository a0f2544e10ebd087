//! Water level alerting core.
//!
//! `hydro-alerts` turns a stream of water level readings into alert
//! levels and fans alerts out to every configured notification channel.
//!
//! # Features
//!
//! - **Hysteresis**: levels rise as soon as a threshold is crossed but only
//!   fall once the reading drops a margin below it, so noise near a
//!   boundary never flaps
//! - **Significant change**: a large move within the same level re-alerts
//! - **Bursts**: every trigger is repeated on all enabled channels a fixed
//!   number of times, with at most one burst running at once
//! - **Channel isolation**: a failing or hanging channel never delays the
//!   others or the sampling loop
//! - **History**: the last 100 events are kept for dashboards
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use hydro_alerts::channels::LogChannel;
//! use hydro_alerts::{
//!     AlertConfig, AlertLevel, AlertManager, BurstConfig, ChannelRegistry, ChannelSettings,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> hydro_alerts::Result<()> {
//! let registry = Arc::new(ChannelRegistry::new());
//! registry.register(Arc::new(LogChannel::default()), ChannelSettings::default())?;
//!
//! let config = AlertConfig {
//!     burst: BurstConfig { interval_ms: 0, ..BurstConfig::default() },
//!     ..AlertConfig::default()
//! };
//! let manager = AlertManager::new(&config, registry)?;
//!
//! manager.ingest(Some(120.0));
//! let dispatch = manager.ingest(Some(265.0));
//! assert_eq!(manager.current_level(), AlertLevel::Danger);
//!
//! let report = dispatch.wait().await.expect("burst started");
//! assert_eq!(report.delivered(), 3);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod channels;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod evaluator;
pub mod history;
pub mod manager;
pub mod observer;
pub mod registry;
pub mod status;
pub mod types;

pub use channels::{ChannelAdapter, ChannelFuture, ChannelOutcome, DeliveryReport, LogChannel};
pub use config::{AlertConfig, BurstConfig, CalibrationConfig, ChannelConfig};
pub use coordinator::{AttemptReport, BurstReport, Dispatch, DispatchCoordinator, DropReason};
pub use error::{AlertError, Result};
pub use evaluator::{Evaluation, EvaluatorState, LevelEvaluator};
pub use history::{AlertHistory, DEFAULT_HISTORY_CAPACITY};
pub use manager::AlertManager;
pub use observer::{AlertObserver, BroadcastObserver, TracingObserver};
pub use registry::{Channel, ChannelRegistry, ChannelSettings, ChannelSnapshot, ChannelStatus};
pub use status::StatusSnapshot;
pub use types::{AlertEvent, AlertKind, AlertLevel, AlertMessage, ThresholdTable};

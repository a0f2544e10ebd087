//! Concrete channel adapters and the factory that builds them from config.
//!
//! Each channel entry names an adapter `kind`; its opaque `settings` are
//! parsed here and nowhere else.

pub mod command;
pub mod webhook;

use std::sync::Arc;

use hydro_alerts::{
    AlertConfig, AlertError, ChannelAdapter, ChannelConfig, ChannelRegistry, LogChannel, Result,
};
use serde::de::DeserializeOwned;

pub use command::{CommandChannel, CommandSettings};
pub use webhook::{WebhookChannel, WebhookSettings};

/// Builds the adapter for one configured channel.
///
/// # Errors
///
/// Returns `AlertError::InvalidConfig` for an unknown kind or malformed settings.
pub fn build_channel(name: &str, config: &ChannelConfig) -> Result<Arc<dyn ChannelAdapter>> {
    let adapter: Arc<dyn ChannelAdapter> = match config.kind.as_str() {
        "log" => Arc::new(LogChannel::new(name)),
        "command" => Arc::new(CommandChannel::new(name, parse_settings(name, config)?)?),
        "webhook" => Arc::new(WebhookChannel::new(name, parse_settings(name, config)?)?),
        other => {
            return Err(AlertError::InvalidConfig {
                reason: format!("channel '{name}': unknown kind '{other}'"),
            });
        }
    };
    Ok(adapter)
}

/// Builds a registry holding every configured channel.
///
/// # Errors
///
/// Returns an error if any channel cannot be built.
pub fn build_registry(config: &AlertConfig) -> Result<ChannelRegistry> {
    let registry = ChannelRegistry::new();
    for (name, channel) in &config.channels {
        registry.register(build_channel(name, channel)?, channel.settings())?;
    }
    Ok(registry)
}

fn parse_settings<T: DeserializeOwned>(name: &str, config: &ChannelConfig) -> Result<T> {
    serde_json::from_value(config.settings.clone()).map_err(|e| AlertError::InvalidConfig {
        reason: format!("channel '{name}': invalid settings: {e}"),
    })
}

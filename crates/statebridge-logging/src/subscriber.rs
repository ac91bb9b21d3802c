// ABOUTME: Installs the global tracing subscriber for the bridge
// ABOUTME: The filter always sits behind a reload layer; callers decide whether to keep the handle

use anyhow::{Context, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{reload, util::SubscriberInitExt};

use crate::config::LoggingConfig;
use crate::layers::{create_console_layer, create_env_filter, create_file_layer};
use crate::reload::LoggingReloadHandle;

/// Install the subscriber without keeping a way to change levels later.
pub fn init_subscriber(config: LoggingConfig) -> Result<()> {
    install(config).map(drop)
}

pub fn init_subscriber_with_reload(config: LoggingConfig) -> Result<LoggingReloadHandle> {
    install(config)
}

fn install(config: LoggingConfig) -> Result<LoggingReloadHandle> {
    let (filter, filter_handle) = reload::Layer::new(create_env_filter(&config)?);

    let console = config
        .output
        .console
        .then(|| create_console_layer(config.output.json));
    let file = if config.output.file {
        Some(create_file_layer(&config.file)?)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    tracing::info!(
        level = %config.level,
        targets = config.module_levels.len(),
        console = config.output.console,
        json = config.output.json,
        file = ?config.output.file.then(|| config.file.path.display().to_string()),
        "Statebridge logging initialized"
    );
    Ok(LoggingReloadHandle::new(filter_handle, config))
}

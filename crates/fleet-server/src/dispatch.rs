//! Delivery of vehicle commands to the controllers that execute them.

use crate::backoff::Backoff;
use anyhow::{Context, Result};
use fleet_core::VehicleCommand;
use futures::future::BoxFuture;
use std::time::Duration;

const GATEWAY_ATTEMPTS: u32 = 3;
const GATEWAY_BACKOFF_BASE_MS: u64 = 200;
const GATEWAY_BACKOFF_MAX_MS: u64 = 2_000;

/// Destination for vehicle commands.
pub trait CommandSink: Send + Sync {
    fn deliver<'a>(&'a self, command: &'a VehicleCommand) -> BoxFuture<'a, Result<()>>;
}

/// Writes commands to the log. Used when no gateway is configured.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

impl CommandSink for LogSink {
    fn deliver<'a>(&'a self, command: &'a VehicleCommand) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            tracing::info!(
                command_id = %command.command_id,
                vehicle_id = %command.vehicle_id,
                task_id = %command.task_id,
                stage = %command.stage,
                waypoints = command.waypoints.len(),
                "Dispatching command"
            );
            Ok(())
        })
    }
}

/// Posts commands to `{gateway}/v1/commands`, retrying with backoff.
#[derive(Debug, Clone)]
pub struct HttpSink {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpSink {
    pub fn new(gateway_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building gateway HTTP client")?;
        Ok(Self {
            endpoint: format!("{}/v1/commands", gateway_url.trim_end_matches('/')),
            client,
        })
    }

    async fn post_once(&self, command: &VehicleCommand) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(command)
            .send()
            .await
            .with_context(|| format!("sending command {} to gateway", command.command_id))?;
        response
            .error_for_status()
            .with_context(|| format!("gateway rejected command {}", command.command_id))?;
        Ok(())
    }
}

impl CommandSink for HttpSink {
    fn deliver<'a>(&'a self, command: &'a VehicleCommand) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut backoff = Backoff::new(
                Duration::from_millis(GATEWAY_BACKOFF_BASE_MS),
                Duration::from_millis(GATEWAY_BACKOFF_MAX_MS),
            );
            loop {
                match self.post_once(command).await {
                    Ok(()) => return Ok(()),
                    Err(err) if backoff.failures() + 1 >= GATEWAY_ATTEMPTS => return Err(err),
                    Err(err) => {
                        let delay = backoff.fail();
                        tracing::warn!(
                            "Command {} delivery failed: {:#} (retrying in {:?})",
                            command.command_id,
                            err,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        })
    }
}

/// Result of one delivery attempt, fed back to the orchestrator.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub command: VehicleCommand,
    pub error: Option<String>,
}

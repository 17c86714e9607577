//! Simulated counterparts of the edge node: the physical twin that sends
//! the patient bootstrap, and the drug twin that doses it.

use edgetwin_core::{ChannelConfig, DrugCommand, READY_TOKEN};
use edgetwin_env::{Publisher, Subscriber, TransportError, TwinContext};

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised by simulated twins.
#[derive(Debug, Error)]
pub enum TwinError {
    #[error("Edge node not ready after {0:?}")]
    ReadyTimeout(Duration),

    #[error("Subscription closed while waiting for READY")]
    Closed,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Builds a bootstrap in the envelope layout physical twins send.
pub fn sample_bootstrap(patient_id: &str, genetic: f64) -> Vec<u8> {
    json!({
        "meta": { "patient_id": patient_id, "source": "physical_twin" },
        "config": { "risk_factors": { "genetic": genetic } },
    })
    .to_string()
    .into_bytes()
}

// =============================================================================
// PHYSICAL TWIN
// =============================================================================

/// Waits for the node's READY handshake, then sends the bootstrap.
pub struct PhysicalTwin<Ctx, E> {
    context: Arc<Ctx>,
    endpoint: E,
    channels: ChannelConfig,
}

impl<Ctx, E> PhysicalTwin<Ctx, E>
where
    Ctx: TwinContext,
    E: Publisher + Subscriber,
{
    pub fn new(context: Arc<Ctx>, endpoint: E, channels: ChannelConfig) -> Self {
        Self {
            context,
            endpoint,
            channels,
        }
    }

    /// Waits up to `timeout` for a READY on the status channel.
    ///
    /// Returns how long the wait took. A retained READY published before the
    /// twin connected satisfies the wait immediately.
    pub async fn wait_for_ready(&self, timeout: Duration) -> Result<Duration, TwinError> {
        self.endpoint.subscribe(&self.channels.status).await?;
        let start = self.context.now();
        info!("⏳ Waiting up to {:?} for edge node READY", timeout);

        loop {
            let elapsed = self.context.now().saturating_sub(start);
            let Some(remaining) = timeout.checked_sub(elapsed).filter(|r| !r.is_zero()) else {
                return Err(TwinError::ReadyTimeout(timeout));
            };

            tokio::select! {
                biased;

                message = self.endpoint.recv() => match message {
                    Some(m) if m.channel == self.channels.status && m.text() == Some(READY_TOKEN) => {
                        let waited = self.context.now().saturating_sub(start);
                        info!("✓ Edge node READY after {:?}", waited);
                        return Ok(waited);
                    }
                    Some(m) => debug!("Twin ignoring '{}' on '{}'", m.text().unwrap_or("<binary>"), m.channel),
                    None => return Err(TwinError::Closed),
                },
                _ = self.context.sleep(remaining) => {
                    return Err(TwinError::ReadyTimeout(timeout));
                }
            }
        }
    }

    /// Publishes a raw bootstrap payload.
    pub async fn send_bootstrap(&self, payload: Vec<u8>) -> Result<(), TwinError> {
        self.endpoint.send(&self.channels.bootstrap, payload).await?;
        info!("📤 Bootstrap sent on '{}'", self.channels.bootstrap);
        Ok(())
    }

    /// Full handshake: wait for READY, then send `payload`.
    pub async fn handshake(&self, timeout: Duration, payload: Vec<u8>) -> Result<Duration, TwinError> {
        let waited = self.wait_for_ready(timeout).await?;
        self.send_bootstrap(payload).await?;
        Ok(waited)
    }
}

// =============================================================================
// DRUG TWIN
// =============================================================================

/// Publishes drug commands at fixed times on the context clock.
pub struct DrugTwin<Ctx, P> {
    context: Arc<Ctx>,
    publisher: P,
    channel: String,
    schedule: Vec<(Duration, DrugCommand)>,
}

impl<Ctx, P> DrugTwin<Ctx, P>
where
    Ctx: TwinContext,
    P: Publisher,
{
    pub fn new(context: Arc<Ctx>, publisher: P, channel: impl Into<String>) -> Self {
        Self {
            context,
            publisher,
            channel: channel.into(),
            schedule: Vec::new(),
        }
    }

    /// Adds a dose at context time `at`.
    pub fn with_dose(mut self, at: Duration, command: DrugCommand) -> Self {
        self.schedule.push((at, command));
        self.schedule.sort_by_key(|(at, _)| *at);
        self
    }

    /// Sends every scheduled dose in time order. Returns the number sent.
    pub async fn run(&self) -> Result<usize, TwinError> {
        for (at, command) in &self.schedule {
            let now = self.context.now();
            if *at > now {
                self.context.sleep(*at - now).await;
            }
            self.publisher.send(&self.channel, command.to_bytes()?).await?;
            info!(
                "💊 Dose sent at {:?}: efficacy {} ({})",
                at,
                command.efficacy,
                command.site.as_deref().unwrap_or("all sites")
            );
        }
        Ok(self.schedule.len())
    }
}

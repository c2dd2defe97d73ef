//! Identity rotation mechanisms.
//!
//! The rest of the service only needs "rotate, wait, tell me whether it
//! worked and, if you can, what the new identity is". How that happens
//! (router reconnect, proxy switch, VPN hop) stays behind [`IdentityRotator`].

use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use stockfeed_common::config::RotationConfig;

/// Result of a single rotation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationOutcome {
    pub ok: bool,
    /// Newly observed identity, if the mechanism could tell
    pub identity: Option<String>,
    /// The rotator already queried the current identity after rotating
    pub looked_up: bool,
}

impl RotationOutcome {
    pub fn succeeded(identity: Option<String>) -> Self {
        Self {
            ok: true,
            identity,
            looked_up: false,
        }
    }

    /// Success whose identity came from [`IdentityRotator::probe_current_identity`].
    /// `None` here means the lookup already failed.
    pub fn succeeded_after_lookup(identity: Option<String>) -> Self {
        Self {
            ok: true,
            identity,
            looked_up: true,
        }
    }

    pub fn failed() -> Self {
        Self {
            ok: false,
            identity: None,
            looked_up: false,
        }
    }
}

/// Performs identity rotation.
#[async_trait]
pub trait IdentityRotator: Send + Sync {
    /// Mechanism name for logs
    fn name(&self) -> &str;

    /// Whether this rotator can ever succeed
    fn is_enabled(&self) -> bool {
        true
    }

    /// Rotate the public identity and wait until it is usable.
    async fn rotate(&self) -> RotationOutcome;

    /// Best-effort lookup of the current public identity.
    async fn probe_current_identity(&self) -> Option<String>;
}

// ============================================================================
// Command Rotator
// ============================================================================

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Rotates by running a shell command (e.g. a router WAN reconnect script),
/// then probing the new public IP over HTTP.
pub struct CommandRotator {
    command: String,
    settle_delay: Duration,
    probe_url: String,
    client: reqwest::Client,
}

impl CommandRotator {
    pub fn new(command: impl Into<String>, config: &RotationConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            command: command.into(),
            settle_delay: config.settle_delay(),
            probe_url: config.probe_url.clone(),
            client,
        }
    }

    async fn run_command(&self) -> bool {
        debug!(command = %self.command, "Running rotation command");

        let output = match Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .kill_on_drop(true)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %e, "Failed to spawn rotation command");
                return false;
            }
        };

        if !output.status.success() {
            warn!(
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Rotation command failed"
            );
            return false;
        }

        true
    }
}

#[async_trait]
impl IdentityRotator for CommandRotator {
    fn name(&self) -> &str {
        "command"
    }

    async fn rotate(&self) -> RotationOutcome {
        if !self.run_command().await {
            return RotationOutcome::failed();
        }

        if !self.settle_delay.is_zero() {
            debug!(delay_ms = self.settle_delay.as_millis() as u64, "Waiting for network to settle");
            tokio::time::sleep(self.settle_delay).await;
        }

        let identity = self.probe_current_identity().await;
        info!(identity = ?identity, "Rotation command completed");
        RotationOutcome::succeeded_after_lookup(identity)
    }

    async fn probe_current_identity(&self) -> Option<String> {
        let response = match self.client.get(&self.probe_url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!(status = %response.status(), "Identity probe rejected");
                return None;
            }
            Err(e) => {
                debug!(error = %e, "Identity probe failed");
                return None;
            }
        };

        let body = response.text().await.ok()?;
        let identity = body.trim();
        (!identity.is_empty()).then(|| identity.to_string())
    }
}

// ============================================================================
// Disabled Rotator
// ============================================================================

/// Used when no rotation mechanism is configured. Every rotation fails, so
/// the run falls back to plain retries.
#[derive(Debug, Default)]
pub struct DisabledRotator;

#[async_trait]
impl IdentityRotator for DisabledRotator {
    fn name(&self) -> &str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn rotate(&self) -> RotationOutcome {
        RotationOutcome::failed()
    }

    async fn probe_current_identity(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RotationConfig {
        RotationConfig {
            settle_delay_ms: 0,
            // Nothing listens on the discard port
            probe_url: "http://127.0.0.1:9/".to_string(),
            ..RotationConfig::default()
        }
    }

    #[tokio::test]
    async fn test_disabled_rotator_always_fails() {
        let rotator = DisabledRotator;
        assert!(!rotator.is_enabled());
        assert_eq!(rotator.rotate().await, RotationOutcome::failed());
        assert!(rotator.probe_current_identity().await.is_none());
    }

    #[tokio::test]
    async fn test_command_failure_reports_not_ok() {
        let rotator = CommandRotator::new("exit 3", &config());
        let outcome = rotator.rotate().await;
        assert!(!outcome.ok);
    }

    #[tokio::test]
    async fn test_command_success_with_unreachable_probe() {
        let rotator = CommandRotator::new("true", &config());
        let outcome = rotator.rotate().await;
        assert!(outcome.ok);
        assert!(outcome.identity.is_none());
        assert!(outcome.looked_up);
    }
}

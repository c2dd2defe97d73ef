//! Identity rotation coordinator.
//!
//! Wraps an [`IdentityRotator`] with the rules every rotation follows:
//!
//! - one rotation at a time, service-wide
//! - every rotation call, and any follow-up identity lookup, is bounded by
//!   a timeout
//! - a failed rotation is retried after a fixed delay, up to `max_attempts`
//! - an identity already in the [`IdentityRegistry`] is rejected and
//!   rotation is attempted again (within the same bound)
//! - once a full sequence is exhausted, rotation is skipped for the rest of
//!   the run and callers fall back to plain retries

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use stockfeed_common::config::RotationConfig;

use super::{IdentityRegistry, IdentityRotator, RotationOutcome};

/// Limits applied to a rotation sequence.
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    /// Rotation calls per sequence, counting failed and reused ones
    pub max_attempts: u32,
    /// Wait after a failed or timed-out rotation call
    pub retry_delay: Duration,
    /// Upper bound on a single rotation call
    pub timeout: Duration,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::from(&RotationConfig::default())
    }
}

impl From<&RotationConfig> for RotationPolicy {
    fn from(config: &RotationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            retry_delay: config.retry_delay(),
            timeout: config.timeout(),
        }
    }
}

/// Result of a rotation sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationResult {
    /// A fresh (or unobservable) identity is in place
    Rotated {
        identity: Option<String>,
        attempts: u32,
    },
    /// Every attempt failed or produced a known identity
    Exhausted { attempts: u32 },
    /// Rotation is unavailable for this run
    Skipped,
    /// The run was cancelled mid-sequence
    Cancelled,
}

impl RotationResult {
    pub fn is_rotated(&self) -> bool {
        matches!(self, Self::Rotated { .. })
    }
}

/// Serializes and bounds identity rotations.
pub struct RotationCoordinator {
    rotator: Arc<dyn IdentityRotator>,
    registry: Arc<IdentityRegistry>,
    policy: RotationPolicy,
    /// Held for the whole rotation sequence
    gate: Mutex<()>,
    degraded: AtomicBool,
    /// Raw `rotate()` calls
    calls: AtomicU32,
    /// Completed sequences that produced a usable identity
    rotations: AtomicU32,
}

impl RotationCoordinator {
    pub fn new(
        rotator: Arc<dyn IdentityRotator>,
        registry: Arc<IdentityRegistry>,
        policy: RotationPolicy,
    ) -> Self {
        Self {
            rotator,
            registry,
            policy,
            gate: Mutex::new(()),
            degraded: AtomicBool::new(false),
            calls: AtomicU32::new(0),
            rotations: AtomicU32::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    /// Whether rotation has been given up on for this run.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn rotation_count(&self) -> u32 {
        self.rotations.load(Ordering::SeqCst)
    }

    /// Run one rotation sequence.
    pub async fn rotate(&self, cancel: &CancellationToken) -> RotationResult {
        if !self.rotator.is_enabled() {
            if !self.degraded.swap(true, Ordering::SeqCst) {
                warn!(
                    rotator = self.rotator.name(),
                    "Identity rotation unavailable, falling back to plain retries"
                );
            }
            return RotationResult::Skipped;
        }

        let _gate = self.gate.lock().await;

        if self.is_degraded() {
            return RotationResult::Skipped;
        }

        for attempt in 1..=self.policy.max_attempts {
            if cancel.is_cancelled() {
                return RotationResult::Cancelled;
            }

            self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome =
                match tokio::time::timeout(self.policy.timeout, self.rotator.rotate()).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(
                            attempt,
                            timeout_secs = self.policy.timeout.as_secs(),
                            "Identity rotation timed out"
                        );
                        RotationOutcome::failed()
                    }
                };

            if !outcome.ok {
                warn!(attempt, max_attempts = self.policy.max_attempts, "Identity rotation failed");
                if attempt < self.policy.max_attempts {
                    tokio::select! {
                        _ = cancel.cancelled() => return RotationResult::Cancelled,
                        _ = tokio::time::sleep(self.policy.retry_delay) => {}
                    }
                }
                continue;
            }

            let identity = match outcome.identity {
                Some(identity) => Some(identity),
                None if outcome.looked_up => None,
                None => self.lookup_identity(attempt).await,
            };

            match identity {
                Some(identity) if self.registry.contains(&identity).await => {
                    warn!(attempt, identity = %identity, "Rotation landed on a used identity, rotating again");
                }
                Some(identity) => {
                    self.registry.add(&identity).await;
                    self.rotations.fetch_add(1, Ordering::SeqCst);
                    info!(attempt, identity = %identity, "Identity rotated");
                    return RotationResult::Rotated {
                        identity: Some(identity),
                        attempts: attempt,
                    };
                }
                None => {
                    self.rotations.fetch_add(1, Ordering::SeqCst);
                    info!(attempt, "Identity rotated, new identity unknown");
                    return RotationResult::Rotated {
                        identity: None,
                        attempts: attempt,
                    };
                }
            }
        }

        self.degraded.store(true, Ordering::SeqCst);
        error!(
            attempts = self.policy.max_attempts,
            "Identity rotation exhausted, falling back to plain retries for this run"
        );
        RotationResult::Exhausted {
            attempts: self.policy.max_attempts,
        }
    }

    /// Identity lookup after a rotation that did not report one, bounded by
    /// the rotation timeout.
    async fn lookup_identity(&self, attempt: u32) -> Option<String> {
        match tokio::time::timeout(self.policy.timeout, self.rotator.probe_current_identity()).await {
            Ok(identity) => identity,
            Err(_) => {
                warn!(
                    attempt,
                    timeout_secs = self.policy.timeout.as_secs(),
                    "Identity lookup timed out"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Rotator that replays scripted outcomes.
    struct ScriptedRotator {
        outcomes: StdMutex<VecDeque<RotationOutcome>>,
        current_identity: Option<String>,
        delay: Duration,
        lookup_delay: Duration,
        calls: AtomicU32,
        lookups: AtomicU32,
    }

    impl ScriptedRotator {
        fn new(outcomes: Vec<RotationOutcome>) -> Self {
            Self {
                outcomes: StdMutex::new(outcomes.into()),
                current_identity: None,
                delay: Duration::ZERO,
                lookup_delay: Duration::ZERO,
                calls: AtomicU32::new(0),
                lookups: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl IdentityRotator for ScriptedRotator {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn rotate(&self) -> RotationOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(RotationOutcome::failed)
        }

        async fn probe_current_identity(&self) -> Option<String> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if !self.lookup_delay.is_zero() {
                tokio::time::sleep(self.lookup_delay).await;
            }
            self.current_identity.clone()
        }
    }

    fn policy(max_attempts: u32) -> RotationPolicy {
        RotationPolicy {
            max_attempts,
            retry_delay: Duration::ZERO,
            timeout: Duration::from_secs(5),
        }
    }

    fn ok(identity: &str) -> RotationOutcome {
        RotationOutcome::succeeded(Some(identity.to_string()))
    }

    #[tokio::test]
    async fn test_fresh_identity_is_registered() {
        let rotator = Arc::new(ScriptedRotator::new(vec![ok("10.0.0.2")]));
        let registry = Arc::new(IdentityRegistry::new(50));
        let coordinator = RotationCoordinator::new(rotator.clone(), registry.clone(), policy(3));

        let result = coordinator.rotate(&CancellationToken::new()).await;
        assert_eq!(
            result,
            RotationResult::Rotated {
                identity: Some("10.0.0.2".into()),
                attempts: 1
            }
        );
        assert!(registry.contains("10.0.0.2").await);
        assert_eq!(coordinator.rotation_count(), 1);
        assert_eq!(rotator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_known_identity_triggers_another_rotation() {
        let rotator = Arc::new(ScriptedRotator::new(vec![ok("10.0.0.1"), ok("10.0.0.3")]));
        let registry = Arc::new(IdentityRegistry::new(50));
        registry.add("10.0.0.1").await;
        let coordinator = RotationCoordinator::new(rotator.clone(), registry.clone(), policy(3));

        let result = coordinator.rotate(&CancellationToken::new()).await;
        assert_eq!(
            result,
            RotationResult::Rotated {
                identity: Some("10.0.0.3".into()),
                attempts: 2
            }
        );
        assert_eq!(registry.size().await, 2);
    }

    #[tokio::test]
    async fn test_failures_retry_then_succeed() {
        let rotator = Arc::new(ScriptedRotator::new(vec![
            RotationOutcome::failed(),
            RotationOutcome::failed(),
            ok("10.0.0.9"),
        ]));
        let registry = Arc::new(IdentityRegistry::new(50));
        let coordinator = RotationCoordinator::new(rotator.clone(), registry, policy(5));

        let result = coordinator.rotate(&CancellationToken::new()).await;
        assert!(result.is_rotated());
        assert_eq!(coordinator.call_count(), 3);
    }

    #[tokio::test]
    async fn test_unknown_identity_falls_back_to_lookup() {
        let mut rotator = ScriptedRotator::new(vec![RotationOutcome::succeeded(None)]);
        rotator.current_identity = Some("10.0.0.7".into());
        let registry = Arc::new(IdentityRegistry::new(50));
        let coordinator = RotationCoordinator::new(Arc::new(rotator), registry.clone(), policy(3));

        coordinator.rotate(&CancellationToken::new()).await;
        assert!(registry.contains("10.0.0.7").await);
    }

    #[tokio::test]
    async fn test_slow_identity_lookup_is_bounded() {
        let mut rotator = ScriptedRotator::new(vec![RotationOutcome::succeeded(None)]);
        rotator.current_identity = Some("10.0.0.8".into());
        rotator.lookup_delay = Duration::from_secs(60);
        let registry = Arc::new(IdentityRegistry::new(50));
        let coordinator = RotationCoordinator::new(
            Arc::new(rotator),
            registry.clone(),
            RotationPolicy {
                max_attempts: 3,
                retry_delay: Duration::ZERO,
                timeout: Duration::from_millis(20),
            },
        );

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            coordinator.rotate(&CancellationToken::new()),
        )
        .await
        .expect("lookup must respect the rotation timeout");
        assert_eq!(
            result,
            RotationResult::Rotated {
                identity: None,
                attempts: 1
            }
        );
        assert_eq!(registry.size().await, 0);
    }

    #[tokio::test]
    async fn test_no_second_lookup_after_rotator_looked_up() {
        let mut rotator =
            ScriptedRotator::new(vec![RotationOutcome::succeeded_after_lookup(None)]);
        rotator.current_identity = Some("10.0.0.7".into());
        let rotator = Arc::new(rotator);
        let registry = Arc::new(IdentityRegistry::new(50));
        let coordinator = RotationCoordinator::new(rotator.clone(), registry.clone(), policy(3));

        let result = coordinator.rotate(&CancellationToken::new()).await;
        assert_eq!(
            result,
            RotationResult::Rotated {
                identity: None,
                attempts: 1
            }
        );
        assert_eq!(rotator.lookups.load(Ordering::SeqCst), 0);
        assert_eq!(registry.size().await, 0);
    }

    #[tokio::test]
    async fn test_unobservable_identity_still_counts_as_rotated() {
        let rotator = Arc::new(ScriptedRotator::new(vec![RotationOutcome::succeeded(None)]));
        let registry = Arc::new(IdentityRegistry::new(50));
        let coordinator = RotationCoordinator::new(rotator, registry.clone(), policy(3));

        let result = coordinator.rotate(&CancellationToken::new()).await;
        assert_eq!(
            result,
            RotationResult::Rotated {
                identity: None,
                attempts: 1
            }
        );
        assert_eq!(registry.size().await, 0);
    }

    #[tokio::test]
    async fn test_exhaustion_latches_degraded() {
        let rotator = Arc::new(ScriptedRotator::new(vec![]));
        let registry = Arc::new(IdentityRegistry::new(50));
        let coordinator = RotationCoordinator::new(rotator.clone(), registry, policy(3));
        let cancel = CancellationToken::new();

        assert_eq!(
            coordinator.rotate(&cancel).await,
            RotationResult::Exhausted { attempts: 3 }
        );
        assert!(coordinator.is_degraded());

        assert_eq!(coordinator.rotate(&cancel).await, RotationResult::Skipped);
        assert_eq!(rotator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_reused_identities_exhaust_bounded_loop() {
        let rotator = Arc::new(ScriptedRotator::new(vec![ok("a"), ok("a"), ok("a"), ok("a")]));
        let registry = Arc::new(IdentityRegistry::new(50));
        registry.add("a").await;
        let coordinator = RotationCoordinator::new(rotator.clone(), registry, policy(3));

        let result = coordinator.rotate(&CancellationToken::new()).await;
        assert_eq!(result, RotationResult::Exhausted { attempts: 3 });
        assert_eq!(rotator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let mut rotator = ScriptedRotator::new(vec![ok("slow")]);
        rotator.delay = Duration::from_millis(200);
        let coordinator = RotationCoordinator::new(
            Arc::new(rotator),
            Arc::new(IdentityRegistry::new(50)),
            RotationPolicy {
                max_attempts: 1,
                retry_delay: Duration::ZERO,
                timeout: Duration::from_millis(20),
            },
        );

        let result = coordinator.rotate(&CancellationToken::new()).await;
        assert_eq!(result, RotationResult::Exhausted { attempts: 1 });
    }

    #[tokio::test]
    async fn test_disabled_rotator_is_skipped() {
        let coordinator = RotationCoordinator::new(
            Arc::new(super::super::DisabledRotator),
            Arc::new(IdentityRegistry::new(50)),
            policy(3),
        );
        assert_eq!(
            coordinator.rotate(&CancellationToken::new()).await,
            RotationResult::Skipped
        );
        assert_eq!(coordinator.call_count(), 0);
        assert!(coordinator.is_degraded());
    }

    #[tokio::test]
    async fn test_cancelled_before_rotation() {
        let rotator = Arc::new(ScriptedRotator::new(vec![ok("x")]));
        let coordinator =
            RotationCoordinator::new(rotator.clone(), Arc::new(IdentityRegistry::new(50)), policy(3));
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(coordinator.rotate(&cancel).await, RotationResult::Cancelled);
        assert_eq!(rotator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rotations_are_serialized() {
        let mut rotator = ScriptedRotator::new(vec![ok("a"), ok("b")]);
        rotator.delay = Duration::from_millis(30);
        let coordinator = Arc::new(RotationCoordinator::new(
            Arc::new(rotator),
            Arc::new(IdentityRegistry::new(50)),
            policy(3),
        ));

        let first = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.rotate(&CancellationToken::new()).await })
        };
        let second = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.rotate(&CancellationToken::new()).await })
        };

        let mut identities = vec![first.await.unwrap(), second.await.unwrap()]
            .into_iter()
            .filter_map(|r| match r {
                RotationResult::Rotated { identity, .. } => identity,
                _ => None,
            })
            .collect::<Vec<_>>();
        identities.sort();
        assert_eq!(identities, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(coordinator.registry().size().await, 2);
    }
}

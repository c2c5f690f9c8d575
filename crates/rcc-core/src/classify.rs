//! Taxonomy-driven error classification.
//!
//! Two-level dispatch: configuration overrides by `(adapterType, httpStatus)`
//! first, then the built-in table keyed by error kind and status. The output
//! is a [`RecoveryAction`] value the scheduler executes like a table row; no
//! retry logic lives here.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;

use rcc_provider_core::{
    AdapterError, AdapterErrorKind, ErrorActionConfig, ErrorOverride, ProviderKind,
    SchedulerConfig,
};

const RATE_LIMIT_FALLBACK: Duration = Duration::from_secs(60);
const NETWORK_MAX_RETRIES: u32 = 3;
const SERVER_ERROR_MAX_RETRIES: u32 = 2;
const TIMEOUT_MAX_RETRIES: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Sleep `delay`, then re-invoke the same pipeline.
    Retry { delay: Duration, max_attempts: u32 },
    /// Move to another pipeline; optionally cool the current one down.
    Failover { destroy_current: bool },
    BlacklistTemporary { duration: Duration },
    BlacklistPermanent,
    Maintenance,
    /// Return the error to the caller unchanged.
    Surface,
}

/// Inputs beyond the error itself: which adapter failed and what the
/// scheduler has already tried on this pipeline within the current request.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyInput<'a> {
    pub error: &'a AdapterError,
    pub adapter_kind: ProviderKind,
    pub oauth: bool,
    /// A forced token refresh has already been spent on this pipeline.
    pub auth_retry_used: bool,
    /// Same-pipeline retries already performed for this hop.
    pub retry_count: u32,
}

pub struct ErrorClassifier {
    overrides: HashMap<(ProviderKind, u16), ErrorActionConfig>,
    base_delay: Duration,
    max_delay: Duration,
}

impl ErrorClassifier {
    pub fn new(overrides: &[ErrorOverride], scheduler: &SchedulerConfig) -> Self {
        let overrides = overrides
            .iter()
            .map(|o| ((o.adapter_type, o.http_status), o.action.clone()))
            .collect();
        Self {
            overrides,
            base_delay: scheduler.retry_base_delay(),
            max_delay: scheduler.retry_max_delay(),
        }
    }

    pub fn classify(&self, input: ClassifyInput<'_>) -> RecoveryAction {
        let error = input.error;

        if let Some(status) = error.http_status
            && let Some(action) = self.overrides.get(&(input.adapter_kind, status))
        {
            return self.from_override(action);
        }

        match error.kind {
            AdapterErrorKind::Cancelled => RecoveryAction::Surface,

            AdapterErrorKind::RateLimited => RecoveryAction::BlacklistTemporary {
                duration: error.retry_after.unwrap_or(RATE_LIMIT_FALLBACK),
            },

            AdapterErrorKind::AuthExpired => {
                if input.oauth && !input.auth_retry_used {
                    // One shot on the same pipeline after a forced refresh.
                    RecoveryAction::Retry {
                        delay: Duration::ZERO,
                        max_attempts: 1,
                    }
                } else {
                    RecoveryAction::Maintenance
                }
            }

            AdapterErrorKind::AuthInvalid => RecoveryAction::BlacklistPermanent,

            AdapterErrorKind::InvalidRequest => RecoveryAction::Surface,

            AdapterErrorKind::Network => {
                self.retry_then_failover(input.retry_count, NETWORK_MAX_RETRIES)
            }

            AdapterErrorKind::Timeout => {
                // The global deadline is enforced by the scheduler; a local
                // timeout gets one immediate re-attempt.
                if input.retry_count < TIMEOUT_MAX_RETRIES {
                    RecoveryAction::Retry {
                        delay: Duration::ZERO,
                        max_attempts: TIMEOUT_MAX_RETRIES,
                    }
                } else {
                    RecoveryAction::Failover {
                        destroy_current: false,
                    }
                }
            }

            AdapterErrorKind::Upstream => match error.http_status {
                Some(502) | Some(503) | Some(504) => {
                    self.retry_then_failover(input.retry_count, NETWORK_MAX_RETRIES)
                }
                Some(500) => self.retry_then_failover(input.retry_count, SERVER_ERROR_MAX_RETRIES),
                _ => RecoveryAction::Surface,
            },

            AdapterErrorKind::Decode | AdapterErrorKind::Unsupported => RecoveryAction::Surface,
        }
    }

    fn retry_then_failover(&self, retry_count: u32, max_retries: u32) -> RecoveryAction {
        if retry_count < max_retries {
            RecoveryAction::Retry {
                delay: self.backoff_delay(retry_count),
                max_attempts: max_retries,
            }
        } else {
            RecoveryAction::Failover {
                destroy_current: false,
            }
        }
    }

    /// `min(base * 2^attempt + jitter[0, base), max)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let backoff = base_ms.saturating_mul(1u64 << attempt.min(16));
        let jitter = if base_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..base_ms)
        };
        Duration::from_millis(backoff.saturating_add(jitter).min(max_ms))
    }

    fn from_override(&self, action: &ErrorActionConfig) -> RecoveryAction {
        match action {
            ErrorActionConfig::Retry {
                delay_ms,
                max_attempts,
            } => RecoveryAction::Retry {
                delay: Duration::from_millis(*delay_ms),
                max_attempts: *max_attempts,
            },
            ErrorActionConfig::Failover { destroy_current } => RecoveryAction::Failover {
                destroy_current: *destroy_current,
            },
            ErrorActionConfig::BlacklistTemporary { duration_ms } => {
                RecoveryAction::BlacklistTemporary {
                    duration: Duration::from_millis(*duration_ms),
                }
            }
            ErrorActionConfig::BlacklistPermanent => RecoveryAction::BlacklistPermanent,
            ErrorActionConfig::Maintenance => RecoveryAction::Maintenance,
            ErrorActionConfig::Surface => RecoveryAction::Surface,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ErrorClassifier {
        ErrorClassifier::new(&[], &SchedulerConfig::default())
    }

    fn input<'a>(error: &'a AdapterError) -> ClassifyInput<'a> {
        ClassifyInput {
            error,
            adapter_kind: ProviderKind::OpenAI,
            oauth: false,
            auth_retry_used: false,
            retry_count: 0,
        }
    }

    #[test]
    fn rate_limit_blacklists_for_retry_after() {
        let mut err = AdapterError::from_status(429, false, None, None);
        err.retry_after = Some(Duration::from_secs(30));
        assert_eq!(
            classifier().classify(input(&err)),
            RecoveryAction::BlacklistTemporary {
                duration: Duration::from_secs(30)
            }
        );

        let bare = AdapterError::from_status(429, false, None, None);
        assert_eq!(
            classifier().classify(input(&bare)),
            RecoveryAction::BlacklistTemporary {
                duration: RATE_LIMIT_FALLBACK
            }
        );
    }

    #[test]
    fn oauth_401_retries_once_then_goes_to_maintenance() {
        let err = AdapterError::from_status(401, true, None, None);
        let first = ClassifyInput {
            oauth: true,
            ..input(&err)
        };
        assert!(matches!(
            classifier().classify(first),
            RecoveryAction::Retry { delay, max_attempts: 1 } if delay.is_zero()
        ));

        let second = ClassifyInput {
            oauth: true,
            auth_retry_used: true,
            ..input(&err)
        };
        assert_eq!(classifier().classify(second), RecoveryAction::Maintenance);
    }

    #[test]
    fn static_key_auth_failure_is_permanent() {
        let err = AdapterError::from_status(403, false, None, None);
        assert_eq!(
            classifier().classify(input(&err)),
            RecoveryAction::BlacklistPermanent
        );
    }

    #[test]
    fn bad_gateway_retries_then_fails_over() {
        let err = AdapterError::from_status(503, false, None, None);
        for retry_count in 0..3 {
            let action = classifier().classify(ClassifyInput {
                retry_count,
                ..input(&err)
            });
            assert!(matches!(action, RecoveryAction::Retry { .. }), "{retry_count}");
        }
        assert_eq!(
            classifier().classify(ClassifyInput {
                retry_count: 3,
                ..input(&err)
            }),
            RecoveryAction::Failover {
                destroy_current: false
            }
        );
    }

    #[test]
    fn schema_violations_surface_without_retry() {
        let err = AdapterError::from_status(400, false, Some("bad schema".into()), None);
        assert_eq!(classifier().classify(input(&err)), RecoveryAction::Surface);
    }

    #[test]
    fn cancellation_is_never_reclassified() {
        let err = AdapterError::cancelled();
        assert_eq!(classifier().classify(input(&err)), RecoveryAction::Surface);
    }

    #[test]
    fn overrides_win_over_the_builtin_table() {
        let overrides = vec![ErrorOverride {
            adapter_type: ProviderKind::OpenAI,
            http_status: 500,
            action: ErrorActionConfig::Surface,
        }];
        let classifier = ErrorClassifier::new(&overrides, &SchedulerConfig::default());
        let err = AdapterError::from_status(500, false, None, None);
        assert_eq!(classifier.classify(input(&err)), RecoveryAction::Surface);
    }

    #[test]
    fn backoff_is_exponential_with_bounded_jitter() {
        let classifier = classifier();
        for attempt in 0..6 {
            let delay = classifier.backoff_delay(attempt).as_millis() as u64;
            let floor = 1_000u64 << attempt;
            assert!(delay >= floor.min(10_000), "attempt {attempt}: {delay}");
            assert!(delay <= 10_000, "attempt {attempt}: {delay}");
        }
    }
}

//! Applies classifier verdicts to pool state.
//!
//! All pool mutations funnel through the pool's write lock, so the
//! classify-then-apply sequence is atomic from the pool's point of view. The
//! coordinator never swallows an error: it adjusts state and returns, and the
//! scheduler decides whether another attempt happens.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::time::Instant;

use crate::classify::RecoveryAction;
use crate::pipeline::Pipeline;
use crate::pool::{FAILOVER_COOLDOWN, PipelinePool, UnavailableKind};

use rcc_provider_core::AdapterErrorKind;

#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryCoordinator;

impl RecoveryCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// Apply `action` for a failed attempt on `pipeline`. `excluded` is the
    /// request-local failover set: every non-retry action bars the pipeline
    /// from reselection within the same request.
    pub async fn apply(
        &self,
        pool: &Arc<PipelinePool>,
        pipeline: &Arc<Pipeline>,
        error_kind: AdapterErrorKind,
        action: &RecoveryAction,
        excluded: &mut HashSet<usize>,
    ) {
        let index = pipeline.index();
        match action {
            RecoveryAction::Retry { .. } => {}

            RecoveryAction::Surface => {}

            RecoveryAction::Failover { destroy_current } => {
                excluded.insert(index);
                if *destroy_current {
                    pool.mark_unavailable(
                        index,
                        Some(Instant::now() + FAILOVER_COOLDOWN),
                        UnavailableKind::FailoverCooldown,
                    )
                    .await;
                }
            }

            RecoveryAction::BlacklistTemporary { duration } => {
                excluded.insert(index);
                pool.mark_unavailable(
                    index,
                    Some(Instant::now() + *duration),
                    unavailable_kind_for(error_kind),
                )
                .await;
            }

            RecoveryAction::BlacklistPermanent => {
                excluded.insert(index);
                pool.mark_unavailable(index, None, unavailable_kind_for(error_kind))
                    .await;
            }

            RecoveryAction::Maintenance => {
                excluded.insert(index);
                pool.mark_maintenance(index).await;
                self.spawn_reauth(pool.clone(), pipeline.clone());
            }
        }
    }

    /// Kick the adapter's reauthentication off the request path. Success
    /// returns the pipeline to rotation; failure leaves it in maintenance
    /// until an external reload.
    fn spawn_reauth(&self, pool: Arc<PipelinePool>, pipeline: Arc<Pipeline>) {
        tokio::spawn(async move {
            let ctx = pipeline.internal_context("reauth");
            match pipeline.adapter().refresh_auth(&ctx).await {
                Ok(()) => {
                    tracing::info!(pipeline = pipeline.id(), "reauthentication succeeded");
                    pool.reinstate(pipeline.index()).await;
                }
                Err(err) => {
                    tracing::warn!(
                        pipeline = pipeline.id(),
                        error = %err,
                        "reauthentication failed; pipeline stays in maintenance"
                    );
                }
            }
        });
    }
}

fn unavailable_kind_for(error_kind: AdapterErrorKind) -> UnavailableKind {
    match error_kind {
        AdapterErrorKind::RateLimited => UnavailableKind::RateLimit,
        AdapterErrorKind::Timeout => UnavailableKind::Timeout,
        AdapterErrorKind::AuthExpired | AdapterErrorKind::AuthInvalid => {
            UnavailableKind::AuthInvalid
        }
        _ => UnavailableKind::UpstreamError,
    }
}

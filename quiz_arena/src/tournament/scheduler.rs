//! Discovery loop and per-tournament timers.
//!
//! A periodic discovery pass arms a timer task for every tournament whose
//! `next_wake_at` has passed. The timer steps the tournament, then sleeps
//! until the next persisted wake time, until the tournament completes. The
//! same pass re-arms tournaments left behind by a restart or a failed step.

use super::manager::TournamentResult;
use super::models::TournamentId;
use super::orchestrator::{StepOutcome, TournamentOrchestrator};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::interval;

/// Removes a tournament from the armed set when its timer task ends or is
/// aborted
struct ArmedGuard {
    armed: Arc<Mutex<HashSet<TournamentId>>>,
    id: TournamentId,
}

impl Drop for ArmedGuard {
    fn drop(&mut self) {
        self.armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Tournament scheduler
pub struct TournamentScheduler {
    orchestrator: Arc<TournamentOrchestrator>,
    armed: Arc<Mutex<HashSet<TournamentId>>>,
}

impl TournamentScheduler {
    pub fn new(orchestrator: Arc<TournamentOrchestrator>) -> Self {
        Self {
            orchestrator,
            armed: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn orchestrator(&self) -> &Arc<TournamentOrchestrator> {
        &self.orchestrator
    }

    /// Tournaments with a live timer task
    pub fn armed_count(&self) -> usize {
        self.armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run discovery until `shutdown` flips to `true`. Live timer tasks are
    /// aborted on shutdown; the next process's discovery pass picks their
    /// tournaments up again.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.orchestrator.config().discovery_interval;
        log::info!("Tournament discovery running every {:?}", period);

        let mut ticker = interval(period);
        let mut timers = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.discovery_pass(&mut timers, Utc::now()).await {
                        Ok(0) => {}
                        Ok(armed) => log::debug!("Discovery armed {} tournament timers", armed),
                        Err(e) => log::error!("Tournament discovery failed: {}", e),
                    }
                }

                Some(joined) = timers.join_next(), if !timers.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            log::error!("Tournament timer task panicked: {}", e);
                        }
                    }
                }

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let live = timers.len();
        timers.shutdown().await;
        log::info!("Tournament discovery stopped, {} timers dropped", live);
    }

    /// Arm a timer for every due tournament that does not already have one.
    ///
    /// # Returns
    ///
    /// Number of timers armed by this pass
    pub async fn discovery_pass(
        self: &Arc<Self>,
        timers: &mut JoinSet<()>,
        now: DateTime<Utc>,
    ) -> TournamentResult<usize> {
        let due = self.orchestrator.due(now).await?;

        let mut armed = 0;
        for tournament in due {
            let Some(guard) = self.arm(tournament.id) else {
                continue;
            };
            log::debug!(
                "Arming timer for tournament {} ({})",
                tournament.id,
                tournament.status
            );
            let scheduler = Arc::clone(self);
            timers.spawn(async move { scheduler.drive(guard).await });
            armed += 1;
        }
        Ok(armed)
    }

    fn arm(&self, id: TournamentId) -> Option<ArmedGuard> {
        let mut armed = self.armed.lock().unwrap_or_else(PoisonError::into_inner);
        if !armed.insert(id) {
            return None;
        }
        Some(ArmedGuard {
            armed: Arc::clone(&self.armed),
            id,
        })
    }

    /// Timer chain for one tournament. Ends on completion, on a lost race or
    /// on error; discovery re-arms the tournament if it is still due.
    async fn drive(&self, guard: ArmedGuard) {
        let id = guard.id;
        loop {
            let wake = match self.orchestrator.step(id, Utc::now()).await {
                Ok(StepOutcome::Advanced {
                    next_wake_at: Some(wake),
                    ..
                })
                | Ok(StepOutcome::NotDue { next_wake_at: wake }) => wake,
                Ok(StepOutcome::Advanced {
                    next_wake_at: None,
                    ..
                })
                | Ok(StepOutcome::Unchanged) => break,
                Err(e) => {
                    log::error!("Tournament {} step failed: {}", id, e);
                    break;
                }
            };

            let delay = (wake - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(delay).await;
        }
        drop(guard);
    }
}

//! Incremental sync decision: whether this run crawls and whether it uploads.

use anyhow::Result;
use billtrack_core::{CountObservation, SyncDecision, SyncState};
use billtrack_storage::StateStore;
use chrono::Utc;
use tracing::{info, warn};

use crate::ProbeFailurePolicy;

/// Crawl when the site lists more signed bills than the index holds; upload only into an empty
/// index. `force` turns both on.
///
/// A non-empty index therefore never receives records crawled by the same run. Callers report
/// those as deferred.
pub fn decide(source: u64, destination: u64, force: bool) -> SyncDecision {
    SyncDecision {
        should_crawl: force || source > destination,
        should_upload: force || destination == 0,
        source_count: source,
        destination_count: destination,
        forced: force,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
    pub decision: SyncDecision,
    pub previous: Option<SyncState>,
    /// Set when the failure policy cancelled the run.
    pub skipped_reason: Option<String>,
}

/// Applies [`decide`] to probe observations and records the source count for the next run.
#[derive(Debug, Clone)]
pub struct SyncGate {
    state: StateStore,
    policy: ProbeFailurePolicy,
}

impl SyncGate {
    pub fn new(state: StateStore, policy: ProbeFailurePolicy) -> Self {
        Self { state, policy }
    }

    pub async fn previous_state(&self) -> Option<SyncState> {
        let previous = self.state.load_sync_state().await;
        match &previous {
            Some(state) => info!(
                count = state.last_known_source_count,
                last_updated = %state.last_updated,
                "previous bill count"
            ),
            None => info!(count = -1, "no previous bill count"),
        }
        previous
    }

    pub async fn evaluate(
        &self,
        source: &CountObservation,
        destination: &CountObservation,
        force: bool,
    ) -> Result<GateOutcome> {
        let previous = self.previous_state().await;

        let unavailable: Vec<String> = [("source", source), ("destination", destination)]
            .into_iter()
            .filter(|(_, obs)| !obs.is_available())
            .map(|(name, obs)| format!("{name} count {obs}"))
            .collect();

        let skip =
            !force && !unavailable.is_empty() && self.policy == ProbeFailurePolicy::SkipRun;
        let (decision, skipped_reason) = if skip {
            let reason = unavailable.join("; ");
            warn!(reason = %reason, "count probe failed; skipping run");
            let mut decision = decide(
                source.count().unwrap_or(0),
                destination.count().unwrap_or(0),
                false,
            );
            decision.should_crawl = false;
            decision.should_upload = false;
            (decision, Some(reason))
        } else {
            for reason in &unavailable {
                warn!(reason = %reason, "count probe failed; assuming zero");
            }
            let decision = decide(
                source.count().unwrap_or(0),
                destination.count().unwrap_or(0),
                force,
            );
            (decision, None)
        };

        info!(
            source = %source,
            destination = %destination,
            should_crawl = decision.should_crawl,
            should_upload = decision.should_upload,
            forced = decision.forced,
            "sync decision"
        );

        match source.count() {
            Some(count) => {
                self.state
                    .save_sync_state(&SyncState::new(count, Utc::now()))
                    .await?;
                info!(count, "updated bill count");
            }
            None => warn!("source count unavailable; keeping previous sync state"),
        }

        Ok(GateOutcome {
            decision,
            previous,
            skipped_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crawl_is_monotone_in_source_count() {
        for destination in [0u64, 1, 50, 80] {
            for source in 0u64..120 {
                let d = decide(source, destination, false);
                if d.should_crawl {
                    assert!(decide(source + 1, destination, false).should_crawl);
                }
                assert_eq!(d.should_crawl, source > destination);
                assert_eq!(d.should_upload, destination == 0);
            }
        }
    }

    #[test]
    fn force_turns_everything_on() {
        for (source, destination) in [(0, 0), (50, 50), (10, 90), (89, 80)] {
            let d = decide(source, destination, true);
            assert!(d.should_crawl && d.should_upload && d.forced);
        }
    }

    #[test]
    fn new_bills_with_populated_index_crawl_without_upload() {
        let d = decide(89, 80, false);
        assert!(d.should_crawl);
        assert!(!d.should_upload);
    }

    #[tokio::test]
    async fn gate_persists_source_count_on_every_branch() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let gate = SyncGate::new(store.clone(), ProbeFailurePolicy::AssumeZero);

        let outcome = gate
            .evaluate(&CountObservation::Observed(50), &CountObservation::Observed(50), false)
            .await
            .unwrap();
        assert!(!outcome.decision.should_crawl);
        assert!(outcome.previous.is_none());
        assert_eq!(
            store.load_sync_state().await.unwrap().last_known_source_count,
            50
        );

        let outcome = gate
            .evaluate(&CountObservation::Observed(89), &CountObservation::Observed(80), false)
            .await
            .unwrap();
        assert!(outcome.decision.should_crawl);
        assert_eq!(outcome.previous.unwrap().last_known_source_count, 50);
        assert_eq!(
            store.load_sync_state().await.unwrap().last_known_source_count,
            89
        );
    }

    #[tokio::test]
    async fn unavailable_destination_is_zero_under_default_policy() {
        let dir = tempfile::tempdir().unwrap();
        let gate = SyncGate::new(StateStore::new(dir.path()), ProbeFailurePolicy::AssumeZero);
        let outcome = gate
            .evaluate(
                &CountObservation::Observed(12),
                &CountObservation::unavailable("timeout"),
                false,
            )
            .await
            .unwrap();
        assert!(outcome.decision.should_crawl);
        assert!(outcome.decision.should_upload);
        assert!(outcome.skipped_reason.is_none());
    }

    #[tokio::test]
    async fn skip_policy_cancels_run_and_keeps_state_without_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store
            .save_sync_state(&SyncState::new(40, Utc::now()))
            .await
            .unwrap();
        let gate = SyncGate::new(store.clone(), ProbeFailurePolicy::SkipRun);

        let outcome = gate
            .evaluate(
                &CountObservation::unavailable("selector missing"),
                &CountObservation::Observed(0),
                false,
            )
            .await
            .unwrap();
        assert!(!outcome.decision.should_crawl);
        assert!(!outcome.decision.should_upload);
        assert!(outcome.skipped_reason.unwrap().contains("source count"));
        assert_eq!(
            store.load_sync_state().await.unwrap().last_known_source_count,
            40
        );
    }

    #[tokio::test]
    async fn forced_run_overrides_skip_policy() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let gate = SyncGate::new(store.clone(), ProbeFailurePolicy::SkipRun);

        let outcome = gate
            .evaluate(
                &CountObservation::Observed(50),
                &CountObservation::unavailable("503"),
                true,
            )
            .await
            .unwrap();
        assert!(outcome.decision.should_crawl);
        assert!(outcome.decision.should_upload);
        assert!(outcome.decision.forced);
        assert!(outcome.skipped_reason.is_none());
        assert_eq!(
            store.load_sync_state().await.unwrap().last_known_source_count,
            50
        );
    }
}

//! Change gate.
//!
//! Decides whether a run has anything new to merge by comparing the raw
//! entry total of the freshly grouped document with the total recorded by
//! the last run that proceeded. The recorded total only moves when the gate
//! proceeds, so repeated runs over an unchanged document stay quiet.

use crate::models::{StoreConfig, SyncState};
use crate::storage::CatalogStore;

/// Why the gate decided the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateReason {
    /// The document grew since the last recorded run
    Grew,
    /// A write was forced regardless of the counts
    Forced,
    /// Same or fewer entries than recorded
    Unchanged,
    /// Proceeding was allowed but the new total could not be recorded
    PersistFailed,
}

/// Outcome of one gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    pub proceed: bool,
    /// `new_count - stored_count`, negative when the document shrank
    pub delta: i64,
    pub stored_count: u64,
    pub new_count: u64,
    pub reason: GateReason,
}

/// Change gate bound to the state singleton location.
#[derive(Debug, Clone)]
pub struct ChangeGate {
    state_db: String,
    collection: String,
}

impl ChangeGate {
    pub fn new(state_db: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            state_db: state_db.into(),
            collection: collection.into(),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(&config.state_db, &config.state_collection)
    }

    /// Pure decision from the two totals.
    pub fn evaluate(new_count: u64, stored_count: u64, force_write: bool) -> GateDecision {
        let reason = if new_count > stored_count {
            GateReason::Grew
        } else if force_write {
            GateReason::Forced
        } else {
            GateReason::Unchanged
        };

        GateDecision {
            proceed: reason != GateReason::Unchanged,
            delta: signed_delta(new_count, stored_count),
            stored_count,
            new_count,
            reason,
        }
    }

    /// Read the stored total, decide, and record the new total on proceed.
    ///
    /// A missing or unreadable state counts as zero. The state is never
    /// touched when the gate declines.
    pub async fn check(
        &self,
        store: &dyn CatalogStore,
        new_count: u64,
        force_write: bool,
    ) -> GateDecision {
        let stored_count = match store
            .read_sync_state(&self.state_db, &self.collection)
            .await
        {
            Ok(Some(state)) => state.last_raw_entry_count,
            Ok(None) => {
                log::info!("No recorded sync state, starting from zero");
                0
            }
            Err(e) => {
                log::error!("Unable to read sync state: {}", e);
                0
            }
        };

        let mut decision = Self::evaluate(new_count, stored_count, force_write);
        if !decision.proceed {
            log::info!(
                "Change gate: UNCHANGED ({} entries, recorded {})",
                new_count,
                stored_count
            );
            return decision;
        }

        if let Err(e) = store
            .replace_sync_state(&self.state_db, &self.collection, &SyncState::new(new_count))
            .await
        {
            log::error!("Unable to record sync state, skipping merge: {}", e);
            decision.proceed = false;
            decision.reason = GateReason::PersistFailed;
            return decision;
        }

        match decision.reason {
            GateReason::Forced => log::info!(
                "Change gate: FORCED ({} entries, recorded {})",
                new_count,
                stored_count
            ),
            _ => log::info!(
                "Change gate: PROCEED ({} entries, {:+} since last run)",
                new_count,
                decision.delta
            ),
        }
        decision
    }
}

fn signed_delta(new_count: u64, stored_count: u64) -> i64 {
    let new = i64::try_from(new_count).unwrap_or(i64::MAX);
    let stored = i64::try_from(stored_count).unwrap_or(i64::MAX);
    new - stored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    const DB: &str = "usersdb";
    const COLLECTION: &str = "pkgcount";

    async fn store_with_state(count: Option<u64>) -> MemoryStore {
        let store = MemoryStore::new();
        store.connect().await.unwrap();
        if let Some(count) = count {
            store
                .replace_sync_state(DB, COLLECTION, &SyncState::new(count))
                .await
                .unwrap();
        }
        store
    }

    fn gate() -> ChangeGate {
        ChangeGate::new(DB, COLLECTION)
    }

    #[test]
    fn test_evaluate() {
        let grew = ChangeGate::evaluate(12, 10, false);
        assert!(grew.proceed);
        assert_eq!(grew.delta, 2);
        assert_eq!(grew.reason, GateReason::Grew);

        let same = ChangeGate::evaluate(10, 10, false);
        assert!(!same.proceed);
        assert_eq!(same.delta, 0);

        let shrank = ChangeGate::evaluate(8, 10, false);
        assert!(!shrank.proceed);
        assert_eq!(shrank.delta, -2);

        let forced = ChangeGate::evaluate(8, 10, true);
        assert!(forced.proceed);
        assert_eq!(forced.reason, GateReason::Forced);
    }

    #[tokio::test]
    async fn test_proceed_records_new_count() {
        let store = store_with_state(Some(10)).await;

        let decision = gate().check(&store, 12, false).await;

        assert!(decision.proceed);
        assert_eq!(decision.delta, 2);
        assert_eq!(
            store.sync_state(DB, COLLECTION).unwrap().last_raw_entry_count,
            12
        );
    }

    #[tokio::test]
    async fn test_decline_leaves_state_untouched() {
        let store = store_with_state(Some(10)).await;
        let before = store.sync_state(DB, COLLECTION).unwrap();

        let decision = gate().check(&store, 10, false).await;

        assert!(!decision.proceed);
        assert_eq!(store.sync_state(DB, COLLECTION).unwrap(), before);
    }

    #[tokio::test]
    async fn test_missing_state_counts_as_zero() {
        let store = store_with_state(None).await;

        let decision = gate().check(&store, 5, false).await;

        assert!(decision.proceed);
        assert_eq!(decision.stored_count, 0);
        assert_eq!(decision.delta, 5);
    }

    #[tokio::test]
    async fn test_empty_document_never_proceeds_on_fresh_state() {
        let store = store_with_state(None).await;

        let decision = gate().check(&store, 0, false).await;

        assert!(!decision.proceed);
        assert!(store.sync_state(DB, COLLECTION).is_none());
    }

    #[tokio::test]
    async fn test_recorded_total_is_monotonic_without_force() {
        let store = store_with_state(None).await;

        for count in [5, 9, 7, 9, 3, 11] {
            gate().check(&store, count, false).await;
        }

        assert_eq!(
            store.sync_state(DB, COLLECTION).unwrap().last_raw_entry_count,
            11
        );
    }

    #[tokio::test]
    async fn test_forced_write_records_smaller_total() {
        let store = store_with_state(Some(20)).await;

        let decision = gate().check(&store, 15, true).await;

        assert!(decision.proceed);
        assert_eq!(decision.delta, -5);
        assert_eq!(
            store.sync_state(DB, COLLECTION).unwrap().last_raw_entry_count,
            15
        );
    }

    #[tokio::test]
    async fn test_persist_failure_declines() {
        // A disconnected store rejects every operation.
        let store = MemoryStore::new();

        let decision = gate().check(&store, 5, false).await;

        assert!(!decision.proceed);
        assert_eq!(decision.reason, GateReason::PersistFailed);
    }
}

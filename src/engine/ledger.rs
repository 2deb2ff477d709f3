//! Wager ledger.
//!
//! The single source of truth for wagers we believe are open, keyed by the
//! client-generated `external_id`. Every operation takes the lock for one
//! short, non-async critical section, so transitions on a key are atomic
//! and never interleave, and no caller holds the lock across an exchange
//! call.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::realtime::{WagerUpdate, WagerUpdateKind};
use crate::types::{Wager, WagerStatus};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("no open wager with external id {0}")]
    NotFound(String),

    #[error("wager {0} is already in the ledger")]
    Duplicate(String),

    #[error("wager {external_id} cannot be cancelled while {status}")]
    NotCancellable {
        external_id: String,
        status: WagerStatus,
    },
}

/// What a push reconciliation did to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// Pending entry confirmed with the server id from the push.
    Confirmed,
    /// Entry reached a terminal state on the exchange and was dropped.
    Removed,
    /// Nothing to do (unknown key or state already consistent).
    Unchanged,
}

struct Entry {
    seq: u64,
    wager: Wager,
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    entries: HashMap<String, Entry>,
}

#[derive(Default)]
pub struct WagerLedger {
    inner: Mutex<Inner>,
}

impl WagerLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a placement request at the moment it is issued.
    pub fn record_pending(&self, external_id: &str) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(external_id) {
            return Err(LedgerError::Duplicate(external_id.to_string()));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            external_id.to_string(),
            Entry {
                seq,
                wager: Wager {
                    external_id: external_id.to_string(),
                    wager_id: None,
                    status: WagerStatus::Pending,
                    created_at: Utc::now(),
                },
            },
        );
        Ok(())
    }

    /// Attach the server id after a successful placement.
    ///
    /// Idempotent: confirming an entry a push update already confirmed
    /// leaves it as is.
    pub fn confirm_placed(&self, external_id: &str, wager_id: &str) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock();
        let entry = inner
            .entries
            .get_mut(external_id)
            .ok_or_else(|| LedgerError::NotFound(external_id.to_string()))?;

        let wager = &mut entry.wager;
        if wager.status == WagerStatus::Pending {
            wager.status = WagerStatus::Placed;
        }
        if wager.wager_id.is_none() {
            wager.wager_id = Some(wager_id.to_string());
        } else if wager.wager_id.as_deref() != Some(wager_id) {
            warn!(
                external_id,
                known = ?wager.wager_id,
                confirmed = wager_id,
                "Placement confirmed with a different wager id"
            );
        }
        Ok(())
    }

    /// Drop an entry whose placement failed.
    pub fn mark_rejected(&self, external_id: &str) -> Option<Wager> {
        self.inner.lock().entries.remove(external_id).map(|e| Wager {
            status: WagerStatus::Rejected,
            ..e.wager
        })
    }

    /// Move a placed wager to `cancel_requested` and return its server id.
    ///
    /// `NotFound` means the wager was already resolved; callers treat it as
    /// nothing to do.
    pub fn request_cancel(&self, external_id: &str) -> Result<String, LedgerError> {
        let mut inner = self.inner.lock();
        let entry = inner
            .entries
            .get_mut(external_id)
            .ok_or_else(|| LedgerError::NotFound(external_id.to_string()))?;

        let wager = &mut entry.wager;
        match (wager.status, wager.wager_id.clone()) {
            (WagerStatus::Placed, Some(id)) => {
                wager.status = WagerStatus::CancelRequested;
                Ok(id)
            }
            (status, _) => Err(LedgerError::NotCancellable {
                external_id: external_id.to_string(),
                status,
            }),
        }
    }

    /// Remove a wager whose cancellation succeeded (or was already done).
    pub fn confirm_cancelled(&self, external_id: &str) -> Option<Wager> {
        self.inner.lock().entries.remove(external_id).map(|e| Wager {
            status: WagerStatus::Cancelled,
            ..e.wager
        })
    }

    /// Revert a failed cancellation so a later pass can retry it.
    pub fn cancel_failed(&self, external_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(external_id) {
            if entry.wager.status == WagerStatus::CancelRequested {
                entry.wager.status = WagerStatus::Placed;
            }
        }
    }

    /// Apply a wager status pushed on the private channel.
    pub fn reconcile(&self, update: &WagerUpdate) -> Reconciled {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.get_mut(&update.external_id) else {
            debug!(external_id = %update.external_id, "Push for unknown wager ignored");
            return Reconciled::Unchanged;
        };

        match update.kind() {
            WagerUpdateKind::Open => {
                let wager = &mut entry.wager;
                match (&update.wager_id, wager.status) {
                    (Some(id), WagerStatus::Pending) => {
                        wager.wager_id = Some(id.clone());
                        wager.status = WagerStatus::Placed;
                        Reconciled::Confirmed
                    }
                    _ => Reconciled::Unchanged,
                }
            }
            WagerUpdateKind::Closed => {
                inner.entries.remove(&update.external_id);
                Reconciled::Removed
            }
            WagerUpdateKind::Other => Reconciled::Unchanged,
        }
    }

    /// Point-in-time copy of every key, in insertion order.
    pub fn snapshot_keys(&self) -> Vec<String> {
        self.snapshot().into_iter().map(|w| w.external_id).collect()
    }

    /// Point-in-time copy of every record, in insertion order.
    pub fn snapshot(&self) -> Vec<Wager> {
        let inner = self.inner.lock();
        let mut entries: Vec<_> = inner.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.wager.clone()).collect()
    }

    pub fn get(&self, external_id: &str) -> Option<Wager> {
        self.inner
            .lock()
            .entries
            .get(external_id)
            .map(|e| e.wager.clone())
    }

    pub fn count_with_status(&self, status: WagerStatus) -> usize {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|e| e.wager.status == status)
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

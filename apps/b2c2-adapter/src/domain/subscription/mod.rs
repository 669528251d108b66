//! Subscription State
//!
//! Tracks the per-instrument subscription protocol state shared between
//! request-issuing callers and the single receive loop:
//!
//! - at most one pending subscribe **or** unsubscribe request per
//!   instrument, correlated to its acknowledgement by tag;
//! - at most one active (installed) price handler per instrument.
//!
//! Instruments are identified throughout by their wire name; resolution
//! to canonical names happens in the layers above.
//!
//! # Settling exactly once
//!
//! Each pending request carries a `tokio::sync::oneshot` result cell.
//! Settling is defined as removing the pending entry from the map while
//! holding the registry mutex and consuming its sender: whichever of the
//! acknowledgement path and the timeout path removes the entry first wins,
//! and the loser observes the missing entry and does nothing. The cell can
//! therefore never be resolved twice.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::domain::orderbook::PriceUpdate;

// =============================================================================
// Depth Levels
// =============================================================================

/// Requested depth tiers per side of a subscription.
///
/// B2C2 accepts one or two positive tier counts; anything else is rejected
/// before a frame is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Levels(Vec<u32>);

/// Invalid depth-levels specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LevelsError {
    /// The list must contain one or two entries.
    #[error("levels must contain one or two entries, got {0}")]
    InvalidCount(usize),
    /// Every entry must be a positive tier count.
    #[error("levels entries must be positive")]
    ZeroDepth,
}

impl Levels {
    /// Validate and wrap a depth-levels list.
    ///
    /// # Errors
    ///
    /// Returns `LevelsError` if the list is empty, longer than two
    /// entries, or contains a zero.
    pub fn new(levels: Vec<u32>) -> Result<Self, LevelsError> {
        if levels.is_empty() || levels.len() > 2 {
            return Err(LevelsError::InvalidCount(levels.len()));
        }
        if levels.contains(&0) {
            return Err(LevelsError::ZeroDepth);
        }
        Ok(Self(levels))
    }

    /// The validated tier counts.
    #[must_use]
    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    /// Copy out the tier counts for the wire request.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u32> {
        self.0.clone()
    }
}

/// One configured market-data subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentSubscription {
    /// Canonical instrument name (e.g. `"BTCUSD"`).
    pub instrument: String,
    /// Depth tiers to request per side.
    pub levels: Levels,
}

// =============================================================================
// Price Handler
// =============================================================================

/// Error type surfaced by a price handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Per-instrument consumer of dispatched price updates.
///
/// Installed by a successful subscribe and invoked by the receive loop for
/// every price frame of that instrument until unsubscribed.
#[async_trait]
pub trait PriceHandler: Send + Sync {
    /// Consume one decoded price update.
    async fn on_price_update(&self, update: PriceUpdate) -> Result<(), HandlerError>;
}

// =============================================================================
// Pending Requests
// =============================================================================

/// Kind of an outstanding protocol request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// A subscribe handshake.
    Subscribe,
    /// An unsubscribe handshake.
    Unsubscribe,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscribe => f.write_str("subscribe"),
            Self::Unsubscribe => f.write_str("unsubscribe"),
        }
    }
}

/// Failure delivered through a pending request's result cell.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AckFailure {
    /// The venue answered the request with `success: false`.
    #[error("request rejected by the venue")]
    Rejected {
        /// Venue-supplied rejection detail, if any.
        reason: Option<String>,
    },
    /// An acknowledgement arrived whose tag did not match the request.
    #[error("acknowledgement tag did not match the pending request")]
    TagMismatch,
    /// The session was torn down before an acknowledgement arrived.
    #[error("session closed before the request was acknowledged")]
    SessionClosed,
}

/// Outcome carried by a pending request's result cell.
pub type AckResult = Result<(), AckFailure>;

/// Why a request could not be registered. No frame is sent in these cases.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BeginError {
    /// Another request is still awaiting its acknowledgement.
    #[error("a {kind} request is already pending for {instrument}")]
    RequestPending {
        /// Wire instrument of the outstanding request.
        instrument: String,
        /// Kind of the outstanding request.
        kind: RequestKind,
    },
    /// The instrument already has an installed handler.
    #[error("{0} already has an active subscription")]
    AlreadyActive(String),
    /// Unsubscribe requires an installed handler.
    #[error("{0} has no active subscription")]
    NotActive(String),
}

/// Disposition of an inbound acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Settled successfully; registry state transitioned.
    Accepted,
    /// Settled with a venue rejection; registry state untouched.
    Rejected,
    /// Settled with a correlation-tag mismatch.
    TagMismatch,
    /// No matching pending request: a late or unsolicited acknowledgement.
    NoPending,
}

struct PendingRequest {
    kind: RequestKind,
    tag: String,
    handler: Option<Arc<dyn PriceHandler>>,
    cell: oneshot::Sender<AckResult>,
}

#[derive(Default)]
struct RegistryState {
    /// Outstanding requests, keyed by wire instrument.
    pending: HashMap<String, PendingRequest>,
    /// Installed handlers, keyed by wire instrument.
    active: HashMap<String, Arc<dyn PriceHandler>>,
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Mutex-guarded table of pending requests and active subscriptions.
///
/// All reads and mutations happen under one lock, so an acknowledgement
/// arriving on the receive loop and a timeout firing on a caller task can
/// never both settle the same request.
#[derive(Default)]
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending subscribe and hand back its result cell.
    ///
    /// # Errors
    ///
    /// Fails without side effects if any request is pending for the
    /// instrument or a subscription is already active.
    pub fn begin_subscribe(
        &self,
        instrument: &str,
        tag: &str,
        handler: Arc<dyn PriceHandler>,
    ) -> Result<oneshot::Receiver<AckResult>, BeginError> {
        let mut state = self.state.lock();

        if let Some(existing) = state.pending.get(instrument) {
            return Err(BeginError::RequestPending {
                instrument: instrument.to_string(),
                kind: existing.kind,
            });
        }
        if state.active.contains_key(instrument) {
            return Err(BeginError::AlreadyActive(instrument.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        state.pending.insert(
            instrument.to_string(),
            PendingRequest {
                kind: RequestKind::Subscribe,
                tag: tag.to_string(),
                handler: Some(handler),
                cell: tx,
            },
        );
        Ok(rx)
    }

    /// Register a pending unsubscribe and hand back its result cell.
    ///
    /// # Errors
    ///
    /// Fails without side effects if a request is already pending for the
    /// instrument or no subscription is active.
    pub fn begin_unsubscribe(
        &self,
        instrument: &str,
        tag: &str,
    ) -> Result<oneshot::Receiver<AckResult>, BeginError> {
        let mut state = self.state.lock();

        if let Some(existing) = state.pending.get(instrument) {
            return Err(BeginError::RequestPending {
                instrument: instrument.to_string(),
                kind: existing.kind,
            });
        }
        if !state.active.contains_key(instrument) {
            return Err(BeginError::NotActive(instrument.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        state.pending.insert(
            instrument.to_string(),
            PendingRequest {
                kind: RequestKind::Unsubscribe,
                tag: tag.to_string(),
                handler: None,
                cell: tx,
            },
        );
        Ok(rx)
    }

    /// Settle the pending request matched by an inbound acknowledgement.
    ///
    /// On an accepted subscribe the handler moves into the active table;
    /// on an accepted unsubscribe the active entry is removed. A rejected
    /// unsubscribe leaves the active handler installed, so delivery keeps
    /// flowing. A mismatched tag settles the request as failed. An ack
    /// with no matching pending entry of the same kind is reported as
    /// `NoPending` for the caller to drop with a log.
    pub fn complete(
        &self,
        instrument: &str,
        kind: RequestKind,
        tag: &str,
        success: bool,
        reason: Option<String>,
    ) -> Completion {
        let mut state = self.state.lock();

        let matches = state
            .pending
            .get(instrument)
            .is_some_and(|pending| pending.kind == kind);
        if !matches {
            return Completion::NoPending;
        }

        // Removing the entry is the settle point; the cell sender goes
        // with it, so no other path can resolve this request.
        let Some(pending) = state.pending.remove(instrument) else {
            return Completion::NoPending;
        };

        if pending.tag != tag {
            let _ = pending.cell.send(Err(AckFailure::TagMismatch));
            return Completion::TagMismatch;
        }

        if !success {
            let _ = pending.cell.send(Err(AckFailure::Rejected { reason }));
            return Completion::Rejected;
        }

        match pending.kind {
            RequestKind::Subscribe => {
                if let Some(handler) = pending.handler {
                    state.active.insert(instrument.to_string(), handler);
                }
            }
            RequestKind::Unsubscribe => {
                state.active.remove(instrument);
            }
        }

        let _ = pending.cell.send(Ok(()));
        Completion::Accepted
    }

    /// Remove a pending request after its deadline elapsed.
    ///
    /// Returns `true` if the entry was still present (the timeout settled
    /// the request) and `false` if an acknowledgement got there first.
    pub fn abandon(&self, instrument: &str, tag: &str) -> bool {
        let mut state = self.state.lock();

        let matches = state
            .pending
            .get(instrument)
            .is_some_and(|pending| pending.tag == tag);
        if matches {
            state.pending.remove(instrument);
        }
        matches
    }

    /// Installed handler for an instrument.
    #[must_use]
    pub fn handler_for(&self, instrument: &str) -> Option<Arc<dyn PriceHandler>> {
        self.state.lock().active.get(instrument).cloned()
    }

    /// Wire names of all active subscriptions, unordered.
    #[must_use]
    pub fn active_instruments(&self) -> Vec<String> {
        self.state.lock().active.keys().cloned().collect()
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Full reset: fail every pending request with a session-closed error
    /// and drop every active handler.
    ///
    /// Returns the (pending, active) counts that were cleared.
    pub fn clear(&self) -> (usize, usize) {
        let mut state = self.state.lock();

        let pending = std::mem::take(&mut state.pending);
        let pending_count = pending.len();
        for (_, request) in pending {
            let _ = request.cell.send(Err(AckFailure::SessionClosed));
        }

        let active_count = state.active.len();
        state.active.clear();

        (pending_count, active_count)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct NopHandler;

    #[async_trait]
    impl PriceHandler for NopHandler {
        async fn on_price_update(&self, _update: PriceUpdate) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn handler() -> Arc<dyn PriceHandler> {
        Arc::new(NopHandler)
    }

    #[test]
    fn levels_accept_one_or_two_entries() {
        assert!(Levels::new(vec![1]).is_ok());
        assert!(Levels::new(vec![1, 5]).is_ok());
    }

    #[test]
    fn levels_reject_bad_counts() {
        assert_eq!(Levels::new(vec![]), Err(LevelsError::InvalidCount(0)));
        assert_eq!(
            Levels::new(vec![1, 2, 3]),
            Err(LevelsError::InvalidCount(3))
        );
    }

    #[test]
    fn levels_reject_zero_depth() {
        assert_eq!(Levels::new(vec![0]), Err(LevelsError::ZeroDepth));
        assert_eq!(Levels::new(vec![1, 0]), Err(LevelsError::ZeroDepth));
    }

    #[test]
    fn subscribe_then_accept_installs_handler() {
        let registry = SubscriptionRegistry::new();
        let mut rx = registry
            .begin_subscribe("X.SPOT", "tag-1", handler())
            .unwrap();

        let completion = registry.complete("X.SPOT", RequestKind::Subscribe, "tag-1", true, None);

        assert_eq!(completion, Completion::Accepted);
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
        assert!(registry.handler_for("X.SPOT").is_some());
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn second_subscribe_while_pending_fails() {
        let registry = SubscriptionRegistry::new();
        let _rx = registry
            .begin_subscribe("X.SPOT", "tag-1", handler())
            .unwrap();

        let err = registry
            .begin_subscribe("X.SPOT", "tag-2", handler())
            .unwrap_err();

        assert_eq!(
            err,
            BeginError::RequestPending {
                instrument: "X.SPOT".to_string(),
                kind: RequestKind::Subscribe,
            }
        );
    }

    #[test]
    fn subscribe_while_active_fails() {
        let registry = SubscriptionRegistry::new();
        let _rx = registry
            .begin_subscribe("X.SPOT", "tag-1", handler())
            .unwrap();
        registry.complete("X.SPOT", RequestKind::Subscribe, "tag-1", true, None);

        let err = registry
            .begin_subscribe("X.SPOT", "tag-2", handler())
            .unwrap_err();

        assert_eq!(err, BeginError::AlreadyActive("X.SPOT".to_string()));
    }

    #[test]
    fn rejected_subscribe_leaves_no_active_entry() {
        let registry = SubscriptionRegistry::new();
        let mut rx = registry
            .begin_subscribe("X.SPOT", "tag-1", handler())
            .unwrap();

        let completion = registry.complete(
            "X.SPOT",
            RequestKind::Subscribe,
            "tag-1",
            false,
            Some("no liquidity".to_string()),
        );

        assert_eq!(completion, Completion::Rejected);
        assert_eq!(
            rx.try_recv().unwrap(),
            Err(AckFailure::Rejected {
                reason: Some("no liquidity".to_string())
            })
        );
        assert!(registry.handler_for("X.SPOT").is_none());
    }

    #[test]
    fn tag_mismatch_settles_as_failure() {
        let registry = SubscriptionRegistry::new();
        let mut rx = registry
            .begin_subscribe("X.SPOT", "tag-1", handler())
            .unwrap();

        let completion = registry.complete("X.SPOT", RequestKind::Subscribe, "other", true, None);

        assert_eq!(completion, Completion::TagMismatch);
        assert_eq!(rx.try_recv().unwrap(), Err(AckFailure::TagMismatch));
        assert!(registry.handler_for("X.SPOT").is_none());
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn ack_after_abandon_is_no_pending() {
        let registry = SubscriptionRegistry::new();
        let _rx = registry
            .begin_subscribe("X.SPOT", "tag-1", handler())
            .unwrap();

        assert!(registry.abandon("X.SPOT", "tag-1"));

        // The late acknowledgement finds nothing to settle.
        let completion = registry.complete("X.SPOT", RequestKind::Subscribe, "tag-1", true, None);
        assert_eq!(completion, Completion::NoPending);
    }

    #[test]
    fn abandon_after_ack_reports_lost_race() {
        let registry = SubscriptionRegistry::new();
        let _rx = registry
            .begin_subscribe("X.SPOT", "tag-1", handler())
            .unwrap();
        registry.complete("X.SPOT", RequestKind::Subscribe, "tag-1", true, None);

        assert!(!registry.abandon("X.SPOT", "tag-1"));
        assert!(registry.handler_for("X.SPOT").is_some());
    }

    #[test]
    fn unsubscribe_requires_active_subscription() {
        let registry = SubscriptionRegistry::new();

        let err = registry.begin_unsubscribe("X.SPOT", "tag-1").unwrap_err();

        assert_eq!(err, BeginError::NotActive("X.SPOT".to_string()));
    }

    #[test]
    fn accepted_unsubscribe_removes_handler() {
        let registry = SubscriptionRegistry::new();
        let _rx = registry
            .begin_subscribe("X.SPOT", "tag-1", handler())
            .unwrap();
        registry.complete("X.SPOT", RequestKind::Subscribe, "tag-1", true, None);

        let mut rx = registry.begin_unsubscribe("X.SPOT", "tag-2").unwrap();
        let completion =
            registry.complete("X.SPOT", RequestKind::Unsubscribe, "tag-2", true, None);

        assert_eq!(completion, Completion::Accepted);
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
        assert!(registry.handler_for("X.SPOT").is_none());
    }

    #[test]
    fn rejected_unsubscribe_keeps_handler_installed() {
        let registry = SubscriptionRegistry::new();
        let _rx = registry
            .begin_subscribe("X.SPOT", "tag-1", handler())
            .unwrap();
        registry.complete("X.SPOT", RequestKind::Subscribe, "tag-1", true, None);

        let mut rx = registry.begin_unsubscribe("X.SPOT", "tag-2").unwrap();
        let completion =
            registry.complete("X.SPOT", RequestKind::Unsubscribe, "tag-2", false, None);

        assert_eq!(completion, Completion::Rejected);
        assert!(rx.try_recv().unwrap().is_err());
        // Delivery must not silently stop.
        assert!(registry.handler_for("X.SPOT").is_some());
    }

    #[test]
    fn ack_of_wrong_kind_does_not_settle() {
        let registry = SubscriptionRegistry::new();
        let mut rx = registry
            .begin_subscribe("X.SPOT", "tag-1", handler())
            .unwrap();

        let completion =
            registry.complete("X.SPOT", RequestKind::Unsubscribe, "tag-1", true, None);

        assert_eq!(completion, Completion::NoPending);
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.pending_count(), 1);
    }

    #[test]
    fn clear_fails_pendings_and_drops_actives() {
        let registry = SubscriptionRegistry::new();
        let _active_rx = registry
            .begin_subscribe("X.SPOT", "tag-1", handler())
            .unwrap();
        registry.complete("X.SPOT", RequestKind::Subscribe, "tag-1", true, None);
        let mut pending_rx = registry
            .begin_subscribe("Y.SPOT", "tag-2", handler())
            .unwrap();

        let (pending, active) = registry.clear();

        assert_eq!((pending, active), (1, 1));
        assert_eq!(
            pending_rx.try_recv().unwrap(),
            Err(AckFailure::SessionClosed)
        );
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn active_instruments_lists_wire_names() {
        let registry = SubscriptionRegistry::new();
        let _rx = registry
            .begin_subscribe("X.SPOT", "tag-1", handler())
            .unwrap();
        registry.complete("X.SPOT", RequestKind::Subscribe, "tag-1", true, None);

        assert_eq!(registry.active_instruments(), vec!["X.SPOT".to_string()]);
    }
}

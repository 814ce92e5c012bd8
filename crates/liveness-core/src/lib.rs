//! The three long-running components described in spec.md §4: the Prober
//! (per-target probing loop), the Escalator (two-stage alert state machine),
//! and the Owner Reconciler plus Supervisor (ownership / recovery). These are
//! the "core" of the system — everything in this crate is generic over
//! `S: liveness_store::Store` and `M: liveness_mailer::Mailer` so that unit
//! tests exercise it against in-memory fakes, mirroring how
//! `agent::alerts::evaluator::AlertEvaluator<V: AlertView>` stays generic
//! rather than boxing a trait object.

mod escalator;
mod prober;
mod reconciler;
mod supervisor;

pub use escalator::{run_escalation, AckUrlConfig, EscalationEntry};
pub use prober::{run_prober, ProberExit};
pub use reconciler::OwnerReconciler;
pub use supervisor::{RecoverySummary, Supervisor};

/// A snapshot of the targets this replica currently owns (spec.md §4.3's
/// "owned set"). Written exclusively by the [`OwnerReconciler`]; read by
/// every [`prober::run_prober`] task at each tick.
pub type OwnedSet = std::sync::Arc<arc_swap::ArcSwap<std::collections::HashSet<liveness_models::TargetId>>>;

/// Builds an empty, ready-to-swap owned set.
pub fn new_owned_set() -> OwnedSet {
    std::sync::Arc::new(arc_swap::ArcSwap::from_pointee(
        std::collections::HashSet::new(),
    ))
}

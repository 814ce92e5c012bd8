//! The per-target probing loop (spec.md §4.1): launches independent,
//! overlapping HTTP GETs against a target's URL and fires a single
//! "unreachable" verdict once the sliding-window criterion holds.
//!
//! The in-flight set is a `BTreeMap<Duration, ProbeState>` keyed by
//! `t_launch` (nanosecond-resolution `Duration` since a `tokio::time::Instant`
//! epoch captured at task start) — a sorted map of launch timestamps to probe
//! state is explicitly suggested as "one realisation" of the ordered
//! structure in spec.md §9, and `BTreeMap` gives pruning-by-key and
//! minimum-key lookup for free. Each probe runs as its own
//! `tokio::task::JoinHandle` so a hung request never blocks the next tick.

use std::collections::BTreeMap;
use std::time::Duration;

use liveness_models::Target;
use tokio::time::Instant;

use crate::OwnedSet;

enum ProbeState {
    Pending(tokio::task::JoinHandle<Result<reqwest::StatusCode, reqwest::Error>>),
    Done(bool),
}

/// Why a Prober stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProberExit {
    /// The Owner Reconciler no longer lists this target in the owned set.
    Cancelled,
    /// The sliding-window criterion fired: the target is unreachable.
    VerdictFired,
}

/// Runs one target's probing loop until cancellation or a fired verdict.
/// Never returns an error for probe failures (those are folded into the
/// health decision per spec.md §7); probing needs no `Store` access at all,
/// since the owned set is read from an in-memory snapshot and the verdict is
/// handed back to the caller to persist.
#[tracing::instrument(skip_all, fields(target_id = %target.id, url = %target.url))]
pub async fn run_prober(
    target: Target,
    http_client: reqwest::Client,
    owned_set: OwnedSet,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> ProberExit {
    let period = target.period();
    let window = target.window();
    let epoch = Instant::now();

    let mut in_flight: BTreeMap<Duration, ProbeState> = BTreeMap::new();

    loop {
        if *shutdown.borrow() {
            return ProberExit::Cancelled;
        }
        if !owned_set.load().contains(&target.id) {
            tracing::info!("target no longer owned, prober exiting");
            return ProberExit::Cancelled;
        }

        let tick_start = Instant::now();

        let t_launch = Instant::now().duration_since(epoch);
        let handle = {
            let client = http_client.clone();
            let url = target.url.clone();
            tokio::spawn(async move { client.get(url).send().await.map(|r| r.status()) })
        };
        in_flight.insert(t_launch, ProbeState::Pending(handle));
        metrics::counter!("probes_launched_total").increment(1);

        poll_completed(&mut in_flight).await;

        let now = Instant::now().duration_since(epoch);
        let fired = evaluate_window(&mut in_flight, now, window);

        if fired {
            for (_, state) in in_flight.into_iter() {
                if let ProbeState::Pending(handle) = state {
                    handle.abort();
                }
            }
            metrics::counter!("verdicts_fired_total").increment(1);
            tracing::warn!(target_id = %target.id, "sliding-window verdict fired: target unreachable");
            return ProberExit::VerdictFired;
        }

        let elapsed = tick_start.elapsed();
        let sleep_for = if elapsed > period {
            tracing::warn!(?elapsed, ?period, "prober tick exceeded period, sleeping for zero");
            Duration::ZERO
        } else {
            period - elapsed
        };

        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return ProberExit::Cancelled;
                }
            }
        }
    }
}

/// Checks every still-[`ProbeState::Pending`] entry without blocking; any
/// that has finished is converted to [`ProbeState::Done`] with whether its
/// status fell in `[200, 300)`. A connection error is treated identically to
/// a non-2xx response (spec.md §4.1's "tie-breaks" rule).
async fn poll_completed(in_flight: &mut BTreeMap<Duration, ProbeState>) {
    let finished: Vec<Duration> = in_flight
        .iter()
        .filter(|(_, state)| matches!(state, ProbeState::Pending(h) if h.is_finished()))
        .map(|(t, _)| *t)
        .collect();

    for t_launch in finished {
        let ProbeState::Pending(handle) = in_flight.remove(&t_launch).unwrap() else {
            unreachable!()
        };
        let success = match handle.await {
            Ok(Ok(status)) => status.is_success(),
            Ok(Err(_)) | Err(_) => false,
        };
        in_flight.insert(t_launch, ProbeState::Done(success));
    }
}

/// Applies the pruning and verdict rule of spec.md §4.1, mutating `in_flight`
/// in place to retain only the pending evidence. Returns whether the verdict
/// fires at `now`.
fn evaluate_window(
    in_flight: &mut BTreeMap<Duration, ProbeState>,
    now: Duration,
    window: Duration,
) -> bool {
    let latest_ok = in_flight
        .iter()
        .filter_map(|(t, state)| matches!(state, ProbeState::Done(true)).then_some(*t))
        .max();

    in_flight.retain(|t_launch, _state| match latest_ok {
        Some(latest_ok) => *t_launch > latest_ok,
        None => true,
    });

    let Some(t_oldest_pending) = in_flight.keys().next().copied() else {
        return false;
    };

    now.saturating_sub(t_oldest_pending) >= window
}

#[cfg(test)]
mod tests {
    use super::*;

    fn done(success: bool) -> ProbeState {
        ProbeState::Done(success)
    }

    #[test]
    fn no_fire_when_pending_set_empty() {
        let mut in_flight = BTreeMap::new();
        in_flight.insert(Duration::from_millis(0), done(true));
        let fired = evaluate_window(&mut in_flight, Duration::from_millis(5000), Duration::from_millis(1000));
        assert!(!fired, "a lone success must not fire, and prunes to empty");
        assert!(in_flight.is_empty());
    }

    #[test]
    fn errors_alone_do_not_fire_before_window_elapses() {
        let mut in_flight = BTreeMap::new();
        in_flight.insert(Duration::from_millis(0), done(false));
        in_flight.insert(Duration::from_millis(700), done(false));
        let fired = evaluate_window(&mut in_flight, Duration::from_millis(900), Duration::from_millis(1000));
        assert!(!fired, "oldest failure is only 900ms old against a 1000ms window");
    }

    #[test]
    fn errors_alone_fire_once_the_oldest_exceeds_the_window() {
        // Non-2xx responses are evidence of silence, not dominated by a later
        // success: they must stay in the pending set and eventually fire.
        let mut in_flight = BTreeMap::new();
        in_flight.insert(Duration::from_millis(0), done(false));
        in_flight.insert(Duration::from_millis(700), done(false));
        let fired = evaluate_window(&mut in_flight, Duration::from_millis(1200), Duration::from_millis(1000));
        assert!(fired, "a 404/error with no later success for a full window must fire");
    }

    #[tokio::test]
    async fn fires_when_oldest_pending_exceeds_window() {
        let mut in_flight = BTreeMap::new();
        // Pending entry launched 1200ms before `now`, with a 1000ms window: must fire.
        let handle = tokio::spawn(async { std::future::pending::<()>().await });
        in_flight.insert(Duration::from_millis(100), ProbeState::Pending(handle));
        let fired = evaluate_window(&mut in_flight, Duration::from_millis(1300), Duration::from_millis(1000));
        assert!(fired);
    }

    #[test]
    fn success_prunes_everything_launched_before_it() {
        let mut in_flight = BTreeMap::new();
        in_flight.insert(Duration::from_millis(0), done(false));
        in_flight.insert(Duration::from_millis(500), done(true));
        let fired = evaluate_window(&mut in_flight, Duration::from_millis(1400), Duration::from_millis(1000));
        assert!(!fired, "everything at or before the success is pruned, leaving no pending evidence");
        assert!(in_flight.is_empty());
    }
}

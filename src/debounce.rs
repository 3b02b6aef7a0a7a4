use crate::{
    config::{DebounceScope, InactivePolicy},
    edge::{Edge, EdgeHandler},
    sink::{Dispatcher, Pulse, Report},
    transport::Transport,
};
use core::time::Duration;

/// Knobs that differ between deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Minimum spacing between two accepted edges that the scope debounces.
    pub min_delay: Duration,
    pub inactive: InactivePolicy,
    pub scope: DebounceScope,
}

/// What became of a single edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted(Report),
    /// Arrived within `min_delay` of the previous accepted edge.
    Rejected { since_last: Duration },
    /// An `Inactive` edge under [`InactivePolicy::LogOnly`].
    Ignored,
}

/// Turns a chattering edge stream into rate-limited pulses.
///
/// Any two accepted `Active` edges are at least `min_delay` apart. Under
/// [`DebounceScope::AllEdges`] the same holds for any two accepted edges of
/// either kind, since both share one timer. The running counter moves by
/// exactly one per accepted `Active` edge, no matter whether the sinks
/// manage to record it.
pub struct PulseDebouncer<T> {
    policy: Policy,
    last_accepted_at: Option<Duration>,
    reading: Option<i64>,
    accepted: u64,
    rejected: u64,
    dispatcher: Dispatcher<T>,
}

fn too_soon(last: Option<Duration>, now: Duration, min_delay: Duration) -> Option<Duration> {
    let since_last = now.saturating_sub(last?);
    (since_last < min_delay).then_some(since_last)
}

impl<T: Transport> PulseDebouncer<T> {
    /// `seed` is the reconciled counter, or `None` when no absolute reading is kept.
    pub fn new(policy: Policy, seed: Option<i64>, dispatcher: Dispatcher<T>) -> Self {
        Self {
            policy,
            last_accepted_at: None,
            reading: seed,
            accepted: 0,
            rejected: 0,
            dispatcher,
        }
    }

    pub fn reading(&self) -> Option<i64> {
        self.reading
    }

    pub fn last_accepted_at(&self) -> Option<Duration> {
        self.last_accepted_at
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn dispatcher(&self) -> &Dispatcher<T> {
        &self.dispatcher
    }

    pub fn edge(&mut self, edge: Edge, now: Duration) -> Outcome {
        match edge {
            Edge::Active => self.active(now),
            Edge::Inactive => self.inactive(now),
        }
    }

    fn active(&mut self, now: Duration) -> Outcome {
        if let Some(since_last) = too_soon(self.last_accepted_at, now, self.policy.min_delay) {
            log::debug!("skipping line at {now:?}, only {since_last:?} since the last update");
            self.rejected += 1;
            return Outcome::Rejected { since_last };
        }

        self.last_accepted_at = Some(now);
        self.accepted += 1;
        if let Some(reading) = self.reading.as_mut() {
            match reading.checked_add(1) {
                Some(next) => *reading = next,
                None => log::error!("meter reading is stuck at {reading}, it cannot count any higher"),
            }
        }

        let pulse = Pulse { edge: Edge::Active, at: now, reading: self.reading };
        let report = self.dispatcher.dispatch(&pulse);
        match self.reading {
            Some(reading) => log::info!("updated meter to {reading} at {now:?}"),
            None => log::info!("counted pulse at {now:?}"),
        }
        Outcome::Accepted(report)
    }

    fn inactive(&mut self, now: Duration) -> Outcome {
        if self.policy.scope == DebounceScope::AllEdges {
            if let Some(since_last) = too_soon(self.last_accepted_at, now, self.policy.min_delay) {
                log::debug!("skipping no-line at {now:?}, only {since_last:?} since the last update");
                self.rejected += 1;
                return Outcome::Rejected { since_last };
            }
            self.last_accepted_at = Some(now);
        }

        if self.policy.inactive == InactivePolicy::LogOnly {
            log::debug!("no line detected at {now:?}");
            return Outcome::Ignored;
        }

        let pulse = Pulse { edge: Edge::Inactive, at: now, reading: self.reading };
        log::debug!("no line detected at {now:?}, reporting it to the time series");
        Outcome::Accepted(self.dispatcher.dispatch(&pulse))
    }
}

impl<T: Transport> EdgeHandler for PulseDebouncer<T> {
    fn on_active(&mut self, now: Duration) {
        self.active(now);
    }

    fn on_inactive(&mut self, now: Duration) {
        self.inactive(now);
    }
}

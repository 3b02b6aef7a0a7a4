//! Pulse counting for a utility meter read through a reflectance line sensor.
//!
//! Everything in here is platform-agnostic; the firmware binary supplies the
//! GPIO sampling and the HTTP transport.

pub mod config;
pub mod debounce;
pub mod edge;
pub mod reconcile;
pub mod sink;
pub mod transport;

pub use config::{Config, ConfigError, DebounceScope, InactivePolicy};
pub use debounce::{Outcome, Policy, PulseDebouncer};
pub use edge::{Edge, EdgeHandler, EdgeSource, MajorityFilter, ReplayError, ReplaySource};
pub use reconcile::{ReconcileError, Reconciler, RetryPolicy};
pub use sink::{Dispatcher, DomoticzSink, InfluxSink, Pulse, Sink, SinkError};
pub use transport::{DryRunTransport, Response, Transport, TransportError};

/// Wires the configured sinks and the debouncer together.
///
/// `seed` should come from [`reconciler`] whenever Domoticz is configured;
/// without it every Domoticz delivery fails with [`SinkError::MissingReading`].
pub fn assemble<T: Transport>(config: &Config, seed: Option<i64>, transport: T) -> PulseDebouncer<T> {
    let mut dispatcher = Dispatcher::new(transport);
    if let Some(domoticz) = &config.domoticz {
        dispatcher = dispatcher.with_sink(DomoticzSink::new(domoticz));
    }
    if let Some(influx) = &config.influx {
        dispatcher = dispatcher.with_sink(InfluxSink::new(influx));
    }
    if dispatcher.is_empty() {
        log::warn!("no sinks configured, pulses will only be logged");
    }

    let policy = Policy { min_delay: config.min_delay, inactive: config.inactive_policy, scope: config.debounce_scope };
    PulseDebouncer::new(policy, seed, dispatcher)
}

/// Startup reconciliation for the configured Domoticz counter, if any.
pub fn reconciler(config: &Config) -> Option<Reconciler> {
    let domoticz = config.domoticz.as_ref()?;
    let retry = RetryPolicy { attempts: config.reconcile_attempts, backoff: config.reconcile_backoff };
    Some(Reconciler::new(DomoticzSink::new(domoticz).reading_url(), retry))
}

//! Observability hook for fetcher lifecycle
//!
//! The fetcher reports lifecycle notifications through [`DaemonLogger`].
//! Calls are synchronous and fire-and-forget: implementations must return
//! quickly and never block the polling loop.

use cadence_core::Error;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{error, info, warn};

/// Receiver of fetcher lifecycle notifications
///
/// Every method has an empty default so implementations pick what they need.
pub trait DaemonLogger: Send + Sync {
    /// The polling loop started
    fn fetch_started(&self, _name: &str) {}

    /// The polling loop exited
    fn fetching_stopped(&self, _name: &str) {}

    /// Fetching paused at the tail, waiting for the cooldown
    fn pausing_fetching(&self, _name: &str, _last_encountered: u64) {}

    /// Fetching resumed after the cooldown
    fn fetching_resumed(&self, _name: &str) {}

    /// The tail of the log was reached
    fn fetching_is_at_end_of_events(&self, _name: &str, _last_encountered: u64) {}

    /// A transient failure is about to be retried
    fn retrying(&self, _name: &str, _attempt: u32, _delay: Duration, _error: &Error) {}

    /// A sequence gap refused to close
    fn convergence_stalled(&self, _name: &str, _from: u64, _missing: &[u64], _attempts: u32) {}

    /// The polling loop halted on a fatal error
    fn fetch_failed(&self, _name: &str, _error: &Error) {}
}

/// Logs notifications through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDaemonLogger;

impl DaemonLogger for TracingDaemonLogger {
    fn fetch_started(&self, name: &str) {
        info!(projection = name, "started fetching events");
    }

    fn fetching_stopped(&self, name: &str) {
        info!(projection = name, "stopped fetching events");
    }

    fn pausing_fetching(&self, name: &str, last_encountered: u64) {
        info!(projection = name, last_encountered, "pausing event fetching");
    }

    fn fetching_resumed(&self, name: &str) {
        info!(projection = name, "resumed fetching events");
    }

    fn fetching_is_at_end_of_events(&self, name: &str, last_encountered: u64) {
        info!(projection = name, last_encountered, "fetching is at the end of the event log");
    }

    fn retrying(&self, name: &str, attempt: u32, delay: Duration, error: &Error) {
        warn!(
            projection = name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "transient failure while fetching, retrying"
        );
    }

    fn convergence_stalled(&self, name: &str, from: u64, missing: &[u64], attempts: u32) {
        warn!(
            projection = name,
            from,
            ?missing,
            attempts,
            "sequence gap did not close"
        );
    }

    fn fetch_failed(&self, name: &str, error: &Error) {
        error!(projection = name, error = %error, "event fetching halted");
    }
}

/// Discards every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NulloDaemonLogger;

impl DaemonLogger for NulloDaemonLogger {}

/// One recorded notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// See [`DaemonLogger::fetch_started`]
    Started(String),
    /// See [`DaemonLogger::fetching_stopped`]
    Stopped(String),
    /// See [`DaemonLogger::pausing_fetching`]
    Pausing(String, u64),
    /// See [`DaemonLogger::fetching_resumed`]
    Resumed(String),
    /// See [`DaemonLogger::fetching_is_at_end_of_events`]
    AtEnd(String, u64),
    /// See [`DaemonLogger::retrying`]
    Retrying(String, u32),
    /// See [`DaemonLogger::convergence_stalled`]
    Stalled(String, Vec<u64>),
    /// See [`DaemonLogger::fetch_failed`]
    Failed(String, String),
}

/// Keeps notifications in memory for later inspection
#[derive(Debug, Default)]
pub struct RecordingDaemonLogger {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingDaemonLogger {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far, in order
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }

    /// Number of recorded notifications matching `predicate`
    pub fn count(&self, predicate: impl Fn(&Notification) -> bool) -> usize {
        self.notifications.lock().iter().filter(|n| predicate(n)).count()
    }

    fn record(&self, notification: Notification) {
        self.notifications.lock().push(notification);
    }
}

impl DaemonLogger for RecordingDaemonLogger {
    fn fetch_started(&self, name: &str) {
        self.record(Notification::Started(name.to_string()));
    }

    fn fetching_stopped(&self, name: &str) {
        self.record(Notification::Stopped(name.to_string()));
    }

    fn pausing_fetching(&self, name: &str, last_encountered: u64) {
        self.record(Notification::Pausing(name.to_string(), last_encountered));
    }

    fn fetching_resumed(&self, name: &str) {
        self.record(Notification::Resumed(name.to_string()));
    }

    fn fetching_is_at_end_of_events(&self, name: &str, last_encountered: u64) {
        self.record(Notification::AtEnd(name.to_string(), last_encountered));
    }

    fn retrying(&self, name: &str, attempt: u32, _delay: Duration, _error: &Error) {
        self.record(Notification::Retrying(name.to_string(), attempt));
    }

    fn convergence_stalled(&self, name: &str, _from: u64, missing: &[u64], _attempts: u32) {
        self.record(Notification::Stalled(name.to_string(), missing.to_vec()));
    }

    fn fetch_failed(&self, name: &str, error: &Error) {
        self.record(Notification::Failed(name.to_string(), error.to_string()));
    }
}

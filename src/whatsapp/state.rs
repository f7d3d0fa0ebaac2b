//! Process-wide WhatsApp connection state and its observers.
//!
//! The session supervisor in [`super::events`] is the only writer. The
//! dispatcher and the flush trigger read [`ConnectionTracker::is_ready`] or
//! subscribe to transitions. Observers see the enum value only, never the
//! connector behind it.

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Destination connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session with the bridge.
    Disconnected,
    /// Bridge reachable, waiting for QR scan or session restore.
    AwaitingHandshake,
    /// Credentials accepted, session still loading.
    Authenticated,
    /// Messages can be sent.
    Ready,
    /// The connector failed; a reconnect is pending.
    Error,
}

impl ConnectionState {
    /// Whether `next` is the usual successor of `self` or a failure edge.
    ///
    /// Anything may fall back to `Disconnected` or `Error`. Other jumps
    /// (for example a restored session going straight to `Ready`) are
    /// accepted by the tracker but logged.
    pub fn is_expected_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (_, Self::Disconnected | Self::Error)
                | (Self::Disconnected | Self::Error, Self::AwaitingHandshake)
                | (Self::AwaitingHandshake, Self::Authenticated)
                | (Self::Authenticated, Self::Ready)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::AwaitingHandshake => "awaiting_handshake",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Callback invoked with `(previous, next)` on every transition.
pub type StateObserver = Arc<dyn Fn(ConnectionState, ConnectionState) + Send + Sync>;

/// Owns the current [`ConnectionState`] and notifies subscribers.
pub struct ConnectionTracker {
    state: Mutex<ConnectionState>,
    observers: RwLock<Vec<StateObserver>>,
}

impl fmt::Debug for ConnectionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let observers = match self.observers.read() {
            Ok(list) => list.len(),
            Err(_) => 0,
        };
        f.debug_struct("ConnectionTracker")
            .field("state", &self.current_state())
            .field("observers", &observers)
            .finish()
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTracker {
    /// A tracker starting in [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// The state right now.
    pub fn current_state(&self) -> ConnectionState {
        match self.state.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Whether the destination accepts sends.
    pub fn is_ready(&self) -> bool {
        self.current_state() == ConnectionState::Ready
    }

    /// Register an observer. It runs synchronously on the writer's task, so
    /// it must not block; spawn anything long-running.
    pub fn subscribe<F>(&self, observer: F)
    where
        F: Fn(ConnectionState, ConnectionState) + Send + Sync + 'static,
    {
        let observer: StateObserver = Arc::new(observer);
        match self.observers.write() {
            Ok(mut list) => list.push(observer),
            Err(poisoned) => poisoned.into_inner().push(observer),
        }
    }

    /// Move to `next` and notify observers.
    ///
    /// Returns `false` without notifying when `next` equals the current state.
    pub fn set_state(&self, next: ConnectionState) -> bool {
        let previous = {
            let mut guard = match self.state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if *guard == next {
                return false;
            }
            std::mem::replace(&mut *guard, next)
        };

        if previous.is_expected_transition(next) {
            info!(from = %previous, to = %next, "whatsapp connection state changed");
        } else {
            info!(from = %previous, to = %next, "whatsapp connection state jumped");
        }

        // Clone the list so observers may subscribe from inside a callback.
        let observers: Vec<StateObserver> = match self.observers.read() {
            Ok(list) => list.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        debug!(count = observers.len(), "notifying connection observers");
        for observer in observers {
            observer(previous, next);
        }
        true
    }
}

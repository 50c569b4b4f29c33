//! Callback trait for per-state workflow events.
//!
//! Inject an [`Arc<dyn WorkflowObserver>`] via
//! [`crate::config::QaConfigBuilder::observer`] to receive events as the
//! workflow moves through its states: a CLI spinner, a log line per state,
//! or a WebSocket feed to a browser all fit behind this one trait.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdfqa::{QaConfig, WorkflowObserver, WorkflowState, ThreadId};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingObserver {
//!     states: AtomicUsize,
//! }
//!
//! impl WorkflowObserver for CountingObserver {
//!     fn on_state_enter(&self, _thread: &ThreadId, _state: WorkflowState) {
//!         self.states.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = QaConfig::builder()
//!     .observer(Arc::new(CountingObserver { states: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::checkpoint::ThreadId;
use crate::error::QaError;
use crate::output::Terminal;
use crate::workflow::WorkflowState;

/// Called by the workflow as a turn progresses.
///
/// Implementations must be `Send + Sync`: several turns on different threads
/// may run concurrently and share one observer. All methods have default
/// no-op implementations so callers only override what they care about.
pub trait WorkflowObserver: Send + Sync {
    /// Called once when the turn starts, before the first DECIDE.
    fn on_turn_start(&self, thread: &ThreadId, question: &str) {
        let _ = (thread, question);
    }

    /// Called each time the workflow enters a state, terminal states included.
    fn on_state_enter(&self, thread: &ThreadId, state: WorkflowState) {
        let _ = (thread, state);
    }

    /// Called once when the turn reaches a terminal state.
    fn on_turn_complete(&self, thread: &ThreadId, terminal: Terminal, rewrites: u32) {
        let _ = (thread, terminal, rewrites);
    }

    /// Called once when the turn fails.
    fn on_turn_error(&self, thread: &ThreadId, error: &QaError) {
        let _ = (thread, error);
    }
}

/// A no-op observer, used when none is configured.
pub struct NoopObserver;

impl WorkflowObserver for NoopObserver {}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recording {
        states: Mutex<Vec<WorkflowState>>,
        completed: Mutex<Option<Terminal>>,
    }

    impl WorkflowObserver for Recording {
        fn on_state_enter(&self, _thread: &ThreadId, state: WorkflowState) {
            self.states.lock().push(state);
        }

        fn on_turn_complete(&self, _thread: &ThreadId, terminal: Terminal, _rewrites: u32) {
            *self.completed.lock() = Some(terminal);
        }
    }

    #[test]
    fn noop_observer_does_not_panic() {
        let obs = NoopObserver;
        let id = ThreadId::new();
        obs.on_turn_start(&id, "q");
        obs.on_state_enter(&id, WorkflowState::Decide);
        obs.on_turn_complete(&id, Terminal::Done, 0);
        obs.on_turn_error(&id, &QaError::Cancelled);
    }

    #[test]
    fn recording_observer_receives_events() {
        let rec = Recording::default();
        let id = ThreadId::new();
        rec.on_state_enter(&id, WorkflowState::Decide);
        rec.on_state_enter(&id, WorkflowState::DoneDirect);
        rec.on_turn_complete(&id, Terminal::DoneDirect, 0);

        assert_eq!(
            *rec.states.lock(),
            vec![WorkflowState::Decide, WorkflowState::DoneDirect]
        );
        assert_eq!(*rec.completed.lock(), Some(Terminal::DoneDirect));
    }

    #[test]
    fn arc_dyn_observer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn WorkflowObserver>();
        let obs: Arc<dyn WorkflowObserver> = Arc::new(NoopObserver);
        obs.on_turn_start(&ThreadId::new(), "hello");
    }
}

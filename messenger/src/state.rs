//! Messenger lifecycle states and the owner-facing change notifier.

use tracing::info;

/// Lifecycle of a [`Messenger`](crate::Messenger).
///
/// `Idle` is both the initial state and the state reached after a clean stop.
/// `Error` is entered on any link fault; the links are already gone by then
/// and the owner decides whether to call `start` again.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum_macros::AsRefStr,
    strum_macros::Display,
    strum_macros::EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MessengerState {
    Idle,
    Starting,
    Started,
    Stopping,
    Error,
}

impl MessengerState {
    /// Whether links may exist in this state.
    pub fn has_links(self) -> bool {
        matches!(
            self,
            MessengerState::Starting | MessengerState::Started | MessengerState::Stopping
        )
    }
}

/// Owner callback invoked with `(previous, new)` on every transition.
///
/// Anything the closure captures plays the role of the owner's context; the
/// messenger never looks at it.
pub type StateChangeCallback = Box<dyn FnMut(MessengerState, MessengerState)>;

#[derive(Default)]
pub(crate) struct StateNotifier {
    callback: Option<StateChangeCallback>,
}

impl StateNotifier {
    pub(crate) fn new(callback: Option<StateChangeCallback>) -> Self {
        Self { callback }
    }

    /// Applies `next` to `state` and reports it.
    ///
    /// The state is written before the callback runs. Self-transitions are
    /// swallowed.
    pub(crate) fn transition(
        &mut self,
        device_id: &str,
        state: &mut MessengerState,
        next: MessengerState,
    ) -> bool {
        let previous = *state;
        if previous == next {
            return false;
        }

        *state = next;
        info!(device_id, from = %previous, to = %next, "messenger state changed");

        if let Some(callback) = self.callback.as_mut() {
            callback(previous, next);
        }
        true
    }
}

impl std::fmt::Debug for StateNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateNotifier")
            .field("registered", &self.callback.is_some())
            .finish()
    }
}

/// Navigator state definitions for tracking a target resource's pagination
///
/// This module defines the states a target passes through while it is loaded
/// and paginated, and which transitions between them are legal.
use std::fmt;

/// Represents the current state of a target resource in the navigator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavState {
    // ===== Active States =====
    /// Target has not been loaded yet
    Idle,

    /// Navigation to the cursor position is in flight
    Loading,

    /// Content for the current cursor is rendered and ready
    Loaded,

    /// The next pagination action is in flight
    Paginating,

    // ===== Terminal States =====
    /// No further pages exist
    Exhausted,

    /// The last operation failed; only a fresh load leaves this state
    Error,
}

impl NavState {
    /// Returns true if `next` is a legal successor of this state
    ///
    /// `Error` is reachable from every state. `Exhausted` is final.
    pub fn can_transition_to(&self, next: NavState) -> bool {
        if next == Self::Error {
            return true;
        }

        matches!(
            (self, next),
            (Self::Idle, Self::Loading)
                | (Self::Loading, Self::Loaded)
                | (Self::Loaded, Self::Loading)
                | (Self::Loaded, Self::Paginating)
                | (Self::Paginating, Self::Loaded)
                | (Self::Paginating, Self::Exhausted)
                | (Self::Error, Self::Loading)
        )
    }

    /// Returns true if the navigator will never load this target again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exhausted)
    }

    /// Returns true while a browser operation for the target is in flight
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Loading | Self::Paginating)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Paginating => "paginating",
            Self::Exhausted => "exhausted",
            Self::Error => "error",
        }
    }

    /// Returns all possible states (useful for testing)
    #[cfg(test)]
    pub fn all_states() -> Vec<NavState> {
        vec![
            Self::Idle,
            Self::Loading,
            Self::Loaded,
            Self::Paginating,
            Self::Exhausted,
            Self::Error,
        ]
    }
}

impl fmt::Display for NavState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

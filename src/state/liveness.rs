/// Session liveness tracking
use std::fmt;

/// Liveness of an authenticated browser session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Liveness {
    /// Just authenticated, not yet used for a resource load
    Fresh,

    /// Used successfully at least once
    Active,

    /// Logged out, closed, or bounced to a login wall
    Expired,

    /// Stopped at a verification challenge
    Challenged,
}

impl Liveness {
    /// Returns true if the session may still be used for navigation
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Fresh | Self::Active)
    }

    /// Converts the liveness to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Challenged => "challenged",
        }
    }

    /// Parses a liveness from a database string representation
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "fresh" => Some(Self::Fresh),
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "challenged" => Some(Self::Challenged),
            _ => None,
        }
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

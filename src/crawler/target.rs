//! Target resources and pagination cursors

use crate::crawler::site::Pagination;
use crate::state::NavState;
use crate::CrawlError;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Kind of resource the crawler visits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A member's profile page
    Profile,
    /// The paginated list of a member's connections
    ConnectionList,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::ConnectionList => "connections",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resumable pagination position
///
/// Page `n` of a resource, counted from zero. Displayed as `p{n}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Cursor(u32);

impl Cursor {
    pub fn new(page: u32) -> Self {
        Self(page)
    }

    pub fn first() -> Self {
        Self(0)
    }

    pub fn page(&self) -> u32 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

impl FromStr for Cursor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix('p')
            .and_then(|n| n.parse::<u32>().ok())
            .map(Self)
            .ok_or_else(|| format!("invalid cursor '{}'", s))
    }
}

impl Serialize for Cursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A resource the navigator walks page by page
#[derive(Debug, Clone)]
pub struct Target {
    kind: ResourceKind,
    slug: String,
    cursor: Cursor,
    state: NavState,
    /// Resolved list location and how it paginates; discovered on first load
    pub(crate) list: Option<(Url, Pagination)>,
    /// Items already present before the latest in-place growth step
    pub(crate) seen_items: usize,
    /// The next load reads the page in place instead of navigating
    pub(crate) in_place: bool,
}

impl Target {
    /// Creates a target positioned at `cursor`
    pub fn new(kind: ResourceKind, slug: impl Into<String>, cursor: Cursor) -> Self {
        Self {
            kind,
            slug: slug.into(),
            cursor,
            state: NavState::Idle,
            list: None,
            seen_items: 0,
            in_place: false,
        }
    }

    pub fn profile(slug: impl Into<String>) -> Self {
        Self::new(ResourceKind::Profile, slug, Cursor::first())
    }

    pub fn connections(slug: impl Into<String>) -> Self {
        Self::new(ResourceKind::ConnectionList, slug, Cursor::first())
    }

    /// Stable identifier, also the checkpoint key: `<kind>:<slug>`
    pub fn id(&self) -> String {
        format!("{}:{}", self.kind, self.slug)
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    /// Moves the state machine, rejecting illegal transitions
    pub(crate) fn transition(&mut self, next: NavState) -> Result<(), CrawlError> {
        if !self.state.can_transition_to(next) {
            return Err(CrawlError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Moves the cursor forward; it never goes back
    pub(crate) fn advance_cursor(&mut self) -> Cursor {
        self.cursor = self.cursor.next();
        self.cursor
    }

    /// Repositions an idle or failed target for a resume
    pub(crate) fn reset_to(&mut self, cursor: Cursor) {
        self.cursor = cursor;
        self.in_place = false;
        self.seen_items = 0;
        if self.state != NavState::Idle {
            self.state = NavState::Error;
        }
    }
}

/// Read-only snapshot of a rendered page, consumed by the extractor
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    pub resource_id: String,
    pub kind: ResourceKind,
    pub slug: String,
    pub cursor: Cursor,
    pub url: String,
    pub html: String,
    /// Paged items before this offset belong to earlier pages
    pub item_offset: usize,
}

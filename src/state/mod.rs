//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `NavState`: the navigator's per-target state machine (idle, loading, loaded, paginating, exhausted, error)
//! - `Liveness`: the state of an authenticated browser session (fresh, active, expired, challenged)

mod liveness;
mod nav_state;

// Re-export main types
pub use liveness::Liveness;
pub use nav_state::NavState;

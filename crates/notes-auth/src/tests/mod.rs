//! Behavioural tests for the session core.
//!
//! - `harness.rs`         - Scripted HTTP backend, recording hooks, fixtures
//! - `single_flight.rs`   - One refresh call shared by concurrent callers
//! - `transport_retry.rs` - Bearer injection, retry-once on 401, typed errors
//! - `expiry.rs`          - Refresh failure, timeout and the expiry cascade
//! - `session_lifecycle.rs` - Restore, login, logout, user updates
//! - `cancellation.rs`    - Superseded logins and refreshes, stale results
//! - `scenarios.rs`       - End-to-end flows across all components

mod cancellation;
mod session_lifecycle;

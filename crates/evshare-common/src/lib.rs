//! Shared infrastructure for the EV-Share services.
//!
//! - [`logging`]: tracing subscriber setup honouring `-v/-q`, `RUST_LOG` and
//!   per-binary defaults.
//! - [`distributed`]: PostgreSQL advisory locks and leader election, used to
//!   keep periodic maintenance work on a single instance.

pub mod distributed;
pub mod logging;

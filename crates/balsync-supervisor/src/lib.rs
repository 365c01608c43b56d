//! # balsync-supervisor
//!
//! Drives a [`balsync_cache::ReconciledCache`] from the exchange and keeps
//! it correct across disconnects.
//!
//! - [`SessionSupervisor`]: owns the collaborators and the cache, spawns the run loop
//! - [`SupervisorHandle`]: health query, cache access, shutdown
//! - [`SupervisorStatus`]: what the health query returns
//! - [`telemetry`]: tracing subscriber setup for binaries
//!
//! ```text
//! SnapshotSource ──▶ ReconciledCache ◀── apply ── consumer task ◀── UpdateStream
//!                          ▲                           ▲
//!                     mark_stale                  keepalive task ──▶ SessionKeyManager
//! ```

mod keepalive;
pub mod status;
pub mod supervisor;
pub mod telemetry;

pub use status::SupervisorStatus;
pub use supervisor::{SessionSupervisor, SupervisorHandle};

//! # balsync-cache
//!
//! The reconciled balance cache for **BalSync**.
//!
//! - [`ReconciledCache`]: snapshot baseline, idempotent overwrite updates, resync
//! - [`CacheState`]: UNINITIALIZED / SYNCED / STALE / CLOSED lifecycle
//! - [`CacheView`]: detached, ordered, point-in-time copy with a content digest
//!
//! The cache never talks to the network. The session supervisor in
//! `balsync-supervisor` feeds it snapshots and updates and tells it when a
//! gap may have occurred.

pub mod reconciled;
pub mod state;
pub mod view;

pub use reconciled::{InitOutcome, ReconciledCache};
pub use state::CacheState;
pub use view::CacheView;

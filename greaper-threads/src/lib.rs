//!
//! greaper-threads - Thread Registry
//!
//! Provides managed OS threads for the greaper runtime:
//!
//! - [`Thread`] wraps one OS thread: id, display name, join-on-destruction
//!   policy, `try_join`/`join`, and a start gate for suspended starts
//! - [`ThreadConfig`]/[`ThreadOptions`] describe how a thread is created
//! - [`ThreadManager`] owns the name/id registry, fires creation and
//!   destruction events, and hands its registry off when hot-swapped
//!
//! The manager participates in the interface activation protocol: on its
//! first activation it synthesizes an entry for the calling ("main")
//! thread; on a swap it adopts every thread the predecessor tracked.
//!

pub mod config;
pub mod manager;
pub mod thread;

pub use config::*;
pub use manager::*;
pub use thread::*;

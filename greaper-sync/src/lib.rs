//!
//! greaper-sync - Synchronization Primitives
//!
//! Provides the lock, signal, semaphore and barrier types the rest of the
//! greaper runtime is built on. Every primitive wraps the OS threading API
//! and exposes scoped-acquisition guards that release on every exit path.
//!
//! ## Compile-time no-op variant
//!
//! Each primitive carries a `const ENABLED: bool = true` parameter. With
//! `ENABLED = false` every wait and notify degrades to a no-op while
//! `is_enabled()` reports `false`, so higher layers can be compiled
//! lock-free for single-threaded configurations without code changes.
//! Contending a disabled mutex is a contract violation and aborts.
//!
//! ## Fatal errors
//!
//! Operating on a poisoned or otherwise invalid primitive is a programming
//! defect, not a runtime condition a caller can handle. Such misuse goes
//! through [`fatal`], which logs a diagnostic and aborts the process.
//!

pub mod barrier;
pub mod mutex;
pub mod rwmutex;
pub mod semaphore;
pub mod signal;

pub use barrier::*;
pub use mutex::*;
pub use rwmutex::*;
pub use semaphore::*;
pub use signal::*;

/// Abort the process after emitting a diagnostic.
///
/// Used for non-recoverable conditions: poisoned locks, contended
/// disabled primitives, semaphore releases past the maximum.
pub fn fatal(what: &str) -> ! {
    tracing::error!(target: "greaper::sync", "fatal: {what}");
    std::process::abort()
}

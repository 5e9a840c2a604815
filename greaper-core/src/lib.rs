//!
//! greaper-core - Runtime Core Types
//!
//! This crate provides the fundamental types shared across the greaper
//! runtime crates:
//!
//! - `Error` and `Result` for every recoverable failure
//! - `Event` and `Subscription` for observer streams with RAII unsubscribe
//! - `Interface`, `InterfaceKind`, `ActivationChange` and `Runtime` for the
//!   interface activation protocol
//!
//! Exactly one interface of each kind is active at a time; the `Runtime`
//! context object replaces process-wide singletons and owns the activation
//! event stream dependents subscribe to.
//!

pub mod error;
pub mod event;
pub mod interface;

pub use error::*;
pub use event::*;
pub use interface::*;

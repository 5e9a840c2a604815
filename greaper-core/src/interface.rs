//!
//! Interface activation protocol
//!
//! A greaper application is assembled from independently loadable
//! libraries that register interface implementations. Exactly one
//! implementation of each [`InterfaceKind`] is active at a time; the
//! [`Runtime`] context object tracks the active set and broadcasts every
//! hand-off on its activation event so dependents can re-home themselves.
//!
//! Activation order for a swap: the map entry is replaced, the incoming
//! interface receives `on_activation(previous)` (this is where state such
//! as a thread registry transfers), then the outgoing one receives
//! `on_deactivation`, then the change is broadcast.
//!

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use greaper_sync::RwMutex;

use crate::error::{Error, Result};
use crate::event::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceKind {
    ThreadManager,
    TaskScheduler,
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ThreadManager => write!(f, "ThreadManager"),
            Self::TaskScheduler => write!(f, "TaskScheduler"),
        }
    }
}

/// A manager registrable with the [`Runtime`].
///
/// `as_any` supports downcasting an active interface to its concrete type;
/// implementations return `self`.
pub trait Interface: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> InterfaceKind;

    fn as_any(&self) -> &dyn Any;

    /// Called when this instance becomes the active one of its kind.
    /// `previous` is the instance it replaces, if any.
    fn on_activation(&self, previous: Option<Arc<dyn Interface>>);

    /// Called when this instance stops being the active one of its kind.
    fn on_deactivation(&self);
}

/// Payload of the runtime-wide activation event. Fired once with
/// `active = false` for the outgoing interface and once with
/// `active = true` for the incoming one.
#[derive(Clone)]
pub struct ActivationChange {
    pub active: bool,
    pub old: Option<Arc<dyn Interface>>,
    pub new: Option<Arc<dyn Interface>>,
}

/// The explicit runtime context. Constructed once and passed to whatever
/// needs interface discovery; there is no process-wide singleton.
pub struct Runtime {
    active: RwMutex<HashMap<InterfaceKind, Arc<dyn Interface>>>,
    on_activation: Event<ActivationChange>,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            active: RwMutex::new(HashMap::new()),
            on_activation: Event::new(),
        }
    }

    /// Make `interface` the active instance of its kind, handing off from
    /// the previously active instance if one exists.
    pub fn activate(&self, interface: Arc<dyn Interface>) {
        let kind = interface.kind();
        let old = {
            let mut active = self.active.write();
            active.insert(kind, Arc::clone(&interface))
        };

        tracing::info!(
            target: "greaper::runtime",
            kind = %kind,
            name = interface.name(),
            swapped = old.is_some(),
            "interface activated"
        );

        // Hand-off callbacks run outside the map lock; handlers may query
        // the runtime again.
        interface.on_activation(old.clone());
        if let Some(old) = &old {
            old.on_deactivation();
            self.on_activation.emit(&ActivationChange {
                active: false,
                old: Some(Arc::clone(old)),
                new: Some(Arc::clone(&interface)),
            });
        }
        self.on_activation.emit(&ActivationChange {
            active: true,
            old,
            new: Some(interface),
        });
    }

    /// Deactivate the active instance of `kind` without a successor.
    pub fn deactivate(&self, kind: InterfaceKind) -> Result<()> {
        let old = {
            let mut active = self.active.write();
            active.remove(&kind)
        };
        let Some(old) = old else {
            return Err(Error::invalid_state(format!(
                "no active {kind} to deactivate"
            )));
        };

        tracing::info!(
            target: "greaper::runtime",
            kind = %kind,
            name = old.name(),
            "interface deactivated"
        );

        old.on_deactivation();
        self.on_activation.emit(&ActivationChange {
            active: false,
            old: Some(old),
            new: None,
        });
        Ok(())
    }

    /// The currently active instance of `kind`, if any.
    pub fn active(&self, kind: InterfaceKind) -> Option<Arc<dyn Interface>> {
        self.active.read().get(&kind).cloned()
    }

    /// The activation event stream. Subscribers see every hand-off.
    pub fn on_activation(&self) -> &Event<ActivationChange> {
        &self.on_activation
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<InterfaceKind> = self.active.read().keys().copied().collect();
        f.debug_struct("Runtime").field("active", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Probe {
        name: String,
        activations: AtomicUsize,
        deactivations: AtomicUsize,
    }

    impl Probe {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                activations: AtomicUsize::new(0),
                deactivations: AtomicUsize::new(0),
            })
        }
    }

    impl Interface for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> InterfaceKind {
            InterfaceKind::ThreadManager
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn on_activation(&self, _previous: Option<Arc<dyn Interface>>) {
            self.activations.fetch_add(1, Ordering::SeqCst);
        }

        fn on_deactivation(&self) {
            self.deactivations.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_activate_and_query() {
        let runtime = Runtime::new();
        let probe = Probe::new("tm-a");

        runtime.activate(probe.clone());
        assert_eq!(probe.activations.load(Ordering::SeqCst), 1);

        let active = runtime.active(InterfaceKind::ThreadManager).unwrap();
        assert_eq!(active.name(), "tm-a");
        assert!(runtime.active(InterfaceKind::TaskScheduler).is_none());
    }

    #[test]
    fn test_swap_deactivates_predecessor() {
        let runtime = Runtime::new();
        let a = Probe::new("tm-a");
        let b = Probe::new("tm-b");

        runtime.activate(a.clone());
        runtime.activate(b.clone());

        assert_eq!(a.deactivations.load(Ordering::SeqCst), 1);
        assert_eq!(b.activations.load(Ordering::SeqCst), 1);
        assert_eq!(
            runtime.active(InterfaceKind::ThreadManager).unwrap().name(),
            "tm-b"
        );
    }

    #[test]
    fn test_activation_events_fired() {
        let runtime = Runtime::new();
        let activated = Arc::new(AtomicUsize::new(0));
        let deactivated = Arc::new(AtomicUsize::new(0));

        let _sub = {
            let activated = Arc::clone(&activated);
            let deactivated = Arc::clone(&deactivated);
            runtime.on_activation().subscribe(move |change| {
                if change.active {
                    activated.fetch_add(1, Ordering::SeqCst);
                } else {
                    deactivated.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        runtime.activate(Probe::new("tm-a"));
        runtime.activate(Probe::new("tm-b"));
        runtime.deactivate(InterfaceKind::ThreadManager).unwrap();

        assert_eq!(activated.load(Ordering::SeqCst), 2);
        assert_eq!(deactivated.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_deactivate_without_active_fails() {
        let runtime = Runtime::new();
        let err = runtime.deactivate(InterfaceKind::TaskScheduler).unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }
}

//!
//! Thread creation configuration
//!
//! [`ThreadOptions`] is the serializable half of the configuration surface
//! (everything except the closure), so deployments can describe thread
//! shapes in config files. [`ThreadConfig`] couples options with the work
//! closure handed to [`ThreadManager::create_thread`].
//!
//! [`ThreadManager::create_thread`]: crate::ThreadManager::create_thread
//!

use serde::{Deserialize, Serialize};

/// Recognized thread-creation options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadOptions {
    /// Display and lookup key. Must be unique within a manager.
    pub name: String,
    /// Stack size in bytes; `0` selects the OS default.
    pub stack_size: usize,
    /// The thread does not begin running until explicitly resumed.
    pub start_suspended: bool,
    /// The owning handle's destructor blocks until the OS thread exits.
    pub join_at_destruction: bool,
}

impl Default for ThreadOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            stack_size: 0,
            start_suspended: false,
            join_at_destruction: false,
        }
    }
}

/// Full creation request: options plus the closure the thread runs.
pub struct ThreadConfig {
    pub options: ThreadOptions,
    pub(crate) work: Box<dyn FnOnce() + Send + 'static>,
}

impl ThreadConfig {
    pub fn new(name: impl Into<String>, work: impl FnOnce() + Send + 'static) -> Self {
        Self {
            options: ThreadOptions {
                name: name.into(),
                ..ThreadOptions::default()
            },
            work: Box::new(work),
        }
    }

    pub fn with_options(options: ThreadOptions, work: impl FnOnce() + Send + 'static) -> Self {
        Self {
            options,
            work: Box::new(work),
        }
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.options.stack_size = bytes;
        self
    }

    pub fn start_suspended(mut self, suspended: bool) -> Self {
        self.options.start_suspended = suspended;
        self
    }

    pub fn join_at_destruction(mut self, join: bool) -> Self {
        self.options.join_at_destruction = join;
        self
    }
}

impl std::fmt::Debug for ThreadConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadConfig")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

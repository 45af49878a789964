//! Per-service runtime state machine
//!
//! Every service the layer knows has one [`ServiceSlot`] tracking its
//! lifecycle state, reference count and live instance. All transitions go
//! through the checked methods here; the layer owns the slot table and is
//! the only caller.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use trellis_core::Service;

/// Lifecycle state of one service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Declared but never constructed
    NotConstructed,
    /// Factory currently running
    Constructing,
    /// Live instance held, reference count active
    Constructed,
    /// Terminal; the service cannot be resurrected
    Destroyed,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::NotConstructed => "not-constructed",
            ServiceState::Constructing => "constructing",
            ServiceState::Constructed => "constructed",
            ServiceState::Destroyed => "destroyed",
        };
        write!(f, "{}", name)
    }
}

/// A state transition was attempted from the wrong state
#[derive(Error, Debug, Clone, Copy)]
#[error("invalid transition: {attempted} while {from}")]
pub struct InvalidTransition {
    /// State the slot was in
    pub from: ServiceState,
    /// The attempted transition
    pub attempted: &'static str,
}

/// Runtime slot of one service: state, reference count and instance
pub struct ServiceSlot {
    state: ServiceState,
    use_count: i32,
    instance: Option<Arc<dyn Service>>,
}

impl ServiceSlot {
    /// A fresh slot in the not-constructed state
    pub fn new() -> Self {
        Self {
            state: ServiceState::NotConstructed,
            use_count: 0,
            instance: None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// Current reference count; meaningful only while constructed
    pub fn use_count(&self) -> i32 {
        self.use_count
    }

    /// The live instance, if constructed
    pub fn instance(&self) -> Option<&Arc<dyn Service>> {
        self.instance.as_ref()
    }

    /// Enter construction. Only valid from the not-constructed state; an
    /// attempt while already constructing is the runtime cycle trip.
    pub fn begin_construction(&mut self) -> Result<(), InvalidTransition> {
        match self.state {
            ServiceState::NotConstructed => {
                self.state = ServiceState::Constructing;
                Ok(())
            }
            from => Err(InvalidTransition {
                from,
                attempted: "begin construction",
            }),
        }
    }

    /// Store the constructed instance and hand out the first reference
    pub fn finish_construction(
        &mut self,
        instance: Arc<dyn Service>,
    ) -> Result<(), InvalidTransition> {
        match self.state {
            ServiceState::Constructing => {
                self.state = ServiceState::Constructed;
                self.use_count = 1;
                self.instance = Some(instance);
                Ok(())
            }
            from => Err(InvalidTransition {
                from,
                attempted: "finish construction",
            }),
        }
    }

    /// Abandon a failed construction. Terminal; the factory is never
    /// retried.
    pub fn abort_construction(&mut self) -> Result<(), InvalidTransition> {
        match self.state {
            ServiceState::Constructing => {
                self.state = ServiceState::Destroyed;
                Ok(())
            }
            from => Err(InvalidTransition {
                from,
                attempted: "abort construction",
            }),
        }
    }

    /// Hand out one more reference, returning the new count
    pub fn add_ref(&mut self) -> Result<i32, InvalidTransition> {
        match self.state {
            ServiceState::Constructed => {
                self.use_count += 1;
                Ok(self.use_count)
            }
            from => Err(InvalidTransition {
                from,
                attempted: "add reference",
            }),
        }
    }

    /// Release one reference, returning the new count
    pub fn remove_ref(&mut self) -> Result<i32, InvalidTransition> {
        match self.state {
            ServiceState::Constructed => {
                self.use_count -= 1;
                Ok(self.use_count)
            }
            from => Err(InvalidTransition {
                from,
                attempted: "remove reference",
            }),
        }
    }

    /// Move to the terminal destroyed state and take the instance out for
    /// teardown
    pub fn take_for_destroy(&mut self) -> Result<Arc<dyn Service>, InvalidTransition> {
        match self.state {
            ServiceState::Constructed => {
                self.state = ServiceState::Destroyed;
                self.use_count = 0;
                self.instance.take().ok_or(InvalidTransition {
                    from: ServiceState::Constructed,
                    attempted: "take instance",
                })
            }
            from => Err(InvalidTransition {
                from,
                attempted: "destroy",
            }),
        }
    }
}

impl Default for ServiceSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServiceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceSlot")
            .field("state", &self.state)
            .field("use_count", &self.use_count)
            .field("instance", &self.instance.is_some())
            .finish()
    }
}

//! Lifecycle hooks of the host application runtime.
//!
//! The networking runtime runs no event loop of its own. Hosts register
//! handlers here and dispatch phases as their loop advances.

use std::sync::Arc;

use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum LifecyclePhase {
    Construct = 0,
    Begin = 1,
    Resumed = 2,
    Suspended = 3,
    End = 4,
    Update = 5,
    Deconstruct = 6,
}

impl LifecyclePhase {
    pub fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            0 => LifecyclePhase::Construct,
            1 => LifecyclePhase::Begin,
            2 => LifecyclePhase::Resumed,
            3 => LifecyclePhase::Suspended,
            4 => LifecyclePhase::End,
            5 => LifecyclePhase::Update,
            6 => LifecyclePhase::Deconstruct,
            _ => return None,
        })
    }
}

pub trait RuntimeHandler: Send + Sync {
    fn on_construct(&self) {}
    fn on_begin(&self) {}
    fn on_resumed(&self) {}
    fn on_suspended(&self) {}
    fn on_end(&self) {}
    fn on_update(&self) {}
    fn on_deconstruct(&self) {}
}

#[derive(Default)]
pub struct HookRegistry {
    handlers: RwLock<Vec<Arc<dyn RuntimeHandler>>>,
}

impl HookRegistry {
    pub fn register(&self, handler: Arc<dyn RuntimeHandler>) {
        self.handlers.write().push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke `phase` on every handler in registration order.
    pub fn dispatch(&self, phase: LifecyclePhase) {
        // snapshot so handlers may register more handlers
        let handlers = self.handlers.read().clone();
        for handler in handlers {
            match phase {
                LifecyclePhase::Construct => handler.on_construct(),
                LifecyclePhase::Begin => handler.on_begin(),
                LifecyclePhase::Resumed => handler.on_resumed(),
                LifecyclePhase::Suspended => handler.on_suspended(),
                LifecyclePhase::End => handler.on_end(),
                LifecyclePhase::Update => handler.on_update(),
                LifecyclePhase::Deconstruct => handler.on_deconstruct(),
            }
        }
    }
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Address, Module, ModuleIdentifier, Priority};

/// A point transmitted by the local producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub address: Address,
    pub priority: Priority,
    pub name: String,
    /// Insertion ordered, at most one module per identifier.
    pub modules: Vec<Module>,
}

impl Point {
    pub fn new(address: Address, priority: Priority, name: impl Into<String>) -> Self {
        Self {
            address,
            priority,
            name: name.into(),
            modules: Vec::new(),
        }
    }

    pub fn key(&self) -> (Address, Priority) {
        (self.address, self.priority)
    }

    pub fn module(&self, identifier: ModuleIdentifier) -> Option<&Module> {
        self.modules.iter().find(|m| m.identifier() == identifier)
    }

    pub fn has_module(&self, identifier: ModuleIdentifier) -> bool {
        self.module(identifier).is_some()
    }

    /// Replaces the module with the same identifier. Returns false when the
    /// point does not carry that module.
    pub fn replace_module(&mut self, module: Module) -> bool {
        match self
            .modules
            .iter_mut()
            .find(|m| m.identifier() == module.identifier())
        {
            Some(slot) => {
                *slot = module;
                true
            }
            None => false,
        }
    }

    pub fn remove_module(&mut self, identifier: ModuleIdentifier) -> Option<Module> {
        let index = self
            .modules
            .iter()
            .position(|m| m.identifier() == identifier)?;
        Some(self.modules.remove(index))
    }
}

/// A point as received from a remote producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerPoint {
    pub address: Address,
    pub priority: Priority,
    pub name: String,
    /// Identifier of the producer transmitting the point.
    pub cid: Uuid,
    /// Producer sample time in microseconds.
    pub sample_time: u64,
    pub modules: Vec<Module>,
}

impl ConsumerPoint {
    /// Identity used when merging deltas and ordering the point list.
    pub fn identity(&self) -> (Address, Priority, Uuid) {
        (self.address, self.priority, self.cid)
    }
}

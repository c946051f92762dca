//! Contracts for the external protocol component.
//!
//! The component owns the wire codec and sockets. The models call into it
//! while holding their exclusive lock, so implementations must not call back
//! into the same model synchronously from these methods.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    log::{Log, LogCategory},
    model::{
        Address, ConsumerPoint, ConsumerStatus, Module, ModuleIdentifier, Priority,
        ProducerStatus,
    },
    ComponentError,
};

pub type ComponentResult = std::result::Result<(), ComponentError>;

/// Identity and transport settings handed to a component on start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartParams {
    pub cid: Uuid,
    pub name: String,
    pub interface: String,
}

/// Debug output the component should forward to the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentLogging {
    pub debug: bool,
    pub debug_socket: bool,
}

pub trait ProducerComponent: Send + Sync {
    fn start(&self, params: &StartParams) -> ComponentResult;
    fn stop(&self);
    fn update_name(&self, name: &str);
    fn set_logging(&self, logging: ComponentLogging);

    fn add_point(&self, address: Address, priority: Priority, name: &str) -> ComponentResult;
    fn remove_points(&self, address: Address, priority: Priority) -> ComponentResult;
    fn rename_points(&self, address: Address, name: &str) -> ComponentResult;

    fn add_module(&self, module: &Module, address: Address, priority: Priority)
        -> ComponentResult;
    fn remove_module(
        &self,
        identifier: ModuleIdentifier,
        address: Address,
        priority: Priority,
    ) -> ComponentResult;
    fn update_module(
        &self,
        module: &Module,
        address: Address,
        priority: Priority,
    ) -> ComponentResult;
}

pub trait ConsumerComponent: Send + Sync {
    fn start(&self, params: &StartParams) -> ComponentResult;
    fn stop(&self);
    fn update_name(&self, name: &str);
    fn set_logging(&self, logging: ComponentLogging);

    fn add_module_types(&self, identifiers: &[ModuleIdentifier]);
    fn remove_module_types(&self, identifiers: &[ModuleIdentifier]);
    fn observe_system_numbers(&self, system_numbers: &BTreeSet<u8>);
    fn request_producer_point_names(&self);
}

/// Error and debug reporting shared by both component delegates. Everything
/// lands in the model's log.
pub trait ComponentDiagnostics {
    fn diagnostics_log(&self) -> &Log;

    fn error_reported(&self, error: &ComponentError) {
        self.diagnostics_log()
            .add(error.log_category(), error.to_string());
    }

    fn sequence_error(&self, cid: Uuid, description: &str) {
        self.diagnostics_log()
            .add(LogCategory::SequenceError, format!("{cid}: {description}"));
    }

    fn debug_message(&self, text: &str) {
        self.diagnostics_log().add(LogCategory::Debug, text);
    }

    fn debug_socket_message(&self, text: &str) {
        self.diagnostics_log().add(LogCategory::DebugSocket, text);
    }
}

/// Asynchronous reports from a producer component.
pub trait ProducerComponentDelegate: ComponentDiagnostics + Send + Sync {
    fn consumer_status_changed(&self, status: ConsumerStatus);
}

/// Asynchronous reports from a consumer component.
pub trait ConsumerComponentDelegate: ComponentDiagnostics + Send + Sync {
    /// Authoritative set of every point currently received.
    fn replace_all_points(&self, points: Vec<ConsumerPoint>);
    /// Points that changed since the last report.
    fn points_changed(&self, points: Vec<ConsumerPoint>);
    fn producer_status_changed(&self, status: ProducerStatus);
    fn discovered_system_numbers(&self, system_numbers: BTreeSet<u8>);
}

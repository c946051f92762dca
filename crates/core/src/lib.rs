//! Core library for the OTP tester.
//!
//! The crate holds the shared state behind a tester that either produces
//! motion data for remote consumers or consumes it from remote producers.
//! Wire encoding and sockets live in an external component that plugs in
//! through the traits in [`component`]. Synthetic motion is generated by
//! [`fade::Fade`] values driven on a timer by [`fade::FadeEngine`].

pub mod component;
pub mod config;
pub mod consumer;
pub mod error;
pub mod fade;
pub mod log;
pub mod model;
pub mod notify;
pub mod producer;

#[cfg(test)]
mod testing;

pub use component::{
    ComponentDiagnostics, ComponentLogging, ComponentResult, ConsumerComponent,
    ConsumerComponentDelegate, ProducerComponent, ProducerComponentDelegate, StartParams,
};
pub use config::{ConsumerConfig, FadeConfig, LogConfig, ProducerConfig, TesterConfig};
pub use consumer::{ConsumerModel, ConsumerModelDelegate};
pub use error::{ComponentError, Result, TesterError, ValidationError};
pub use fade::{Direction, Fade, FadeEngine, FadeEngineDelegate, FadePattern};
pub use log::{Log, LogCategory, LogDelegate, LogFilter, LogMessage};
pub use model::{
    Address, ConsumerPoint, ConsumerStatus, Module, ModuleIdentifier, ParentReference, PeerState,
    Point, Priority, ProducerStatus, Xyz,
};
pub use notify::Notifier;
pub use producer::{ActiveFade, ProducerModel, ProducerModelDelegate};

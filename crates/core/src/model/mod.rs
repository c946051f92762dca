//! Value types shared by the producer and consumer models.

mod module;
mod peer;
mod point;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

pub use module::{Module, ModuleIdentifier, ParentReference, Xyz, ROTATION_MODULUS};
pub use peer::{upsert_status, ConsumerStatus, PeerState, PeerStatus, ProducerStatus};
pub use point::{ConsumerPoint, Point};

/// Point priority. Higher values win when several producers transmit the
/// same address.
pub type Priority = u8;

pub const DEFAULT_PRIORITY: Priority = 100;
pub const MAX_PRIORITY: Priority = 200;

pub const MIN_SYSTEM: u8 = 1;
pub const MAX_SYSTEM: u8 = 200;
pub const MIN_GROUP: u16 = 1;
pub const MAX_GROUP: u16 = 60_000;
pub const MIN_POINT: u32 = 1;
pub const MAX_POINT: u32 = 4_000_000_000;

/// Location of a point on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address {
    pub system: u8,
    pub group: u16,
    pub point: u32,
}

impl Address {
    pub const fn new(system: u8, group: u16, point: u32) -> Self {
        Self {
            system,
            group,
            point,
        }
    }

    /// Checks that every component lies in its legal range.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(MIN_SYSTEM..=MAX_SYSTEM).contains(&self.system) {
            return Err(ValidationError::InvalidSystemNumber(self.system));
        }
        if !(MIN_GROUP..=MAX_GROUP).contains(&self.group) {
            return Err(ValidationError::InvalidGroupNumber(self.group));
        }
        if !(MIN_POINT..=MAX_POINT).contains(&self.point) {
            return Err(ValidationError::InvalidPointNumber(self.point));
        }
        Ok(())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.system, self.group, self.point)
    }
}

pub fn validate_priority(priority: Priority) -> Result<(), ValidationError> {
    if priority > MAX_PRIORITY {
        Err(ValidationError::InvalidPriority(priority))
    } else {
        Ok(())
    }
}

/// Returns true when `system` is a legal system number.
pub fn is_valid_system_number(system: u8) -> bool {
    (MIN_SYSTEM..=MAX_SYSTEM).contains(&system)
}

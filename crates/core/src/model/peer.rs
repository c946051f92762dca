use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ModuleIdentifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerState {
    Online,
    Offline,
}

/// Status of a remote component, keyed by its component identifier.
pub trait PeerStatus {
    fn cid(&self) -> Uuid;
}

/// A remote consumer as seen by the local producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerStatus {
    pub cid: Uuid,
    pub name: String,
    pub ip_address: IpAddr,
    pub state: PeerState,
    pub sequence_errors: u32,
}

/// A remote producer as seen by the local consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerStatus {
    pub cid: Uuid,
    pub name: String,
    pub ip_address: IpAddr,
    pub state: PeerState,
    pub sequence_errors: u32,
    pub module_identifiers: Vec<ModuleIdentifier>,
}

impl PeerStatus for ConsumerStatus {
    fn cid(&self) -> Uuid {
        self.cid
    }
}

impl PeerStatus for ProducerStatus {
    fn cid(&self) -> Uuid {
        self.cid
    }
}

/// Replaces the status with a matching identifier in place, or appends it.
///
/// Returns the replaced row so a view can refresh just that row; `None` means
/// the list grew and should be redrawn in full.
pub fn upsert_status<T: PeerStatus>(statuses: &mut Vec<T>, status: T) -> Option<usize> {
    match statuses.iter().position(|s| s.cid() == status.cid()) {
        Some(index) => {
            statuses[index] = status;
            Some(index)
        }
        None => {
            statuses.push(status);
            None
        }
    }
}

//! Type definitions for the participant seam
//!
//! This module contains the data types the core shares with the enclosing
//! participant: endpoint addressing, service descriptors and the discovery
//! event vocabulary.

use std::fmt;

/// Address of a service endpoint within the distributed simulation.
///
/// The participant id is assigned by the registry; the endpoint id is unique
/// per service within one participant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointAddress {
    /// Id of the participant that owns the endpoint
    pub participant: u32,
    /// Id of the endpoint within the participant
    pub endpoint: u32,
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.participant, self.endpoint)
    }
}

/// Kind of a remote service as announced by service discovery
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServiceType {
    /// Not announced or not yet known
    #[default]
    Undefined,
    /// A simulated link, i.e. a network simulator taking ownership of a bus
    Link,
    /// A plain bus controller
    Controller,
}

/// Identity of a service instance inside the simulation.
///
/// Carries everything the core needs to address a peer and to decide whether
/// a discovered service is relevant for one of its controllers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceDescriptor {
    /// Name of the owning participant
    pub participant_name: String,
    /// Name of the service (i.e. the controller name from the configuration)
    pub service_name: String,
    /// Name of the network the service is attached to
    pub network_name: String,
    /// Kind of the service
    pub service_type: ServiceType,
    /// Id of the service, unique per participant
    pub service_id: u64,
    /// Transport-level address of the service
    pub endpoint_address: EndpointAddress,
}

impl ServiceDescriptor {
    /// Endpoint address used to key per-peer bookkeeping
    pub fn to_endpoint_address(&self) -> EndpointAddress {
        self.endpoint_address
    }
}

impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.network_name, self.participant_name, self.service_name
        )
    }
}

/// Direction of a transmission as seen by one controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitDirection {
    /// The controller sent the message
    Send,
    /// The controller received the message
    Receive,
}

impl fmt::Display for TransmitDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send => write!(f, "TX"),
            Self::Receive => write!(f, "RX"),
        }
    }
}

/// Lifecycle events delivered by the service discovery of the participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceDiscoveryEventType {
    /// A remote service appeared
    ServiceCreated,
    /// A remote service left the simulation
    ServiceRemoved,
}

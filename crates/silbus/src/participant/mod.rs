//! Seams to the enclosing participant
//!
//! The participant itself (construction, configuration loading, transport
//! encoding, the time scheduler) is not part of this crate. The core only
//! consumes it through the traits defined here:
//! - [`MessageTransport`] carries outbound wire messages to peers
//! - [`TimeProvider`] supplies the current virtual time
//!
//! Inbound traffic and service discovery events are pushed into the core by
//! the participant via the `receive_*` methods on the controllers.

pub mod types;

pub use types::{
    EndpointAddress, ServiceDescriptor, ServiceDiscoveryEventType, ServiceType, TransmitDirection,
};

use std::time::Duration;

use crate::lin::wire::WireLinMessage;

/// Outbound message path of a controller.
///
/// Implementations deliver to remote endpoints only; a controller never
/// receives its own broadcasts through this trait. Wire-level encoding is
/// owned by the transport.
pub trait MessageTransport: Send + Sync {
    /// Deliver `msg` to every other endpoint on the sender's network
    fn send_broadcast(&self, from: &ServiceDescriptor, msg: WireLinMessage);

    /// Deliver `msg` to all endpoints of one specific participant
    fn send_targeted(&self, from: &ServiceDescriptor, target_participant: &str, msg: WireLinMessage);
}

/// Source of simulation time.
///
/// Before a synchronized time provider is attached the participant runs on
/// wallclock time; the replay scheduler stays idle in that phase.
pub trait TimeProvider: Send + Sync {
    /// Current simulation time
    fn now(&self) -> Duration;

    /// Whether virtual time is currently synchronized across participants
    fn is_synchronizing_virtual_time(&self) -> bool;
}

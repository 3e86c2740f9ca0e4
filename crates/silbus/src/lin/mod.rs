//! LIN (Local Interconnect Network) service
//!
//! This module provides the LIN controller implementation, which is
//! responsible for:
//! - Master and slave operation with pre-declared or dynamic responses
//! - Mirroring the response tables of all peers on the same network
//! - Header resolution and frame-status evaluation
//! - The go-to-sleep and wakeup handshakes
//! - Switching between self-sufficient (trivial) operation and a network
//!   simulator owning the bus (detailed)

pub mod controller;
mod behavior;
mod detailed;
pub mod node;
#[cfg(test)]
mod tests;
mod trivial;
pub mod types;
pub mod wire;

// Re-export the public API
pub use self::controller::{LinController, SharedLinController};
pub use self::node::LinNode;
pub use self::types::*;
pub use self::wire::{
    LinControllerStatusUpdate, LinFrameResponseUpdate, LinSendFrameHeaderRequest,
    LinSendFrameRequest, LinTransmission, LinWakeupPulse, WireLinControllerConfig, WireLinMessage,
};

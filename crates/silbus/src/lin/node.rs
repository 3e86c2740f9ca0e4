//! Per-endpoint LIN node bookkeeping
//!
//! A controller keeps one [`LinNode`] for itself and one for every peer it
//! has seen a message from. Nodes mirror the peer's declared responses so
//! the trivial behavior can resolve headers locally.

use log::warn;

use super::types::{
    LinControllerMode, LinControllerStatus, LinFrameResponse, LinId, SimulationMode, MAX_LIN_ID,
};
use crate::participant::EndpointAddress;

/// Bookkeeping for one LIN node, own or remote
#[derive(Debug, Clone)]
pub struct LinNode {
    pub address: EndpointAddress,
    pub controller_mode: LinControllerMode,
    pub controller_status: LinControllerStatus,
    pub simulation_mode: SimulationMode,
    /// Response table indexed by frame id
    pub responses: [LinFrameResponse; MAX_LIN_ID as usize],
}

impl LinNode {
    pub fn new(address: EndpointAddress) -> Self {
        Self {
            address,
            controller_mode: LinControllerMode::Inactive,
            controller_status: LinControllerStatus::Unknown,
            simulation_mode: SimulationMode::Default,
            responses: [LinFrameResponse::default(); MAX_LIN_ID as usize],
        }
    }

    /// Apply a batch of response declarations; invalid ids are skipped with
    /// a warning.
    pub fn update_responses(&mut self, responses: &[LinFrameResponse]) {
        for response in responses {
            let id = response.frame.id;
            if id >= MAX_LIN_ID {
                warn!("Ignoring LinFrameResponse update for invalid ID={}", id);
                continue;
            }
            self.responses[id as usize] = *response;
        }
    }

    /// Replace the payload bytes of an already configured slot
    pub fn update_tx_buffer(&mut self, id: LinId, data: [u8; 8]) {
        if id >= MAX_LIN_ID {
            warn!("Ignoring LinFrameResponse update for invalid ID={}", id);
            return;
        }
        self.responses[id as usize].frame.data = data;
    }
}

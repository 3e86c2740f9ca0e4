//! LIN wire messages
//!
//! The message types exchanged between LIN controllers and a network
//! simulator. Encoding for the transport is out of scope; these values
//! cross the [`crate::participant::MessageTransport`] seam as-is.

use std::time::Duration;

use super::types::{
    LinControllerMode, LinControllerStatus, LinFrame, LinFrameResponse, LinFrameResponseType,
    LinFrameStatus, LinId, SimulationMode,
};
use crate::participant::TransmitDirection;

/// A finished LIN transmission, independent of success or error
#[derive(Debug, Clone, PartialEq)]
pub struct LinTransmission {
    /// Time at the end of the transmission
    pub timestamp: Duration,
    pub frame: LinFrame,
    pub status: LinFrameStatus,
}

/// Request to perform an AUTOSAR-style send operation
#[derive(Debug, Clone, PartialEq)]
pub struct LinSendFrameRequest {
    pub frame: LinFrame,
    pub response_type: LinFrameResponseType,
}

/// Request to transmit a header without a payload declaration
#[derive(Debug, Clone, PartialEq)]
pub struct LinSendFrameHeaderRequest {
    pub timestamp: Duration,
    pub id: LinId,
}

/// A LIN wakeup pulse
#[derive(Debug, Clone, PartialEq)]
pub struct LinWakeupPulse {
    pub timestamp: Duration,
    pub direction: TransmitDirection,
}

/// Announces a changed controller status to all LIN participants
#[derive(Debug, Clone, PartialEq)]
pub struct LinControllerStatusUpdate {
    pub timestamp: Duration,
    pub status: LinControllerStatus,
}

/// Announces changed frame-response declarations to all LIN participants
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinFrameResponseUpdate {
    pub frame_responses: Vec<LinFrameResponse>,
}

/// Full controller configuration, broadcast once on initialization
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WireLinControllerConfig {
    pub baud_rate: u32,
    pub controller_mode: LinControllerMode,
    pub simulation_mode: SimulationMode,
    pub frame_responses: Vec<LinFrameResponse>,
}

/// Union of all LIN messages crossing the transport seam
#[derive(Debug, Clone, PartialEq)]
pub enum WireLinMessage {
    SendFrameRequest(LinSendFrameRequest),
    SendFrameHeaderRequest(LinSendFrameHeaderRequest),
    Transmission(LinTransmission),
    WakeupPulse(LinWakeupPulse),
    ControllerConfig(WireLinControllerConfig),
    ControllerStatusUpdate(LinControllerStatusUpdate),
    FrameResponseUpdate(LinFrameResponseUpdate),
}

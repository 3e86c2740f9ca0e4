//! Type definitions for the LIN service
//!
//! This module contains the LIN data model: frame and response types, the
//! controller mode/status vocabulary and the event payloads delivered to
//! registered handlers.

use std::fmt;
use std::time::Duration;

use crate::participant::TransmitDirection;

/// LIN frame identifier; valid values are below [`MAX_LIN_ID`]
pub type LinId = u8;

/// Upper bound (exclusive) of valid LIN frame identifiers
pub const MAX_LIN_ID: LinId = 64;

/// Upper bound (inclusive) of a LIN payload length
pub const MAX_DATA_LENGTH: LinDataLength = 8;

/// Payload length of a LIN frame in bytes, or [`DATA_LENGTH_UNKNOWN`]
pub type LinDataLength = u8;

/// Sentinel for a data length that has not been pinned yet
pub const DATA_LENGTH_UNKNOWN: LinDataLength = 255;

/// Identifier of the go-to-sleep frame
pub const GO_TO_SLEEP_ID: LinId = 0x3C;

/// Checksum model of a LIN frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinChecksumModel {
    /// Not pinned yet; adopted from the first successful reception
    #[default]
    Unknown,
    /// Classic checksum covering the data bytes only
    Classic,
    /// Enhanced checksum covering data bytes and identifier
    Enhanced,
}

impl fmt::Display for LinChecksumModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Classic => write!(f, "Classic"),
            Self::Enhanced => write!(f, "Enhanced"),
        }
    }
}

/// A LIN frame: identifier, checksum model, payload length and payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinFrame {
    pub id: LinId,
    pub checksum_model: LinChecksumModel,
    pub data_length: LinDataLength,
    pub data: [u8; 8],
}

impl Default for LinFrame {
    fn default() -> Self {
        Self {
            id: 0,
            checksum_model: LinChecksumModel::Unknown,
            data_length: DATA_LENGTH_UNKNOWN,
            data: [0; 8],
        }
    }
}

/// The fixed go-to-sleep sentinel frame, matched by id and exact payload
pub fn go_to_sleep_frame() -> LinFrame {
    LinFrame {
        id: GO_TO_SLEEP_ID,
        checksum_model: LinChecksumModel::Classic,
        data_length: 8,
        data: [0; 8],
    }
}

/// Role a response slot plays for one frame identifier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinFrameResponseMode {
    /// The slot is inactive
    #[default]
    Unused,
    /// The node expects to receive the payload
    Rx,
    /// The node publishes the payload when the matching header is dispatched
    TxUnconditional,
}

impl fmt::Display for LinFrameResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unused => write!(f, "Unused"),
            Self::Rx => write!(f, "Rx"),
            Self::TxUnconditional => write!(f, "TxUnconditional"),
        }
    }
}

/// A frame paired with the role the declaring node takes for it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinFrameResponse {
    pub frame: LinFrame,
    pub response_mode: LinFrameResponseMode,
}

/// Kind of response a master requests when sending a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinFrameResponseType {
    /// The master provides the response itself
    MasterResponse,
    /// Exactly one slave is expected to provide the response
    SlaveResponse,
    /// One slave publishes, another consumes; the master only observes
    SlaveToSlave,
}

/// Operating mode of a LIN controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinControllerMode {
    /// Not initialized; rejects transmissions
    #[default]
    Inactive,
    Master,
    Slave,
}

impl fmt::Display for LinControllerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inactive => write!(f, "Inactive"),
            Self::Master => write!(f, "Master"),
            Self::Slave => write!(f, "Slave"),
        }
    }
}

/// Lifecycle status of a LIN controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinControllerStatus {
    /// Not initialized yet
    #[default]
    Unknown,
    /// Awake and participating in transmissions
    Operational,
    /// In sleep mode after a go-to-sleep command
    Sleep,
    /// Sleep requested, awaiting confirmation by the network simulator
    SleepPending,
}

impl fmt::Display for LinControllerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Operational => write!(f, "Operational"),
            Self::Sleep => write!(f, "Sleep"),
            Self::SleepPending => write!(f, "SleepPending"),
        }
    }
}

/// Per-node simulation flavor carried in the controller configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SimulationMode {
    /// Responses are pre-declared in the response table
    #[default]
    Default,
    /// Responses are generated reactively per observed header
    Dynamic,
}

/// Outcome of a LIN transmission as seen by one controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinFrameStatus {
    /// Reserved; handlers are not invoked for this status
    NotOk,
    TxOk,
    TxBusy,
    TxHeaderError,
    TxError,
    RxOk,
    RxBusy,
    RxError,
    RxNoResponse,
}

impl LinFrameStatus {
    /// Convert an `Rx` status into the corresponding `Tx` status.
    ///
    /// Transmissions travel the wire with `Rx` statuses; the publishing node
    /// converts before delivering to its own handlers.
    pub fn to_tx_status(self) -> Self {
        match self {
            Self::RxOk => Self::TxOk,
            Self::RxBusy => Self::TxBusy,
            Self::RxError => Self::TxError,
            other => other,
        }
    }

    /// Direction a frame with this status is traced with
    pub fn tracing_direction(self) -> TransmitDirection {
        match self {
            Self::RxOk | Self::RxBusy | Self::RxError | Self::RxNoResponse => {
                TransmitDirection::Receive
            }
            _ => TransmitDirection::Send,
        }
    }
}

impl fmt::Display for LinFrameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotOk => write!(f, "NOT_OK"),
            Self::TxOk => write!(f, "TX_OK"),
            Self::TxBusy => write!(f, "TX_BUSY"),
            Self::TxHeaderError => write!(f, "TX_HEADER_ERROR"),
            Self::TxError => write!(f, "TX_ERROR"),
            Self::RxOk => write!(f, "RX_OK"),
            Self::RxBusy => write!(f, "RX_BUSY"),
            Self::RxError => write!(f, "RX_ERROR"),
            Self::RxNoResponse => write!(f, "RX_NO_RESPONSE"),
        }
    }
}

/// Configuration passed to [`crate::lin::LinController::init`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinControllerConfig {
    /// Master or Slave; Inactive is rejected
    pub mode: LinControllerMode,
    /// Baud rate in bit/s, informational
    pub baud_rate: u32,
    /// Responses this node declares up front
    pub frame_responses: Vec<LinFrameResponse>,
}

/// Configuration passed to [`crate::lin::LinController::init_dynamic`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinControllerDynamicConfig {
    /// Master or Slave; Inactive is rejected
    pub mode: LinControllerMode,
    /// Baud rate in bit/s, informational
    pub baud_rate: u32,
}

/// Delivered to frame-status handlers after a transmission completed
#[derive(Debug, Clone, PartialEq)]
pub struct LinFrameStatusEvent {
    pub timestamp: Duration,
    pub frame: LinFrame,
    pub status: LinFrameStatus,
}

/// Delivered to go-to-sleep handlers on slaves observing the sleep frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinGoToSleepEvent {
    pub timestamp: Duration,
}

/// Delivered to wakeup handlers when a wakeup pulse is observed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinWakeupEvent {
    pub timestamp: Duration,
    pub direction: TransmitDirection,
}

/// Delivered to header handlers of dynamic-response nodes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinFrameHeaderEvent {
    pub timestamp: Duration,
    pub id: LinId,
}

/// Delivered to slave-configuration handlers on the master
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinSlaveConfigurationEvent {
    pub timestamp: Duration,
}

/// The master-visible set of identifiers answered by slaves
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinSlaveConfiguration {
    pub responding_lin_ids: Vec<LinId>,
}

//! Trace and replay data model
//!
//! This module provides the shared vocabulary of the trace/replay pipeline:
//! - The trace-message variant set all bus controllers feed into sinks
//! - The [`ReplayFile`] / [`ReplayChannel`] / [`ReplayChannelReader`]
//!   abstractions a replay provider implements
//! - The [`ReplayDataController`] seam the scheduler drives
//! - The built-in PCAP provider and the per-step replay scheduler

pub mod pcap;
pub mod scheduler;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::lin::types::LinFrame;
use crate::participant::TransmitDirection;

pub use pcap::{PcapReader, PcapReplayFile};
pub use scheduler::ReplayScheduler;

/// Errors raised by trace-file readers
#[derive(Debug, Error)]
pub enum ReplayDataError {
    #[error("cannot open trace file '{path}': {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid PCAP magic number {found:#010x} in '{path}'")]
    InvalidMagic { path: String, found: u32 },

    #[error("unsupported PCAP version {major}.{minor} in '{path}'")]
    UnsupportedVersion { path: String, major: u16, minor: u16 },

    #[error("trace file '{path}' is truncated: short read at offset {offset}")]
    ShortRead { path: String, offset: u64 },

    #[error("trace source type is undefined")]
    UndefinedSourceType,
}

/// Discriminator of the trace-message variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMessageType {
    EthernetFrame,
    CanFrameEvent,
    LinFrame,
    FlexrayFrameEvent,
    DataMessageEvent,
}

impl fmt::Display for TraceMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EthernetFrame => write!(f, "EthernetFrame"),
            Self::CanFrameEvent => write!(f, "CanFrameEvent"),
            Self::LinFrame => write!(f, "LinFrame"),
            Self::FlexrayFrameEvent => write!(f, "FlexrayFrameEvent"),
            Self::DataMessageEvent => write!(f, "DataMessageEvent"),
        }
    }
}

/// A raw Ethernet frame as captured on the wire
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EthernetFrame {
    pub raw: Vec<u8>,
}

/// A CAN frame event, reduced to what replay needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanFrameEvent {
    pub can_id: u32,
    pub flags: u32,
    pub dlc: u8,
    pub data: Vec<u8>,
}

/// A FlexRay frame event, reduced to what replay needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlexrayFrameEvent {
    pub channel: u8,
    pub payload: Vec<u8>,
}

/// A publish/subscribe data message, reduced to what replay needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataMessageEvent {
    pub data: Vec<u8>,
}

/// Tagged union over all traceable bus messages
#[derive(Debug, Clone, PartialEq)]
pub enum TraceMessage {
    EthernetFrame(EthernetFrame),
    CanFrameEvent(CanFrameEvent),
    LinFrame(LinFrame),
    FlexrayFrameEvent(FlexrayFrameEvent),
    DataMessageEvent(DataMessageEvent),
}

impl TraceMessage {
    pub fn message_type(&self) -> TraceMessageType {
        match self {
            Self::EthernetFrame(_) => TraceMessageType::EthernetFrame,
            Self::CanFrameEvent(_) => TraceMessageType::CanFrameEvent,
            Self::LinFrame(_) => TraceMessageType::LinFrame,
            Self::FlexrayFrameEvent(_) => TraceMessageType::FlexrayFrameEvent,
            Self::DataMessageEvent(_) => TraceMessageType::DataMessageEvent,
        }
    }
}

/// One recorded message as produced by a replay channel reader
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayMessage {
    /// Timestamp relative to the start of the recording
    pub timestamp: Duration,
    /// Recorded direction of the message
    pub direction: TransmitDirection,
    /// The recorded payload
    pub message: TraceMessage,
}

impl ReplayMessage {
    pub fn message_type(&self) -> TraceMessageType {
        self.message.message_type()
    }
}

/// Format of an opened replay file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayFileType {
    Pcap,
    Mdf4,
}

/// A forward-only cursor over the messages of one replay channel.
///
/// `read` returns the current message without advancing. `seek(delta)`
/// advances by `delta` messages; `seek(0)` is idempotent. After a failed
/// seek the reader is exhausted and `read` returns `None`. Readers obtained
/// from the same channel do not share mutable state.
pub trait ReplayChannelReader: Send {
    fn read(&mut self) -> Option<ReplayMessage>;
    fn seek(&mut self, delta: usize) -> bool;
}

/// One recorded channel of a replay file
pub trait ReplayChannel: Send + Sync {
    /// Variant of the messages this channel carries
    fn message_type(&self) -> TraceMessageType;

    /// Channel name as recorded in the file
    fn name(&self) -> &str;

    /// Timestamp of the first message, if known
    fn start_time(&self) -> Option<Duration>;

    /// Timestamp of the last message, if known
    fn end_time(&self) -> Option<Duration>;

    /// Number of messages seen so far; only authoritative after a full scan
    fn message_count(&self) -> u64;

    /// Format-specific meta information of the channel
    fn meta_infos(&self) -> &BTreeMap<String, String>;

    /// Derive a fresh independent reader positioned at the first message
    fn reader(&self) -> Box<dyn ReplayChannelReader>;
}

/// An opened trace file exposing its recorded channels
pub trait ReplayFile: Send + Sync {
    /// Path the file was opened from
    fn file_path(&self) -> &Path;

    /// Configuration embedded in the recording, if any
    fn embedded_config(&self) -> Option<&str>;

    /// Format of the file
    fn file_type(&self) -> ReplayFileType;

    /// The recorded channels
    fn channels(&self) -> Vec<Arc<dyn ReplayChannel>>;
}

/// Sink for traced bus messages, fed by controllers on send and receive
pub trait TraceSink: Send {
    fn trace(&mut self, direction: TransmitDirection, timestamp: Duration, message: &TraceMessage);
}

/// A controller that can be driven from recorded traffic
pub trait ReplayDataController: Send {
    fn replay_message(&mut self, msg: &ReplayMessage);
}

//! silbus - distributed simulation bus middleware core
//!
//! This library provides the core building blocks of a virtual-ECU bus
//! simulation: a LIN controller state machine with a trivial/detailed
//! behavior switch, a replay pipeline (PCAP reader and per-step scheduler)
//! that can drive controllers from recorded traffic, and an ABI-verified
//! loader for dynamic extension libraries. The enclosing participant
//! (transport, configuration, time synchronization) is consumed through
//! small trait seams.

pub mod config;
pub mod error;
pub mod extension;
pub mod handlers;
pub mod lin;
pub mod participant;
pub mod replay;

// Re-export common types for convenience
pub use config::{MdfChannelSelector, ReplayConfig, ReplayDirection, TraceSource, TraceSourceType};
pub use error::{CoreError, CoreResult};
pub use extension::{ExtensionDescriptor, ExtensionError, ExtensionLoader, LoadedExtension};
pub use handlers::HandlerId;
pub use lin::{LinController, LinControllerConfig, LinControllerMode, LinControllerStatus};
pub use participant::{
    EndpointAddress, MessageTransport, ServiceDescriptor, ServiceType, TimeProvider,
    TransmitDirection,
};
pub use replay::{
    PcapReader, PcapReplayFile, ReplayChannel, ReplayChannelReader, ReplayDataController,
    ReplayDataError, ReplayFile, ReplayMessage, ReplayScheduler, TraceMessage, TraceMessageType,
    TraceSink,
};

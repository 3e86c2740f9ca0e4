//! Replay and trace-source configuration surface
//!
//! These types mirror what the participant configuration file declares for a
//! controller. Parsing and unknown-field rejection happen in the enclosing
//! participant; the core only consumes the result.

use std::fmt;

use bitflags::bitflags;

use crate::participant::TransmitDirection;

bitflags! {
    /// Replay direction selection for one controller.
    ///
    /// An empty set means replay is not configured (`Undefined`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ReplayDirection: u8 {
        const SEND = 0b01;
        const RECEIVE = 0b10;
        const BOTH = Self::SEND.bits() | Self::RECEIVE.bits();
    }
}

impl ReplayDirection {
    /// Whether replay covers the given transmit direction
    pub fn enables(&self, direction: TransmitDirection) -> bool {
        match direction {
            TransmitDirection::Send => self.contains(Self::SEND),
            TransmitDirection::Receive => self.contains(Self::RECEIVE),
        }
    }
}

/// Selector identifying an MDF4 channel by its meta information.
///
/// All fields are optional; a selector with at least one field set must
/// match exactly one channel of the trace file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MdfChannelSelector {
    pub channel_name: Option<String>,
    pub channel_source: Option<String>,
    pub channel_path: Option<String>,
    pub group_name: Option<String>,
    pub group_source: Option<String>,
    pub group_path: Option<String>,
}

impl MdfChannelSelector {
    /// True if at least one field was set by the user
    pub fn has_selection(&self) -> bool {
        self.channel_name.is_some()
            || self.channel_source.is_some()
            || self.channel_path.is_some()
            || self.group_name.is_some()
            || self.group_source.is_some()
            || self.group_path.is_some()
    }
}

impl fmt::Display for MdfChannelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MdfChannel{{")?;
        let mut print_field = |name: &str, field: &Option<String>| -> fmt::Result {
            if let Some(value) = field {
                write!(f, "{}: \"{}\", ", name, value)?;
            }
            Ok(())
        };
        print_field("ChannelName", &self.channel_name)?;
        print_field("ChannelSource", &self.channel_source)?;
        print_field("ChannelPath", &self.channel_path)?;
        print_field("GroupName", &self.group_name)?;
        print_field("GroupSource", &self.group_source)?;
        print_field("GroupPath", &self.group_path)?;
        write!(f, "}}")
    }
}

/// Replay declaration of one controller
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayConfig {
    /// Name of the trace source to replay from
    pub use_trace_source: String,
    /// Directions to replay; empty disables replay
    pub direction: ReplayDirection,
    /// Optional MDF channel selection overriding the built-in lookup
    pub mdf_channel: MdfChannelSelector,
}

impl ReplayConfig {
    /// A replay is active when a direction is selected and a source is named
    pub fn is_active(&self) -> bool {
        !self.direction.is_empty() && !self.use_trace_source.is_empty()
    }
}

/// Format of a configured trace source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceSourceType {
    PcapFile,
    Mdf4File,
}

/// A trace source declared in the participant configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TraceSource {
    /// Name the replay configs refer to
    pub name: String,
    /// File format of the source
    pub source_type: TraceSourceType,
    /// Path to the trace file
    pub input_path: String,
}

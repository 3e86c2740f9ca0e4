//! PCAP replay provider
//!
//! Reads classic PCAP capture files (little-endian magic `0xA1B23C4D`,
//! version 2.4) and exposes them as a single replay channel of Ethernet
//! frames. The reader is lazy: packets are decoded one at a time while
//! seeking, and the current packet is cached for `read`.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use byteorder::{LittleEndian, ReadBytesExt};
use log::{error, warn};

use super::{
    EthernetFrame, ReplayChannel, ReplayChannelReader, ReplayDataError, ReplayFile, ReplayFileType,
    ReplayMessage, TraceMessage, TraceMessageType,
};
use crate::participant::TransmitDirection;

/// Magic number of a little-endian nanosecond-less classic PCAP file
pub const NATIVE_MAGIC: u32 = 0xA1B2_3C4D;
pub const GLOBAL_HEADER_SIZE: usize = 24;
pub const PACKET_HEADER_SIZE: usize = 16;
pub const MAJOR_VERSION: u16 = 2;
pub const MINOR_VERSION: u16 = 4;

/// PCAP global header, 24 bytes on disk
#[derive(Debug, Clone, Copy)]
pub struct GlobalHeader {
    pub magic_number: u32,
    pub version_major: u16,
    pub version_minor: u16,
    /// GMT to local correction
    pub thiszone: i32,
    /// Accuracy of timestamps
    pub sigfigs: u32,
    /// Max length of captured packets, in octets
    pub snaplen: u32,
    /// Data link type
    pub network: u32,
}

impl GlobalHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < GLOBAL_HEADER_SIZE {
            return None;
        }
        let mut cursor = Cursor::new(data);
        Some(Self {
            magic_number: cursor.read_u32::<LittleEndian>().ok()?,
            version_major: cursor.read_u16::<LittleEndian>().ok()?,
            version_minor: cursor.read_u16::<LittleEndian>().ok()?,
            thiszone: cursor.read_i32::<LittleEndian>().ok()?,
            sigfigs: cursor.read_u32::<LittleEndian>().ok()?,
            snaplen: cursor.read_u32::<LittleEndian>().ok()?,
            network: cursor.read_u32::<LittleEndian>().ok()?,
        })
    }
}

/// PCAP per-packet header, 16 bytes on disk
#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    pub ts_sec: u32,
    pub ts_usec: u32,
    /// Number of octets of the packet saved in the file
    pub incl_len: u32,
    /// Actual length of the packet on the wire
    pub orig_len: u32,
}

impl PacketHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < PACKET_HEADER_SIZE {
            return None;
        }
        let mut cursor = Cursor::new(data);
        Some(Self {
            ts_sec: cursor.read_u32::<LittleEndian>().ok()?,
            ts_usec: cursor.read_u32::<LittleEndian>().ok()?,
            incl_len: cursor.read_u32::<LittleEndian>().ok()?,
            orig_len: cursor.read_u32::<LittleEndian>().ok()?,
        })
    }

    pub fn timestamp(&self) -> Duration {
        Duration::from_nanos(u64::from(self.ts_sec) * 1_000_000_000 + u64::from(self.ts_usec) * 1_000)
    }
}

/// Lazy PCAP packet reader over any byte stream.
///
/// Construction validates the global header and primes the first packet, so
/// `read` is already non-empty when `seek(0)` is called afterwards.
pub struct PcapReader<R: Read> {
    stream: R,
    origin: String,
    meta_infos: BTreeMap<String, String>,
    current: Option<ReplayMessage>,
    start_time: Option<Duration>,
    end_time: Option<Duration>,
    num_messages: u64,
    /// Bytes consumed from the stream, used in truncation warnings
    offset: u64,
    exhausted: bool,
    high_water: Arc<AtomicU64>,
}

impl<R: Read> fmt::Debug for PcapReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcapReader")
            .field("origin", &self.origin)
            .field("num_messages", &self.num_messages)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

impl<R: Read> PcapReader<R> {
    /// Open a PCAP stream, validate the global header and prime the first
    /// packet. `origin` names the stream in diagnostics.
    pub fn new(stream: R, origin: &str) -> Result<Self, ReplayDataError> {
        Self::with_counter(stream, origin, Arc::new(AtomicU64::new(0)))
    }

    fn with_counter(
        stream: R,
        origin: &str,
        high_water: Arc<AtomicU64>,
    ) -> Result<Self, ReplayDataError> {
        let mut reader = Self {
            stream,
            origin: origin.to_string(),
            meta_infos: BTreeMap::new(),
            current: None,
            start_time: None,
            end_time: None,
            num_messages: 0,
            offset: 0,
            exhausted: false,
            high_water,
        };
        reader.read_global_header()?;
        reader.seek(1);
        Ok(reader)
    }

    fn read_global_header(&mut self) -> Result<(), ReplayDataError> {
        let mut buf = [0u8; GLOBAL_HEADER_SIZE];
        self.stream
            .read_exact(&mut buf)
            .map_err(|_| ReplayDataError::ShortRead {
                path: self.origin.clone(),
                offset: 0,
            })?;
        self.offset = GLOBAL_HEADER_SIZE as u64;

        let header = GlobalHeader::parse(&buf).ok_or(ReplayDataError::ShortRead {
            path: self.origin.clone(),
            offset: 0,
        })?;
        if header.magic_number != NATIVE_MAGIC {
            return Err(ReplayDataError::InvalidMagic {
                path: self.origin.clone(),
                found: header.magic_number,
            });
        }
        if header.version_major != MAJOR_VERSION || header.version_minor != MINOR_VERSION {
            return Err(ReplayDataError::UnsupportedVersion {
                path: self.origin.clone(),
                major: header.version_major,
                minor: header.version_minor,
            });
        }

        self.meta_infos.insert(
            "pcap/version".to_string(),
            format!("{}.{}", header.version_major, header.version_minor),
        );
        self.meta_infos
            .insert("pcap/gmt_to_local".to_string(), header.thiszone.to_string());
        Ok(())
    }

    /// Decode one packet and cache it as the current message
    fn advance(&mut self) -> bool {
        let mut header_buf = [0u8; PACKET_HEADER_SIZE];
        if self.stream.read_exact(&mut header_buf).is_err() {
            warn!(
                "PCAP stream '{}': short read on packet header at offset {}",
                self.origin, self.offset
            );
            return false;
        }
        self.offset += PACKET_HEADER_SIZE as u64;

        // Header size was checked, parse cannot fail
        let header = match PacketHeader::parse(&header_buf) {
            Some(header) => header,
            None => return false,
        };

        let mut payload = vec![0u8; header.incl_len as usize];
        if self.stream.read_exact(&mut payload).is_err() {
            warn!(
                "PCAP stream '{}': cannot read packet payload at offset {}",
                self.origin, self.offset
            );
            return false;
        }
        self.offset += u64::from(header.incl_len);

        let timestamp = header.timestamp();
        if self.start_time.is_none() {
            self.start_time = Some(timestamp);
        }
        self.end_time = Some(timestamp);
        self.num_messages += 1;
        self.high_water.fetch_max(self.num_messages, Ordering::Relaxed);

        self.current = Some(ReplayMessage {
            timestamp,
            // PCAP knows nothing about bus direction; downstream may reinterpret
            direction: TransmitDirection::Send,
            message: TraceMessage::EthernetFrame(EthernetFrame { raw: payload }),
        });
        true
    }

    pub fn meta_infos(&self) -> &BTreeMap<String, String> {
        &self.meta_infos
    }

    pub fn start_time(&self) -> Option<Duration> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<Duration> {
        self.end_time
    }

    /// Number of messages decoded so far by this reader
    pub fn message_count(&self) -> u64 {
        self.num_messages
    }
}

impl<R: Read> PcapReader<R> {
    /// Current message, if any
    pub fn read(&mut self) -> Option<ReplayMessage> {
        self.current.clone()
    }

    /// Advance by `delta` packets relative to the current position.
    ///
    /// Returns false on truncation; the reader is then exhausted and `read`
    /// yields `None`.
    pub fn seek(&mut self, delta: usize) -> bool {
        if self.exhausted {
            return false;
        }
        for _ in 0..delta {
            if !self.advance() {
                self.exhausted = true;
                self.current = None;
                return false;
            }
        }
        true
    }
}

impl<R: Read + Send> ReplayChannelReader for PcapReader<R> {
    fn read(&mut self) -> Option<ReplayMessage> {
        PcapReader::read(self)
    }

    fn seek(&mut self, delta: usize) -> bool {
        PcapReader::seek(self, delta)
    }
}

/// A reader whose stream could not be reopened; always exhausted
struct UnavailableReader;

impl ReplayChannelReader for UnavailableReader {
    fn read(&mut self) -> Option<ReplayMessage> {
        None
    }

    fn seek(&mut self, _delta: usize) -> bool {
        false
    }
}

/// The single channel a PCAP file exposes
struct PcapChannel {
    file_path: PathBuf,
    name: String,
    meta_infos: BTreeMap<String, String>,
    start_time: Option<Duration>,
    high_water: Arc<AtomicU64>,
}

impl ReplayChannel for PcapChannel {
    fn message_type(&self) -> TraceMessageType {
        // This provider only supports Ethernet captures
        TraceMessageType::EthernetFrame
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn start_time(&self) -> Option<Duration> {
        self.start_time
    }

    fn end_time(&self) -> Option<Duration> {
        // Only known after a full scan, which we avoid for performance
        None
    }

    fn message_count(&self) -> u64 {
        self.high_water.load(Ordering::Relaxed)
    }

    fn meta_infos(&self) -> &BTreeMap<String, String> {
        &self.meta_infos
    }

    fn reader(&self) -> Box<dyn ReplayChannelReader> {
        let file = match File::open(&self.file_path) {
            Ok(file) => file,
            Err(err) => {
                error!(
                    "Cannot reopen PCAP file '{}': {}",
                    self.file_path.display(),
                    err
                );
                return Box::new(UnavailableReader);
            }
        };
        let origin = self.file_path.display().to_string();
        match PcapReader::with_counter(BufReader::new(file), &origin, Arc::clone(&self.high_water)) {
            Ok(reader) => Box::new(reader),
            Err(err) => {
                error!("Cannot reopen PCAP file '{}': {}", origin, err);
                Box::new(UnavailableReader)
            }
        }
    }
}

/// An opened PCAP trace file
pub struct PcapReplayFile {
    file_path: PathBuf,
    channel: Arc<dyn ReplayChannel>,
}

impl PcapReplayFile {
    /// Open and validate a PCAP file. The file is scanned up to the first
    /// packet; format errors fail construction.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ReplayDataError> {
        let path = path.as_ref();
        let origin = path.display().to_string();
        let file = File::open(path).map_err(|err| ReplayDataError::OpenFailed {
            path: origin.clone(),
            source: err,
        })?;

        let high_water = Arc::new(AtomicU64::new(0));
        let reader =
            PcapReader::with_counter(BufReader::new(file), &origin, Arc::clone(&high_water))?;

        let channel = PcapChannel {
            file_path: path.to_path_buf(),
            // PCAP has no concept of sub-channel
            name: "PcapChannel0".to_string(),
            meta_infos: reader.meta_infos().clone(),
            start_time: reader.start_time(),
            high_water,
        };
        Ok(Self {
            file_path: path.to_path_buf(),
            channel: Arc::new(channel),
        })
    }
}

impl ReplayFile for PcapReplayFile {
    fn file_path(&self) -> &Path {
        &self.file_path
    }

    fn embedded_config(&self) -> Option<&str> {
        None
    }

    fn file_type(&self) -> ReplayFileType {
        ReplayFileType::Pcap
    }

    fn channels(&self) -> Vec<Arc<dyn ReplayChannel>> {
        vec![Arc::clone(&self.channel)]
    }
}

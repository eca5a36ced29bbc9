//! Frame encoder adapter and codec backends
//!
//! The adapter owns a dedicated completion thread. Frames go in through a
//! bounded queue on the acquisition thread and come out, in submission order,
//! as [`EncodedSample`]s handed to a callback on the completion thread.

pub mod adapter;
#[cfg(feature = "gstreamer-encoder")]
pub mod gst;
pub mod passthrough;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use adapter::FrameEncoder;
#[cfg(feature = "gstreamer-encoder")]
pub use gst::GstH26xCodec;
pub use passthrough::PassthroughCodec;

/// Size of the opaque per-frame metadata blob.
pub const USER_PAYLOAD_BYTES: usize = 64;

/// Opaque metadata carried alongside a frame through the encoder.
///
/// The encoder never looks inside; it returns the blob with the sample that
/// was produced from the frame it was submitted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserPayload(pub [u8; USER_PAYLOAD_BYTES]);

impl UserPayload {
    pub fn as_bytes(&self) -> &[u8; USER_PAYLOAD_BYTES] {
        &self.0
    }
}

/// NV12 image queued for encoding
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Monotonic submission index assigned by the adapter
    pub index: u64,
    pub sample_time: i64,
    pub duration: i64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// One unit of codec output, tagged with the index of the frame it encodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecOutput {
    pub index: u64,
    pub data: Bytes,
}

/// Encoded unit ready for transmission
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedSample {
    /// Presentation time reported by the encoder
    pub sample_time: i64,
    pub duration: i64,
    pub payload: Bytes,
    pub metadata: Option<UserPayload>,
}

/// Stateful compressor driven from the completion thread.
///
/// Implementations must emit outputs in input order. They may hold frames
/// back internally; `drain` returns what can be released while the stream
/// stays open.
pub trait SampleCodec: Send + 'static {
    fn encode(&mut self, frame: RawFrame) -> Result<Vec<CodecOutput>, CodecError>;

    fn drain(&mut self) -> Result<Vec<CodecOutput>, CodecError>;

    /// Signal end of stream and return every remaining output.
    ///
    /// Called once, after the last frame. Codecs that only release their
    /// lookahead at end of stream must override this.
    fn finish(&mut self) -> Result<Vec<CodecOutput>, CodecError> {
        self.drain()
    }
}

impl<C: SampleCodec + ?Sized> SampleCodec for Box<C> {
    fn encode(&mut self, frame: RawFrame) -> Result<Vec<CodecOutput>, CodecError> {
        (**self).encode(frame)
    }

    fn drain(&mut self) -> Result<Vec<CodecOutput>, CodecError> {
        (**self).drain()
    }

    fn finish(&mut self) -> Result<Vec<CodecOutput>, CodecError> {
        (**self).finish()
    }
}

/// H.26x profile requested by the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum H26xProfile {
    H264Base,
    H264Main,
    H264High,
    H265Main,
}

impl H26xProfile {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::H264Base),
            1 => Some(Self::H264Main),
            2 => Some(Self::H264High),
            3 => Some(Self::H265Main),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Self::H264Base => 0,
            Self::H264Main => 1,
            Self::H264High => 2,
            Self::H265Main => 3,
        }
    }

    pub fn is_hevc(self) -> bool {
        matches!(self, Self::H265Main)
    }
}

/// Negotiated stream format, fixed for the lifetime of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub profile: H26xProfile,
    /// Target bitrate in bits per second
    pub bitrate: u32,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("codec invalid input: {0}")]
    InvalidInput(String),
    #[error("codec unsupported: {0}")]
    Unsupported(String),
    #[error("codec internal error: {0}")]
    Internal(String),
}

/// Failures reported to the submitting thread.
#[derive(Error, Debug)]
pub enum EncoderError {
    /// Input queue stayed full past the submit timeout
    #[error("encoder queue full")]
    QueueFull,

    /// Completion thread is gone
    #[error("encoder closed")]
    Closed,

    /// A codec error on the completion thread poisoned the encoder
    #[error("encoder faulted")]
    Faulted,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("failed to spawn completion thread: {0}")]
    Spawn(#[from] std::io::Error),
}

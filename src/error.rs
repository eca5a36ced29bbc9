//! Error types shared across the streaming pipeline

use thiserror::Error;

use crate::capture::AcquireError;
use crate::encoder::EncoderError;
use crate::pipeline::NegotiationError;
use crate::transport::TransportError;

/// Errors that prevent a session from starting or abort it outright.
///
/// Runtime faults inside a running stream (failed sends, encoder rejection)
/// do not surface here; they end the stream through the cancellation latch and
/// are reported in the session summary instead.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Peer sent a format request we cannot parse or serve
    #[error("Negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    /// Consent for the sensor was refused
    #[error("Consent denied for {0:?}")]
    ConsentDenied(crate::consent::SensorKind),

    /// Frame source could not be opened
    #[error("Frame source error: {0}")]
    Source(#[from] AcquireError),

    /// Encoder could not be constructed
    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    /// Calibration transfer or mode byte exchange failed on the socket
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Calibration could not be computed for the sensor
    #[error("Calibration error: {0}")]
    Calibration(String),

    /// Client asked for a stream mode we do not know
    #[error("Unknown stream mode: {0}")]
    UnknownMode(u8),

    /// A streaming entry point was given a non-streaming mode
    #[error("Mode {0:?} does not stream frames")]
    NotStreaming(crate::pipeline::StreamMode),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StreamError>;

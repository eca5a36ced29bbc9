pub mod socket;
pub mod wire;

use thiserror::Error;

use crate::encoder::EncodedSample;

pub use socket::SocketTransmitter;
pub use wire::{encoded_len, write_vectored_all, FrameLayout};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload of {0} bytes does not fit the length field")]
    PayloadTooLarge(usize),
}

/// Consumer of encoded samples, called from the encoder completion thread.
///
/// A failed send is final: callers stop the stream rather than retry.
pub trait SampleSink: Send {
    fn send(&mut self, sample: &EncodedSample) -> Result<(), TransportError>;
}

impl<S: SampleSink + ?Sized> SampleSink for Box<S> {
    fn send(&mut self, sample: &EncodedSample) -> Result<(), TransportError> {
        (**self).send(sample)
    }
}

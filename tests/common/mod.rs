//! Shared fixtures for pipeline integration tests

#![allow(dead_code)]

use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use hermes::capture::{AcquireError, Frame, FrameSource, PixelFormat};
use hermes::encoder::{
    CodecError, CodecOutput, EncodedSample, H26xProfile, PassthroughCodec, RawFrame, SampleCodec,
};
use hermes::pipeline::FormatDescriptor;
use hermes::transport::{SampleSink, TransportError};
use hermes::{EncoderConfig, SensorConfig};

pub const WIDTH: u32 = 32;
pub const HEIGHT: u32 = 24;
pub const FPS: u32 = 30;
pub const TICK_HZ: u64 = 10_000_000;

pub fn sensor(width: u32, height: u32) -> SensorConfig {
    SensorConfig {
        width,
        height,
        fps: FPS,
        tick_frequency: TICK_HZ,
        ..SensorConfig::default()
    }
}

pub fn encoder_config() -> EncoderConfig {
    EncoderConfig {
        queue_depth: 4,
        submit_timeout_ms: 2_000,
        ..EncoderConfig::default()
    }
}

/// Valid format request as a peer would send it
pub fn descriptor() -> Vec<u8> {
    FormatDescriptor {
        profile: H26xProfile::H264Main,
        bitrate: 2_000_000,
    }
    .to_bytes()
    .to_vec()
}

/// Frame source that plays a fixed script of attempts, then ends.
pub struct ScriptedSource {
    width: u32,
    height: u32,
    attempts: usize,
    transient_at: Vec<usize>,
    fatal_at: Option<usize>,
    attempt: usize,
    pub opened: bool,
    pub closed: bool,
}

impl ScriptedSource {
    pub fn new(width: u32, height: u32, attempts: usize) -> Self {
        Self {
            width,
            height,
            attempts,
            transient_at: Vec::new(),
            fatal_at: None,
            attempt: 0,
            opened: false,
            closed: false,
        }
    }

    /// Fail the given 1-based attempts with a transient error
    pub fn transient_at(mut self, attempts: &[usize]) -> Self {
        self.transient_at = attempts.to_vec();
        self
    }

    pub fn fatal_at(mut self, attempt: usize) -> Self {
        self.fatal_at = Some(attempt);
        self
    }

    /// Host ticks of the 1-based attempt `n`
    pub fn ticks(n: usize) -> u64 {
        n as u64 * TICK_HZ / u64::from(FPS)
    }
}

impl FrameSource for ScriptedSource {
    fn open(&mut self) -> Result<(), AcquireError> {
        self.opened = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, AcquireError> {
        if self.attempt >= self.attempts {
            return Err(AcquireError::EndOfStream);
        }
        self.attempt += 1;
        let n = self.attempt;

        if self.fatal_at == Some(n) {
            return Err(AcquireError::Fatal("sensor unplugged".into()));
        }
        if self.transient_at.contains(&n) {
            return Err(AcquireError::Transient("missed frame".into()));
        }

        Ok(Frame {
            host_ticks: Self::ticks(n),
            width: self.width,
            height: self.height,
            format: PixelFormat::Gray8,
            data: Bytes::from(vec![n as u8; (self.width * self.height) as usize]),
        })
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Records every send; optionally fails the n-th call (1-based).
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub sent: Arc<Mutex<Vec<EncodedSample>>>,
    pub calls: Arc<AtomicUsize>,
    fail_on: Option<usize>,
}

impl RecordingSink {
    pub fn failing_on(call: usize) -> Self {
        Self {
            fail_on: Some(call),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sample_times(&self) -> Vec<i64> {
        self.sent.lock().unwrap().iter().map(|s| s.sample_time).collect()
    }
}

impl SampleSink for RecordingSink {
    fn send(&mut self, sample: &EncodedSample) -> Result<(), TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on == Some(call) {
            return Err(TransportError::Io(io::Error::from(io::ErrorKind::BrokenPipe)));
        }
        self.sent.lock().unwrap().push(sample.clone());
        Ok(())
    }
}

/// Writer whose bytes stay inspectable after it moves to another thread
#[derive(Clone, Default)]
pub struct SharedBuffer(pub Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Passthrough codec that counts drain requests
pub struct DrainCounting {
    inner: PassthroughCodec,
    pub drains: Arc<AtomicUsize>,
}

impl DrainCounting {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let drains = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner: PassthroughCodec,
                drains: Arc::clone(&drains),
            },
            drains,
        )
    }
}

impl SampleCodec for DrainCounting {
    fn encode(&mut self, frame: RawFrame) -> Result<Vec<CodecOutput>, CodecError> {
        self.inner.encode(frame)
    }

    fn drain(&mut self) -> Result<Vec<CodecOutput>, CodecError> {
        self.drains.fetch_add(1, Ordering::SeqCst);
        self.inner.drain()
    }
}

/// Codec that fails on every frame
pub struct BrokenCodec;

impl SampleCodec for BrokenCodec {
    fn encode(&mut self, _frame: RawFrame) -> Result<Vec<CodecOutput>, CodecError> {
        Err(CodecError::Internal("encoder hardware lost".into()))
    }

    fn drain(&mut self) -> Result<Vec<CodecOutput>, CodecError> {
        Ok(Vec::new())
    }
}

/// Split a posed or raw byte stream back into (sample_time, payload, pose bytes)
pub fn parse_samples(mut bytes: &[u8], posed: bool) -> Vec<(i64, Vec<u8>, Option<Vec<u8>>)> {
    let mut out = Vec::new();
    while !bytes.is_empty() {
        let time = i64::from_le_bytes(bytes[..8].try_into().unwrap());
        let len = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
        let payload = bytes[12..12 + len].to_vec();
        bytes = &bytes[12 + len..];
        let pose = if posed {
            let pose = bytes[..64].to_vec();
            bytes = &bytes[64..];
            Some(pose)
        } else {
            None
        };
        out.push((time, payload, pose));
    }
    out
}

//! Acquire -> encode -> transmit loop and its shutdown protocol

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use tracing::{debug, error, info, instrument, warn};

use crate::capture::frame::gray_to_nv12;
use crate::capture::{AcquireError, Frame, FrameSource};
use crate::encoder::{
    CodecError, EncodedSample, EncoderError, FrameEncoder, SampleCodec, UserPayload, VideoFormat,
};
use crate::error::{Result, StreamError};
use crate::pipeline::calibration::SensorCalibration;
use crate::pipeline::latch::CancellationLatch;
use crate::pipeline::mode::{SessionState, SessionTracker, StreamMode};
use crate::pipeline::negotiation::negotiate;
use crate::pose::{HostClock, PoseMatrix, PoseSource, HNS_BASE};
use crate::transport::SampleSink;
use crate::{EncoderConfig, SensorConfig};

/// One client connection's streaming lifetime
pub struct StreamSession<R, T> {
    /// Inbound half, read once for the format request
    pub reader: R,
    /// Outbound transmitter, moved onto the encoder completion thread
    pub sink: T,
    pub latch: CancellationLatch,
    pub mode: StreamMode,
}

impl<R, T> StreamSession<R, T> {
    pub fn new(reader: R, sink: T, mode: StreamMode) -> Self {
        Self {
            reader,
            sink,
            latch: CancellationLatch::new(),
            mode,
        }
    }
}

/// Why the frame loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The latch was observed set after a submission
    Cancelled,
    /// The frame source reported an unrecoverable fault
    SourceFailed,
    /// The frame source ran out of frames
    SourceExhausted,
    /// The encoder rejected a frame
    EncoderFault,
    /// Calibration tables were sent
    CalibrationSent,
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub mode: StreamMode,
    pub format: Option<VideoFormat>,
    pub frames_submitted: u64,
    pub frames_skipped: u64,
    pub samples_sent: u64,
    pub samples_dropped: u64,
    pub cancelled: bool,
    pub exit: ExitReason,
    pub path: Vec<SessionState>,
}

#[derive(Default)]
struct Counters {
    frames_submitted: CachePadded<AtomicU64>,
    frames_skipped: CachePadded<AtomicU64>,
    samples_sent: CachePadded<AtomicU64>,
    samples_dropped: CachePadded<AtomicU64>,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Drives a frame source through an encoder to a sample sink.
pub struct PipelineController {
    sensor: SensorConfig,
    encoder: EncoderConfig,
    clock: HostClock,
}

impl PipelineController {
    pub fn new(sensor: SensorConfig, encoder: EncoderConfig) -> Self {
        let clock = HostClock::new(sensor.tick_frequency, sensor.tracking_offset);
        Self {
            sensor,
            encoder,
            clock,
        }
    }

    /// Run one streaming session to completion.
    ///
    /// Nothing is read from the frame source until the peer's format request
    /// has been accepted. On exit the source is closed and the encoder is
    /// flushed before its completion thread is released, whichever side
    /// stopped the stream.
    #[instrument(skip_all, fields(mode = ?session.mode))]
    pub fn run<S, C, F, R, T>(
        &self,
        session: StreamSession<R, T>,
        source: &mut S,
        build_codec: F,
        pose: Option<&dyn PoseSource>,
    ) -> Result<SessionSummary>
    where
        S: FrameSource + ?Sized,
        C: SampleCodec,
        F: FnOnce(&VideoFormat) -> std::result::Result<C, CodecError>,
        R: Read,
        T: SampleSink + 'static,
    {
        let StreamSession {
            mut reader,
            sink,
            latch,
            mode,
        } = session;
        if mode == StreamMode::Calibration {
            return Err(StreamError::NotStreaming(mode));
        }

        let mut tracker = SessionTracker::new();
        tracker.enter(SessionState::Negotiating);
        let format = match negotiate(&mut reader, &self.sensor) {
            Ok(format) => format,
            Err(e) => {
                warn!("Rejecting session: {}", e);
                tracker.enter(SessionState::Closed);
                return Err(e.into());
            }
        };

        let codec = build_codec(&format).map_err(EncoderError::from)?;
        let counters = Arc::new(Counters::default());
        let mut encoder = FrameEncoder::spawn(
            codec,
            &self.encoder,
            transmit(sink, latch.clone(), Arc::clone(&counters)),
        )?;

        source.open()?;
        tracker.enter(SessionState::Streaming);
        info!("Streaming {:?} at {}x{}", mode, format.width, format.height);

        let exit = self.stream(source, &mut encoder, &format, mode, pose, &latch, &counters);

        tracker.enter(SessionState::Draining);
        source.close();
        if let Err(e) = encoder.shutdown() {
            warn!("Encoder flush failed: {}", e);
        }
        tracker.enter(SessionState::Closed);

        let summary = SessionSummary {
            mode,
            format: Some(format),
            frames_submitted: counters.frames_submitted.load(Ordering::Relaxed),
            frames_skipped: counters.frames_skipped.load(Ordering::Relaxed),
            samples_sent: counters.samples_sent.load(Ordering::Relaxed),
            samples_dropped: counters.samples_dropped.load(Ordering::Relaxed),
            cancelled: latch.is_set(),
            exit,
            path: tracker.into_path(),
        };
        info!(
            "Session closed ({:?}): {} submitted, {} skipped, {} sent",
            summary.exit, summary.frames_submitted, summary.frames_skipped, summary.samples_sent
        );
        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    fn stream<S: FrameSource + ?Sized>(
        &self,
        source: &mut S,
        encoder: &mut FrameEncoder,
        format: &VideoFormat,
        mode: StreamMode,
        pose: Option<&dyn PoseSource>,
        latch: &CancellationLatch,
        counters: &Counters,
    ) -> ExitReason {
        let duration = HNS_BASE / i64::from(format.framerate.max(1));

        loop {
            match source.next_frame() {
                Ok(frame) => match self.submit(frame, encoder, format, mode, pose, duration) {
                    Ok(true) => {
                        Counters::bump(&counters.frames_submitted);
                        metrics::counter!("hermes_frames_submitted").increment(1);
                    }
                    Ok(false) => {
                        Counters::bump(&counters.frames_skipped);
                        metrics::counter!("hermes_frames_skipped").increment(1);
                    }
                    Err(e) => {
                        error!("Encoder rejected frame: {}", e);
                        latch.set();
                        return ExitReason::EncoderFault;
                    }
                },
                Err(AcquireError::Transient(reason)) => {
                    debug!("Skipping frame: {}", reason);
                    Counters::bump(&counters.frames_skipped);
                    metrics::counter!("hermes_frames_skipped").increment(1);
                }
                Err(AcquireError::EndOfStream) => {
                    info!("Frame source exhausted");
                    return ExitReason::SourceExhausted;
                }
                Err(AcquireError::Fatal(reason)) => {
                    error!("Frame source failed: {}", reason);
                    latch.set();
                    return ExitReason::SourceFailed;
                }
            }

            if latch.is_set() {
                info!("Cancellation observed, draining");
                return ExitReason::Cancelled;
            }
        }
    }

    /// Returns `Ok(false)` when the frame is unusable and was skipped.
    fn submit(
        &self,
        frame: Frame,
        encoder: &mut FrameEncoder,
        format: &VideoFormat,
        mode: StreamMode,
        pose: Option<&dyn PoseSource>,
        duration: i64,
    ) -> std::result::Result<bool, EncoderError> {
        if frame.width != format.width || frame.height != format.height {
            warn!(
                "Frame is {}x{}, stream is {}x{}",
                frame.width, frame.height, format.width, format.height
            );
            return Ok(false);
        }
        let Some(image) = gray_to_nv12(&frame) else {
            warn!("Short frame: {} bytes", frame.len());
            return Ok(false);
        };

        let metadata = mode.with_pose().then(|| {
            let at = self.clock.to_tracking(frame.host_ticks);
            let pose = pose
                .and_then(|source| source.locate(at))
                .unwrap_or(PoseMatrix::IDENTITY);
            UserPayload(pose.to_le_bytes())
        });

        let sample_time = i64::try_from(frame.host_ticks).unwrap_or(i64::MAX);
        encoder.submit(
            image,
            frame.width,
            frame.height,
            duration,
            sample_time,
            metadata,
        )?;
        Ok(true)
    }
}

/// Completion-thread callback: send each sample until the first failure.
fn transmit<T: SampleSink + 'static>(
    mut sink: T,
    latch: CancellationLatch,
    counters: Arc<Counters>,
) -> impl FnMut(EncodedSample) + Send + 'static {
    move |sample| {
        if latch.is_set() {
            Counters::bump(&counters.samples_dropped);
            return;
        }
        match sink.send(&sample) {
            Ok(()) => {
                Counters::bump(&counters.samples_sent);
                metrics::counter!("hermes_samples_sent").increment(1);
            }
            Err(e) => {
                warn!("Send failed, stopping stream: {}", e);
                metrics::counter!("hermes_send_failures").increment(1);
                latch.set();
            }
        }
    }
}

/// Send the calibration tables and end the session.
#[instrument(skip_all)]
pub fn transfer_calibration<W: Write + ?Sized>(
    writer: &mut W,
    calibration: &SensorCalibration,
) -> Result<SessionSummary> {
    let mut tracker = SessionTracker::new();
    tracker.enter(SessionState::TransferCalibration);
    let sent = calibration.write_to(writer);
    tracker.enter(SessionState::Closed);
    sent?;

    info!(
        "Calibration sent: {} bytes",
        SensorCalibration::wire_len(calibration.pixel_count())
    );
    Ok(SessionSummary {
        mode: StreamMode::Calibration,
        format: None,
        frames_submitted: 0,
        frames_skipped: 0,
        samples_sent: 0,
        samples_dropped: 0,
        cancelled: false,
        exit: ExitReason::CalibrationSent,
        path: tracker.into_path(),
    })
}

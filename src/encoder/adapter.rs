use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use flume::{Receiver, SendTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use crate::encoder::{
    CodecError, CodecOutput, EncodedSample, EncoderError, RawFrame, SampleCodec, UserPayload,
};
use crate::EncoderConfig;

enum Job {
    Frame(RawFrame, Option<UserPayload>),
    Flush(Sender<()>),
    Finish(Sender<()>),
}

/// Submission-side handle of an asynchronous encoder.
///
/// `submit` and `flush` are meant for a single producer thread. The callback
/// passed to [`FrameEncoder::spawn`] runs on the completion thread and is
/// invoked once per submitted frame, in submission order.
pub struct FrameEncoder {
    jobs: Option<Sender<Job>>,
    worker: Option<thread::JoinHandle<()>>,
    faulted: Arc<AtomicBool>,
    next_index: u64,
    submit_timeout: Duration,
}

impl FrameEncoder {
    pub fn spawn<C, F>(codec: C, config: &EncoderConfig, on_sample: F) -> Result<Self, EncoderError>
    where
        C: SampleCodec,
        F: FnMut(EncodedSample) + Send + 'static,
    {
        let (tx, rx) = flume::bounded(config.queue_depth.max(1));
        let faulted = Arc::new(AtomicBool::new(false));

        let worker = CompletionWorker {
            codec,
            on_sample,
            pending: VecDeque::new(),
            faulted: Arc::clone(&faulted),
            finished: false,
        };
        let handle = thread::Builder::new()
            .name("hermes-encoder".into())
            .spawn(move || worker.run(rx))?;

        info!(
            "Encoder started: queue depth {}, submit timeout {} ms",
            config.queue_depth, config.submit_timeout_ms
        );

        Ok(Self {
            jobs: Some(tx),
            worker: Some(handle),
            faulted,
            next_index: 0,
            submit_timeout: Duration::from_millis(config.submit_timeout_ms),
        })
    }

    /// Queue an NV12 image for encoding. Returns the sample index.
    pub fn submit(
        &mut self,
        image: Vec<u8>,
        width: u32,
        height: u32,
        duration: i64,
        sample_time: i64,
        metadata: Option<UserPayload>,
    ) -> Result<u64, EncoderError> {
        if self.faulted.load(Ordering::Acquire) {
            return Err(EncoderError::Faulted);
        }
        let jobs = self.jobs.as_ref().ok_or(EncoderError::Closed)?;

        let index = self.next_index;
        let frame = RawFrame {
            index,
            sample_time,
            duration,
            width,
            height,
            data: image,
        };

        match jobs.send_timeout(Job::Frame(frame, metadata), self.submit_timeout) {
            Ok(()) => {
                self.next_index += 1;
                Ok(index)
            }
            Err(SendTimeoutError::Timeout(_)) => Err(EncoderError::QueueFull),
            Err(SendTimeoutError::Disconnected(_)) => Err(EncoderError::Closed),
        }
    }

    /// Block until every frame submitted so far has reached the callback.
    pub fn flush(&self) -> Result<(), EncoderError> {
        self.barrier(Job::Flush)
    }

    /// End the stream: the codec emits everything it still holds and
    /// accepts no further frames.
    fn finish(&self) -> Result<(), EncoderError> {
        self.barrier(Job::Finish)
    }

    fn barrier(&self, job: fn(Sender<()>) -> Job) -> Result<(), EncoderError> {
        let jobs = self.jobs.as_ref().ok_or(EncoderError::Closed)?;
        let (ack_tx, ack_rx) = flume::bounded(1);

        jobs.send(job(ack_tx)).map_err(|_| EncoderError::Closed)?;
        ack_rx.recv().map_err(|_| EncoderError::Closed)
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    /// Finish the stream, stop the completion thread and wait for it to exit.
    pub fn shutdown(mut self) -> Result<(), EncoderError> {
        let finished = self.finish();
        self.stop();
        finished
    }

    fn stop(&mut self) {
        // Closing the queue ends the worker loop
        self.jobs.take();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("Encoder completion thread panicked");
            }
        }
    }
}

impl Drop for FrameEncoder {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Pending {
    index: u64,
    sample_time: i64,
    duration: i64,
    metadata: Option<UserPayload>,
}

struct CompletionWorker<C, F> {
    codec: C,
    on_sample: F,
    pending: VecDeque<Pending>,
    faulted: Arc<AtomicBool>,
    finished: bool,
}

impl<C, F> CompletionWorker<C, F>
where
    C: SampleCodec,
    F: FnMut(EncodedSample),
{
    fn run(mut self, jobs: Receiver<Job>) {
        for job in jobs.iter() {
            match job {
                Job::Frame(frame, metadata) => {
                    if self.finished || self.faulted.load(Ordering::Acquire) {
                        continue;
                    }
                    self.pending.push_back(Pending {
                        index: frame.index,
                        sample_time: frame.sample_time,
                        duration: frame.duration,
                        metadata,
                    });
                    let result = self.codec.encode(frame);
                    self.complete(result);
                }
                Job::Flush(ack) => {
                    self.drain();
                    let _ = ack.send(());
                }
                Job::Finish(ack) => {
                    self.finish();
                    let _ = ack.send(());
                }
            }
        }

        self.finish();
        debug!("Encoder completion thread exiting");
    }

    fn drain(&mut self) {
        if !self.finished && !self.faulted.load(Ordering::Acquire) {
            let result = self.codec.drain();
            self.complete(result);
        }
        // Held frames stay pending so end of stream can still deliver them
        if !self.pending.is_empty() {
            debug!("{} frames still inside the codec after drain", self.pending.len());
        }
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if !self.faulted.load(Ordering::Acquire) {
            let result = self.codec.finish();
            self.complete(result);
        }
        self.discard_pending();
    }

    fn discard_pending(&mut self) {
        if !self.pending.is_empty() {
            warn!(
                "Encoder dropped {} frames without output",
                self.pending.len()
            );
            self.pending.clear();
        }
    }

    fn complete(&mut self, result: Result<Vec<CodecOutput>, CodecError>) {
        match result {
            Ok(outputs) => {
                for output in outputs {
                    self.emit(output);
                }
            }
            Err(e) => {
                error!("Codec failure: {}", e);
                self.faulted.store(true, Ordering::Release);
                self.pending.clear();
            }
        }
    }

    fn emit(&mut self, output: CodecOutput) {
        // Anything queued ahead of this output was swallowed by the codec
        while self
            .pending
            .front()
            .is_some_and(|front| front.index < output.index)
        {
            if let Some(lost) = self.pending.pop_front() {
                warn!("Codec produced no output for frame {}", lost.index);
            }
        }

        match self.pending.front() {
            Some(front) if front.index == output.index => {}
            _ => {
                warn!("Discarding codec output for unknown frame {}", output.index);
                return;
            }
        }
        let Some(pending) = self.pending.pop_front() else {
            return;
        };

        metrics::counter!("hermes_encoded_samples").increment(1);
        (self.on_sample)(EncodedSample {
            sample_time: pending.sample_time,
            duration: pending.duration,
            payload: output.data,
            metadata: pending.metadata,
        });
    }
}

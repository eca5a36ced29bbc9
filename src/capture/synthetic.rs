//! Deterministic test-pattern source for running without a device

use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info};

use crate::capture::{AcquireError, Frame, FrameSource, PixelFormat};

/// Generates grayscale gradient frames at a fixed rate.
///
/// Host timestamps advance by exactly one frame period per frame, expressed
/// in ticks of a `tick_frequency` Hz clock.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    fps: u32,
    tick_frequency: u64,
    limit: Option<u64>,
    paced: bool,
    sequence: u64,
    opened: bool,
    next_deadline: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, fps: u32, tick_frequency: u64) -> Self {
        Self {
            width,
            height,
            fps: fps.max(1),
            tick_frequency,
            limit: None,
            paced: false,
            sequence: 0,
            opened: false,
            next_deadline: None,
        }
    }

    /// Stop with `EndOfStream` after `frames` frames.
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    /// Sleep between frames so delivery matches the frame rate.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    fn render(&self) -> Bytes {
        let shift = (self.sequence % 256) as u32;
        let mut pixels = Vec::with_capacity((self.width * self.height) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                pixels.push(((x + y + shift) & 0xff) as u8);
            }
        }
        Bytes::from(pixels)
    }

    fn wait_for_period(&mut self) {
        let period = Duration::from_secs(1) / self.fps;
        let now = Instant::now();
        let deadline = self.next_deadline.unwrap_or(now);
        if deadline > now {
            thread::sleep(deadline - now);
        }
        self.next_deadline = Some(deadline.max(now) + period);
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self) -> Result<(), AcquireError> {
        info!(
            "Synthetic source open: {}x{} @ {} fps",
            self.width, self.height, self.fps
        );
        self.opened = true;
        self.sequence = 0;
        self.next_deadline = None;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, AcquireError> {
        if !self.opened {
            return Err(AcquireError::Fatal("source not open".into()));
        }
        if self.limit.is_some_and(|limit| self.sequence >= limit) {
            return Err(AcquireError::EndOfStream);
        }
        if self.paced {
            self.wait_for_period();
        }

        let host_ticks = self.sequence * self.tick_frequency / u64::from(self.fps);
        let frame = Frame {
            host_ticks,
            width: self.width,
            height: self.height,
            format: PixelFormat::Gray8,
            data: self.render(),
        };
        self.sequence += 1;
        Ok(frame)
    }

    fn close(&mut self) {
        debug!("Synthetic source closed after {} frames", self.sequence);
        self.opened = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_advance_one_period_per_frame() {
        let mut source = SyntheticSource::new(8, 4, 30, 10_000_000).with_limit(3);
        source.open().unwrap();

        let stamps: Vec<u64> = (0..3)
            .map(|_| source.next_frame().unwrap().host_ticks)
            .collect();
        assert_eq!(stamps, vec![0, 333_333, 666_666]);
        assert_eq!(source.next_frame().unwrap_err(), AcquireError::EndOfStream);
    }

    #[test]
    fn frames_have_full_luma_plane() {
        let mut source = SyntheticSource::new(16, 8, 30, 1_000);
        source.open().unwrap();
        let frame = source.next_frame().unwrap();
        assert_eq!(frame.len(), 128);
        assert_eq!(frame.format, PixelFormat::Gray8);
    }

    #[test]
    fn unopened_source_fails_fatally() {
        let mut source = SyntheticSource::new(8, 8, 30, 1_000);
        assert!(matches!(source.next_frame(), Err(AcquireError::Fatal(_))));
    }
}

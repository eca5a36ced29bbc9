//! V4L2 grayscale capture with memory-mapped buffers

use std::io;

use bytes::Bytes;
use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::{AcquireError, Frame, FrameSource, PixelFormat};
use crate::SensorConfig;

/// Grayscale camera behind a V4L2 device node
///
/// The device node is untouched until [`FrameSource::open`], so building a
/// source for a session that is later rejected has no effect on the sensor.
pub struct V4l2Source {
    // Dropped before the device it maps buffers from
    stream: Option<MmapStream<'static>>,
    device: Option<Box<Device>>,
    config: SensorConfig,
    tick_frequency: u64,
}

impl V4l2Source {
    pub fn new(config: SensorConfig) -> Self {
        Self {
            stream: None,
            device: None,
            tick_frequency: config.tick_frequency,
            config,
        }
    }

    /// Open the device and configure it for 8-bit grayscale at sensor resolution
    fn configure(&self) -> Result<Device, AcquireError> {
        let config = &self.config;
        info!("Initializing V4L2 capture: {}", config.device);

        let device = Device::with_path(&config.device).map_err(fatal)?;

        let caps = device.query_caps().map_err(fatal)?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(AcquireError::Fatal(
                "device doesn't support video capture".into(),
            ));
        }

        let mut fmt = device.format().map_err(fatal)?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = FourCC::new(b"GREY");
        let applied = device.set_format(&fmt).map_err(fatal)?;
        if applied.width != config.width || applied.height != config.height {
            return Err(AcquireError::Fatal(format!(
                "device refused {}x{}, offered {}x{}",
                config.width, config.height, applied.width, applied.height
            )));
        }

        if let Err(e) = device.set_params(&Parameters::with_fps(config.fps)) {
            warn!("Failed to set frame rate to {}: {}", config.fps, e);
        }
        Ok(device)
    }
}

impl FrameSource for V4l2Source {
    fn open(&mut self) -> Result<(), AcquireError> {
        let device = Box::new(self.configure()?);
        let stream =
            MmapStream::with_buffers(&device, Type::VideoCapture, self.config.buffer_count)
                .map_err(fatal)?;

        self.stream = Some(stream);
        self.device = Some(device);
        info!(
            "Capture stream started with {} buffers",
            self.config.buffer_count
        );
        Ok(())
    }

    #[instrument(skip(self), level = "trace")]
    fn next_frame(&mut self) -> Result<Frame, AcquireError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| AcquireError::Fatal("stream not started".into()))?;

        // Blocks until the driver hands back a filled buffer
        let (buf, meta) = stream.next().map_err(classify)?;

        let host_ticks = meta.timestamp.sec as u64 * self.tick_frequency
            + meta.timestamp.usec as u64 * self.tick_frequency / 1_000_000;

        Ok(Frame {
            host_ticks,
            width: self.config.width,
            height: self.config.height,
            format: PixelFormat::Gray8,
            data: Bytes::copy_from_slice(buf),
        })
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            info!("Capture stream stopped");
        }
        self.device = None;
    }
}

fn fatal(e: io::Error) -> AcquireError {
    AcquireError::Fatal(e.to_string())
}

fn classify(e: io::Error) -> AcquireError {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut => {
            AcquireError::Transient(e.to_string())
        }
        _ => AcquireError::Fatal(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_device() -> SensorConfig {
        SensorConfig {
            device: "/dev/hermes-no-such-camera".into(),
            ..SensorConfig::default()
        }
    }

    #[test]
    fn construction_does_not_touch_the_device() {
        let mut source = V4l2Source::new(missing_device());
        assert!(source.device.is_none());
        assert!(matches!(source.open(), Err(AcquireError::Fatal(_))));
        source.close();
    }

    #[test]
    fn unopened_source_fails_fatally() {
        let mut source = V4l2Source::new(missing_device());
        assert!(matches!(source.next_frame(), Err(AcquireError::Fatal(_))));
    }

    #[test]
    fn timeouts_are_transient() {
        let e = io::Error::from(io::ErrorKind::TimedOut);
        assert!(matches!(classify(e), AcquireError::Transient(_)));
        let e = io::Error::from(io::ErrorKind::NotFound);
        assert!(matches!(classify(e), AcquireError::Fatal(_)));
    }
}

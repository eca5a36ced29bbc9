//! Inbound format request exchanged before streaming starts
//!
//! The peer sends `u8 profile | u32 bitrate` (little-endian). Resolution and
//! frame rate are never taken from the peer; the sensor's native values win.

use std::io::{self, Read};

use thiserror::Error;
use tracing::info;

use crate::encoder::{H26xProfile, VideoFormat};
use crate::SensorConfig;

pub const FORMAT_DESCRIPTOR_BYTES: usize = 1 + 4;

#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("failed to read format descriptor: {0}")]
    Io(#[from] io::Error),

    #[error("unknown codec profile {0}")]
    UnknownProfile(u8),

    #[error("bitrate must be non-zero")]
    ZeroBitrate,
}

/// Codec parameters requested by the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub profile: H26xProfile,
    pub bitrate: u32,
}

impl FormatDescriptor {
    pub fn parse(bytes: &[u8; FORMAT_DESCRIPTOR_BYTES]) -> Result<Self, NegotiationError> {
        let profile =
            H26xProfile::from_wire(bytes[0]).ok_or(NegotiationError::UnknownProfile(bytes[0]))?;
        let bitrate = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        if bitrate == 0 {
            return Err(NegotiationError::ZeroBitrate);
        }
        Ok(Self { profile, bitrate })
    }

    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self, NegotiationError> {
        let mut bytes = [0u8; FORMAT_DESCRIPTOR_BYTES];
        reader.read_exact(&mut bytes)?;
        Self::parse(&bytes)
    }

    pub fn to_bytes(self) -> [u8; FORMAT_DESCRIPTOR_BYTES] {
        let mut out = [0u8; FORMAT_DESCRIPTOR_BYTES];
        out[0] = self.profile.to_wire();
        out[1..].copy_from_slice(&self.bitrate.to_le_bytes());
        out
    }

    /// Combine with the sensor's fixed geometry into the session format.
    pub fn into_format(self, sensor: &SensorConfig) -> VideoFormat {
        VideoFormat {
            width: sensor.width,
            height: sensor.height,
            framerate: sensor.fps,
            profile: self.profile,
            bitrate: self.bitrate,
        }
    }
}

/// Read the peer's request and resolve the session format.
pub fn negotiate<R: Read + ?Sized>(
    reader: &mut R,
    sensor: &SensorConfig,
) -> Result<VideoFormat, NegotiationError> {
    let descriptor = FormatDescriptor::read_from(reader)?;
    let format = descriptor.into_format(sensor);
    info!(
        "Negotiated {:?} at {} bps, {}x{} @ {} fps",
        format.profile, format.bitrate, format.width, format.height, format.framerate
    );
    Ok(format)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensor() -> SensorConfig {
        SensorConfig {
            width: 640,
            height: 480,
            fps: 30,
            ..SensorConfig::default()
        }
    }

    #[test]
    fn sensor_geometry_overrides_request() {
        let mut wire: &[u8] = &[2, 0x40, 0x42, 0x0f, 0x00];
        let format = negotiate(&mut wire, &sensor()).unwrap();

        assert_eq!(format.profile, H26xProfile::H264High);
        assert_eq!(format.bitrate, 1_000_000);
        assert_eq!((format.width, format.height, format.framerate), (640, 480, 30));
    }

    #[test]
    fn truncated_descriptor_is_rejected() {
        let mut wire: &[u8] = &[1, 0];
        assert!(matches!(negotiate(&mut wire, &sensor()), Err(NegotiationError::Io(_))));
    }

    #[test]
    fn unknown_profile_is_rejected() {
        let mut wire: &[u8] = &[9, 1, 0, 0, 0];
        assert!(matches!(
            negotiate(&mut wire, &sensor()),
            Err(NegotiationError::UnknownProfile(9))
        ));
    }

    #[test]
    fn zero_bitrate_is_rejected() {
        assert!(matches!(
            FormatDescriptor::parse(&[0, 0, 0, 0, 0]),
            Err(NegotiationError::ZeroBitrate)
        ));
    }
}

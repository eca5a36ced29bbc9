//! Device pose lookup on the tracking clock

pub mod clock;

pub use clock::{HostClock, TrackingTimestamp, HNS_BASE};

/// Size of a pose matrix on the wire.
pub const POSE_BYTES: usize = 16 * 4;

/// Rigid world transform, row-major 4x4
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseMatrix(pub [f32; 16]);

impl PoseMatrix {
    pub const IDENTITY: PoseMatrix = PoseMatrix([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    /// Pure translation, stored in the last row.
    pub fn translation(x: f32, y: f32, z: f32) -> Self {
        let mut m = Self::IDENTITY.0;
        m[12] = x;
        m[13] = y;
        m[14] = z;
        Self(m)
    }

    pub fn to_le_bytes(&self) -> [u8; POSE_BYTES] {
        let mut out = [0u8; POSE_BYTES];
        for (chunk, value) in out.chunks_exact_mut(4).zip(self.0.iter()) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        out
    }

    pub fn from_le_bytes(bytes: &[u8; POSE_BYTES]) -> Self {
        let mut m = [0f32; 16];
        for (value, chunk) in m.iter_mut().zip(bytes.chunks_exact(4)) {
            *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self(m)
    }
}

impl Default for PoseMatrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Answers "where was the device at this instant".
///
/// Returns `None` when tracking is lost. Implementations must not block.
pub trait PoseSource: Send + Sync {
    fn locate(&self, at: TrackingTimestamp) -> Option<PoseMatrix>;
}

impl<F> PoseSource for F
where
    F: Fn(TrackingTimestamp) -> Option<PoseMatrix> + Send + Sync,
{
    fn locate(&self, at: TrackingTimestamp) -> Option<PoseMatrix> {
        self(at)
    }
}

/// Device that never moves
#[derive(Debug, Clone, Copy)]
pub struct StaticPoseSource(pub PoseMatrix);

impl PoseSource for StaticPoseSource {
    fn locate(&self, _at: TrackingTimestamp) -> Option<PoseMatrix> {
        Some(self.0)
    }
}

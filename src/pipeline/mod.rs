pub mod calibration;
pub mod controller;
pub mod latch;
pub mod mode;
pub mod negotiation;

pub use calibration::{CameraModel, RadialCamera, SensorCalibration};
pub use controller::{
    transfer_calibration, ExitReason, PipelineController, SessionSummary, StreamSession,
};
pub use latch::CancellationLatch;
pub use mode::{SessionState, SessionTracker, StreamMode};
pub use negotiation::{negotiate, FormatDescriptor, NegotiationError};

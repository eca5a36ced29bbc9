//! Stream mode selection and the per-session state machine

use tracing::{debug, warn};

use crate::transport::FrameLayout;

/// Behavior selected once per session, before any frame is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Samples carry time and payload only
    Raw,
    /// Samples additionally carry the device pose at capture time
    Posed,
    /// One-shot calibration transfer, no frame loop
    Calibration,
}

impl StreamMode {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Raw),
            1 => Some(Self::Posed),
            2 => Some(Self::Calibration),
            _ => None,
        }
    }

    pub fn with_pose(self) -> bool {
        matches!(self, Self::Posed)
    }

    /// Wire layout for streaming modes; `None` for calibration.
    pub fn layout(self) -> Option<FrameLayout> {
        match self {
            Self::Raw => Some(FrameLayout::Raw),
            Self::Posed => Some(FrameLayout::Posed),
            Self::Calibration => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Negotiating,
    Streaming,
    Draining,
    TransferCalibration,
    Closed,
}

impl SessionState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_enter(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Negotiating)
                | (Idle, TransferCalibration)
                | (Negotiating, Streaming)
                | (Negotiating, Closed)
                | (Streaming, Draining)
                | (Draining, Closed)
                | (TransferCalibration, Closed)
        )
    }
}

/// Records the path a session takes through its states.
#[derive(Debug, Clone)]
pub struct SessionTracker {
    path: Vec<SessionState>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self {
            path: vec![SessionState::Idle],
        }
    }

    pub fn state(&self) -> SessionState {
        self.path.last().copied().unwrap_or(SessionState::Idle)
    }

    /// Move to `next`. Illegal transitions are ignored and reported as `false`.
    pub fn enter(&mut self, next: SessionState) -> bool {
        let current = self.state();
        if !current.can_enter(next) {
            warn!("Illegal session transition {:?} -> {:?}", current, next);
            return false;
        }
        debug!("Session {:?} -> {:?}", current, next);
        self.path.push(next);
        true
    }

    pub fn path(&self) -> &[SessionState] {
        &self.path
    }

    pub fn into_path(self) -> Vec<SessionState> {
        self.path
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn mode_byte_selects_layout() {
        assert_eq!(StreamMode::from_wire(0).and_then(StreamMode::layout), Some(FrameLayout::Raw));
        assert_eq!(StreamMode::from_wire(1).and_then(StreamMode::layout), Some(FrameLayout::Posed));
        assert_eq!(StreamMode::from_wire(2), Some(StreamMode::Calibration));
        assert_eq!(StreamMode::from_wire(3), None);
        assert!(StreamMode::Posed.with_pose());
        assert!(!StreamMode::Raw.with_pose());
    }

    #[test]
    fn streaming_path() {
        let mut tracker = SessionTracker::new();
        for state in [Negotiating, Streaming, Draining, Closed] {
            assert!(tracker.enter(state));
        }
        assert_eq!(tracker.path(), &[Idle, Negotiating, Streaming, Draining, Closed]);
    }

    #[test]
    fn calibration_skips_streaming_states() {
        assert!(Idle.can_enter(TransferCalibration));
        assert!(TransferCalibration.can_enter(Closed));
        assert!(!TransferCalibration.can_enter(Streaming));
        assert!(!Streaming.can_enter(Closed));
    }
}

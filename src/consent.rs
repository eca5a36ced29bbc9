//! Sensor access consent, requested once at process start
//!
//! The request runs on its own thread so startup is not held up by a prompt.
//! Sessions wait for the answer before touching any sensor.

use std::io;
use std::sync::Mutex;
use std::thread;

use flume::Receiver;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, StreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorKind {
    Camera,
    Imu,
    Eyes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentStatus {
    Granted,
    Denied,
}

/// Asks the platform (or the user) for access to a sensor. May block.
pub trait ConsentProvider: Send + 'static {
    fn request_access(&self, sensor: SensorKind) -> ConsentStatus;
}

/// Fixed answer, taken from configuration
#[derive(Debug, Clone, Copy)]
pub struct StaticConsent(pub bool);

impl ConsentProvider for StaticConsent {
    fn request_access(&self, _sensor: SensorKind) -> ConsentStatus {
        if self.0 {
            ConsentStatus::Granted
        } else {
            ConsentStatus::Denied
        }
    }
}

pub struct ConsentGate {
    sensor: SensorKind,
    answer: Receiver<ConsentStatus>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    status: OnceCell<ConsentStatus>,
}

impl ConsentGate {
    /// Start the consent request in the background.
    pub fn start<P: ConsentProvider>(sensor: SensorKind, provider: P) -> io::Result<Self> {
        let (tx, rx) = flume::bounded(1);
        let worker = thread::Builder::new()
            .name("hermes-consent".into())
            .spawn(move || {
                let status = provider.request_access(sensor);
                let _ = tx.send(status);
            })?;

        Ok(Self {
            sensor,
            answer: rx,
            worker: Mutex::new(Some(worker)),
            status: OnceCell::new(),
        })
    }

    /// Block until the request has been answered. Later calls return at once.
    pub fn wait(&self) -> ConsentStatus {
        *self.status.get_or_init(|| {
            // A provider that died without answering counts as a refusal
            let status = self.answer.recv().unwrap_or(ConsentStatus::Denied);
            let worker = self.worker.lock().ok().and_then(|mut worker| worker.take());
            if let Some(worker) = worker {
                if worker.join().is_err() {
                    warn!("Consent thread panicked");
                }
            }
            info!("Consent for {:?}: {:?}", self.sensor, status);
            status
        })
    }

    /// Fail with [`StreamError::ConsentDenied`] unless access was granted.
    pub fn require(&self) -> Result<()> {
        match self.wait() {
            ConsentStatus::Granted => Ok(()),
            ConsentStatus::Denied => Err(StreamError::ConsentDenied(self.sensor)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct SlowGrant;

    impl ConsentProvider for SlowGrant {
        fn request_access(&self, _sensor: SensorKind) -> ConsentStatus {
            thread::sleep(Duration::from_millis(20));
            ConsentStatus::Granted
        }
    }

    struct Panics;

    impl ConsentProvider for Panics {
        fn request_access(&self, _sensor: SensorKind) -> ConsentStatus {
            panic!("prompt crashed")
        }
    }

    #[test]
    fn waits_for_background_answer() {
        let gate = ConsentGate::start(SensorKind::Camera, SlowGrant).unwrap();
        assert_eq!(gate.wait(), ConsentStatus::Granted);
        assert_eq!(gate.wait(), ConsentStatus::Granted);
        assert!(gate.require().is_ok());
    }

    #[test]
    fn denial_blocks_session_start() {
        let gate = ConsentGate::start(SensorKind::Camera, StaticConsent(false)).unwrap();
        assert!(matches!(
            gate.require(),
            Err(StreamError::ConsentDenied(SensorKind::Camera))
        ));
    }

    #[test]
    fn crashed_provider_counts_as_denied() {
        let gate = ConsentGate::start(SensorKind::Eyes, Panics).unwrap();
        assert_eq!(gate.wait(), ConsentStatus::Denied);
    }
}

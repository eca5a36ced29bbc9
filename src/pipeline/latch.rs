use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set-once shutdown flag shared between the acquisition loop and the
/// encoder completion thread.
///
/// Reads are a single atomic load and never block. Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct CancellationLatch(Arc<AtomicBool>);

impl CancellationLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call tripped the latch.
    pub fn set(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn only_first_set_wins() {
        let latch = CancellationLatch::new();
        assert!(!latch.is_set());
        assert!(latch.set());
        assert!(!latch.set());
        assert!(latch.is_set());
    }

    #[test]
    fn visible_across_threads() {
        let latch = CancellationLatch::new();
        let writer = latch.clone();
        thread::spawn(move || writer.set()).join().unwrap();
        assert!(latch.is_set());
    }
}

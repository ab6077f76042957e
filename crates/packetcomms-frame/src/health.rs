use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared "transport still healthy" flag.
///
/// Starts healthy and can only ever be cleared. A dispatcher and its
/// background thread hold clones; clearing it is how either side stops the
/// other.
#[derive(Debug, Clone)]
pub struct HealthFlag {
    ok: Arc<AtomicBool>,
}

impl HealthFlag {
    /// A new, healthy flag.
    pub fn new() -> Self {
        Self {
            ok: Arc::new(AtomicBool::new(true)),
        }
    }

    /// True until [`fail`](Self::fail) has been called on any clone.
    pub fn is_ok(&self) -> bool {
        self.ok.load(Ordering::Acquire)
    }

    /// Mark the transport as failed. Returns true if this call cleared it.
    pub fn fail(&self) -> bool {
        self.ok.swap(false, Ordering::AcqRel)
    }
}

impl Default for HealthFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_is_monotonic_and_shared() {
        let flag = HealthFlag::new();
        let clone = flag.clone();
        assert!(flag.is_ok());

        assert!(clone.fail());
        assert!(!flag.is_ok());
        assert!(!flag.fail());
        assert!(!clone.is_ok());
    }
}

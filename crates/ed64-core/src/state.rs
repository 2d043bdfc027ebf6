//! Upload session states.

use std::fmt;

/// Protocol state of a [`DeviceSession`](crate::session::DeviceSession).
///
/// The sequence is linear; `Filled` is skipped when the image covers the
/// CRC region, and `Faulted` is reachable from anywhere.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Opened,
    LivenessConfirmed,
    Filled,
    Written,
    BootSignaled,
    Closed,
    Faulted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "IDLE"),
            SessionState::Opened => write!(f, "OPENED"),
            SessionState::LivenessConfirmed => write!(f, "LIVENESS_CONFIRMED"),
            SessionState::Filled => write!(f, "FILLED"),
            SessionState::Written => write!(f, "WRITTEN"),
            SessionState::BootSignaled => write!(f, "BOOT_SIGNALED"),
            SessionState::Closed => write!(f, "CLOSED"),
            SessionState::Faulted => write!(f, "FAULTED"),
        }
    }
}

impl SessionState {
    /// Whether `self -> to` is a legal step.
    pub fn can_transition(self, to: SessionState) -> bool {
        use SessionState::*;
        match (self, to) {
            (_, Faulted) => true,
            (Idle, Opened) => true,
            (Opened, LivenessConfirmed) => true,
            (LivenessConfirmed, Filled) | (LivenessConfirmed, Written) => true,
            (Filled, Written) => true,
            (Written, BootSignaled) => true,
            // Closing is allowed from any open state
            (Opened | LivenessConfirmed | Filled | Written | BootSignaled | Faulted, Closed) => {
                true
            }
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_path() {
        use SessionState::*;
        let path = [Idle, Opened, LivenessConfirmed, Filled, Written, BootSignaled, Closed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(LivenessConfirmed.can_transition(Written));
    }

    #[test]
    fn test_illegal_steps() {
        use SessionState::*;
        assert!(!Opened.can_transition(Written));
        assert!(!Written.can_transition(Filled));
        assert!(!Idle.can_transition(Closed));
        assert!(!Closed.can_transition(Opened));
        assert!(Closed.can_transition(Faulted));
        assert!(Written.can_transition(Faulted));
    }
}

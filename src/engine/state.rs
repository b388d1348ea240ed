//! Engine lifecycle state machine.

/// Lifecycle of a playback engine.
///
/// Transitions are validated so misuse (starting a stopped engine, double
/// initialization) is caught at the control API instead of surfacing as a
/// decode-thread anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No session or sink exists yet; also the post-failure state.
    Uninitialized,

    /// Session and sink are built; the decode thread is not running.
    Ready,

    /// The decode thread is running (playing or paused).
    Running,

    /// The decode thread has exited and was joined. Only `reinitialize`
    /// leaves this state.
    Stopped,
}

impl EngineState {
    pub fn can_transition_to(self, target: EngineState) -> bool {
        use EngineState::*;

        match (self, target) {
            (Uninitialized, Ready) => true,
            (Ready, Running) => true,
            // reinitialize tears down from either resting state
            (Ready, Uninitialized) => true,
            (Stopped, Uninitialized) => true,
            (Running, Stopped) => true,
            (a, b) if a == b => true,
            _ => false,
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, EngineState::Running)
    }

    pub fn is_stopped(self) -> bool {
        matches!(self, EngineState::Stopped)
    }

    pub fn description(self) -> &'static str {
        match self {
            EngineState::Uninitialized => "Uninitialized",
            EngineState::Ready => "Ready",
            EngineState::Running => "Running",
            EngineState::Stopped => "Stopped",
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(EngineState::Uninitialized.can_transition_to(EngineState::Ready));
        assert!(EngineState::Ready.can_transition_to(EngineState::Running));
        assert!(EngineState::Running.can_transition_to(EngineState::Stopped));
        assert!(EngineState::Stopped.can_transition_to(EngineState::Uninitialized));
        assert!(EngineState::Ready.can_transition_to(EngineState::Uninitialized));

        // self-transitions are no-ops
        assert!(EngineState::Running.can_transition_to(EngineState::Running));
    }

    #[test]
    fn test_invalid_transitions() {
        // a stopped decode thread cannot be restarted without reinitialize
        assert!(!EngineState::Stopped.can_transition_to(EngineState::Running));
        assert!(!EngineState::Stopped.can_transition_to(EngineState::Ready));
        // the decode thread only starts from a fully built engine
        assert!(!EngineState::Uninitialized.can_transition_to(EngineState::Running));
        assert!(!EngineState::Running.can_transition_to(EngineState::Ready));
    }
}

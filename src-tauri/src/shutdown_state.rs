#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownState {
    #[default]
    Running,
    QuittingRequested,
    ForceKillScheduled,
    Terminated,
}

#[derive(Debug, Default)]
pub struct ShutdownStateMachine {
    state: ShutdownState,
}

impl ShutdownStateMachine {
    #[cfg(test)]
    pub fn state(&self) -> ShutdownState {
        self.state
    }

    pub fn is_quitting(&self) -> bool {
        self.state != ShutdownState::Running
    }

    pub fn is_terminated(&self) -> bool {
        self.state == ShutdownState::Terminated
    }

    /// Returns `true` only for the first quit request.
    pub fn mark_quitting(&mut self) -> bool {
        if self.state == ShutdownState::Running {
            self.state = ShutdownState::QuittingRequested;
            return true;
        }
        false
    }

    pub fn mark_force_kill_scheduled(&mut self) -> bool {
        if matches!(
            self.state,
            ShutdownState::Running | ShutdownState::QuittingRequested
        ) {
            self.state = ShutdownState::ForceKillScheduled;
            return true;
        }
        false
    }

    pub fn mark_terminated(&mut self) {
        self.state = ShutdownState::Terminated;
    }
}

use parking_lot::Mutex;
use tracing::trace;

use super::SessionState;

/// Idle session states kept for reuse. A state is reset before it goes back.
pub(crate) struct SessionPool {
    idle: Mutex<Vec<SessionState>>,
    capacity: usize,
}

impl SessionPool {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    pub(crate) fn acquire(&self) -> SessionState {
        self.idle.lock().pop().unwrap_or_default()
    }

    pub(crate) fn release(&self, mut state: SessionState) {
        state.reset();
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            idle.push(state);
        }
        trace!(idle = idle.len(), "session state released");
    }

    pub(crate) fn idle(&self) -> usize {
        self.idle.lock().len()
    }
}

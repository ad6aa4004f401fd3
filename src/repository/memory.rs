use async_trait::async_trait;
use parking_lot::Mutex;

use super::{PersistedState, StateStore};
use crate::error::Result;

/// In-process store, used by tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<PersistedState>,
    flushes: Mutex<usize>,
}

impl MemoryStateStore {
    pub fn new(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(state),
            flushes: Mutex::new(0),
        }
    }

    /// State as of the last flush
    pub fn current(&self) -> PersistedState {
        self.state.lock().clone()
    }

    pub fn flush_count(&self) -> usize {
        *self.flushes.lock()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<PersistedState> {
        Ok(self.state.lock().clone())
    }

    async fn flush(&self, state: &PersistedState) -> Result<()> {
        *self.state.lock() = state.clone();
        *self.flushes.lock() += 1;
        Ok(())
    }
}

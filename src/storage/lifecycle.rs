//! Open-before-use tracking shared by the metadata stores.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{ErrorCode, StorageError, StorageResult};

#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    initialized: AtomicBool,
    closed: AtomicBool,
}

impl Lifecycle {
    pub(crate) fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
        self.closed.store(false, Ordering::SeqCst);
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self, store: &str) -> StorageResult<()> {
        if self.is_initialized() && !self.is_closed() {
            Ok(())
        } else {
            Err(StorageError::with_message(
                ErrorCode::NotInitialized,
                format!("{} is not initialized or has been closed", store),
            ))
        }
    }
}

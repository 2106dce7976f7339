//! Single-flight guard for mutating operations on a working copy.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{OpsError, OpsResult};

/// Held for the duration of one mutating flow.
pub type WorkingCopyGuard = OwnedMutexGuard<()>;

/// One async mutex per working-copy path.
#[derive(Debug, Default)]
pub struct WorkingCopyLocks {
    inner: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl WorkingCopyLocks {
    /// Take the lock for `path` or fail immediately with [`OpsError::Busy`].
    pub fn try_acquire(&self, path: &Path) -> OpsResult<WorkingCopyGuard> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(path.to_path_buf()).or_default().clone()
        };
        lock.try_lock_owned()
            .map_err(|_| OpsError::Busy(path.display().to_string()))
    }
}

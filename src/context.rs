//! Process-local mutable singletons (§9): the docker/process launcher, the
//! progress bus, and the per-job try-locks that keep at most one
//! orchestrator driver active per folder job. Everything here is created
//! once at startup and handed around as `Arc`s; there is no global state.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::bus::ProgressBus;
use crate::orchestrator::launcher::WorkerLauncher;
use crate::persistence::Store;

pub struct EngineContext {
    pub store: Arc<dyn Store>,
    pub bus: Arc<ProgressBus>,
    pub launcher: Arc<dyn WorkerLauncher>,
    running_jobs: Mutex<HashSet<i64>>,
}

impl EngineContext {
    pub fn new(store: Arc<dyn Store>, bus: Arc<ProgressBus>, launcher: Arc<dyn WorkerLauncher>) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            launcher,
            running_jobs: Mutex::new(HashSet::new()),
        })
    }

    /// Try to become the active driver for `job_id`. Returns `None` if
    /// another driver already holds it — the caller should log and return.
    pub fn try_lock_job(self: &Arc<Self>, job_id: i64) -> Option<JobLockGuard> {
        let mut running = self.running_jobs.lock().unwrap();
        if running.contains(&job_id) {
            return None;
        }
        running.insert(job_id);
        Some(JobLockGuard {
            ctx: Arc::clone(self),
            job_id,
        })
    }
}

/// Releases the per-job lock when dropped, however the driver loop exits.
pub struct JobLockGuard {
    ctx: Arc<EngineContext>,
    job_id: i64,
}

impl Drop for JobLockGuard {
    fn drop(&mut self) {
        self.ctx.running_jobs.lock().unwrap().remove(&self.job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::launcher::ProcessLauncher;
    use crate::persistence::sqlite::SqliteStore;

    #[test]
    fn duplicate_lock_attempts_are_refused_until_release() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let ctx = EngineContext::new(store, ProgressBus::new(), Arc::new(ProcessLauncher::new()));

        let first = ctx.try_lock_job(1).expect("first lock succeeds");
        assert!(ctx.try_lock_job(1).is_none());
        drop(first);
        assert!(ctx.try_lock_job(1).is_some());
    }
}

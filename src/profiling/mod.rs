//! Profiling manager, scoped api reporters and resource accounting.
//!
//! The manager is an explicitly constructed service object: the process
//! entry point builds one, shares it by reference or `Arc`, and every
//! instrumented call site brackets itself with a [`ScopedReporter`].
//!
//! # Scoped API
//!
//! ```rust
//! use std::sync::Arc;
//! use acl_prof::{ApiTypeId, MemoryBackend, ProfilingManager};
//!
//! let backend = Arc::new(MemoryBackend::new());
//! let manager = ProfilingManager::new(backend.clone());
//! manager.start().unwrap();
//!
//! fn load_model(manager: &ProfilingManager) -> u32 {
//!     acl_prof::prof_scope!(manager, ApiTypeId::MDL_LOAD_FROM_FILE);
//!     // ... call into the runtime ...
//!     42
//! }
//!
//! load_model(&manager);
//! assert_eq!(backend.records().len(), 1);
//! ```

pub mod counters;
pub mod reporter;
pub mod timer;

pub use counters::{CounterOp, ResourceKind, ResourceSnapshot, ResourceStatistics};
pub use reporter::ScopedReporter;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::api_type::ApiTypeRegistry;
use crate::backend::{ApiRecord, TracingBackend, STATUS_OK};
use crate::error::{ProfError, ProfResult};

#[derive(Debug, Default)]
struct ProfilingState {
    enabled: bool,
    devices: HashSet<u32>,
}

/// Owns the profiling engine lifecycle and the set of observed devices.
///
/// Engine state and the device set change together under one mutex. The
/// enabled flag is mirrored into an atomic so reporters never take the lock.
pub struct ProfilingManager {
    backend: Arc<dyn TracingBackend>,
    registry: ApiTypeRegistry,
    state: Mutex<ProfilingState>,
    running: AtomicBool,
    dump_to_stdout: AtomicBool,
}

impl ProfilingManager {
    /// Manager over the builtin api table.
    pub fn new(backend: Arc<dyn TracingBackend>) -> Self {
        Self::with_registry(backend, ApiTypeRegistry::builtin())
    }

    pub fn with_registry(backend: Arc<dyn TracingBackend>, registry: ApiTypeRegistry) -> Self {
        Self {
            backend,
            registry,
            state: Mutex::new(ProfilingState::default()),
            running: AtomicBool::new(false),
            dump_to_stdout: AtomicBool::new(false),
        }
    }

    pub fn backend(&self) -> &dyn TracingBackend {
        self.backend.as_ref()
    }

    pub fn registry(&self) -> &ApiTypeRegistry {
        &self.registry
    }

    /// Initialize the engine and register every api type.
    ///
    /// A registration failure is returned with the engine left initialized;
    /// there is no rollback of the init call.
    pub fn start(&self) -> ProfResult<()> {
        let mut state = self.lock();
        if state.enabled {
            return Err(ProfError::AlreadyRunning);
        }
        let code = self.backend.init();
        if code != STATUS_OK {
            log::error!("init profiling engine failed, status {code}");
            return Err(ProfError::BackendInit { code });
        }
        if let Err(e) = self.registry.register_all(self.backend.as_ref()) {
            log::error!("profiling engine initialized but api type registration failed: {e}");
            return Err(e);
        }
        state.enabled = true;
        self.running.store(true, Ordering::Release);
        log::info!("profiling engine started");
        Ok(())
    }

    /// Tear the engine down. On failure the manager stays running.
    pub fn stop(&self) -> ProfResult<()> {
        let mut state = self.lock();
        if !state.enabled {
            return Err(ProfError::NotRunning);
        }
        let code = self.backend.uninit();
        if code != STATUS_OK {
            log::error!("uninit profiling engine failed, status {code}");
            return Err(ProfError::BackendUninit { code });
        }
        state.enabled = false;
        self.running.store(false, Ordering::Release);
        log::info!("profiling engine stopped");
        Ok(())
    }

    /// Add devices to the observed set. Duplicates are no-ops.
    pub fn add_devices(&self, ids: &[u32]) {
        let mut state = self.lock();
        for &id in ids {
            if state.devices.insert(id) {
                log::info!("device {id} added to profiling");
            }
        }
    }

    /// Remove devices from the observed set. Unknown ids are no-ops.
    pub fn remove_devices(&self, ids: &[u32]) {
        let mut state = self.lock();
        for id in ids {
            if state.devices.remove(id) {
                log::info!("device {id} removed from profiling");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().enabled
    }

    pub fn is_device_set_empty(&self) -> bool {
        self.lock().devices.is_empty()
    }

    pub fn is_device_enabled(&self, id: u32) -> bool {
        self.lock().devices.contains(&id)
    }

    /// Observed devices, ascending.
    pub fn devices(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.lock().devices.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn set_dump_to_stdout(&self, enabled: bool) {
        self.dump_to_stdout.store(enabled, Ordering::Relaxed);
    }

    pub fn dump_to_stdout(&self) -> bool {
        self.dump_to_stdout.load(Ordering::Relaxed)
    }

    /// Forward a complete record. Rejected with `NotRunning` while stopped.
    pub fn report(&self, record: &ApiRecord) -> ProfResult<()> {
        if !self.running.load(Ordering::Acquire) {
            return Err(ProfError::NotRunning);
        }
        match self.backend.report_api(record) {
            STATUS_OK => Ok(()),
            code => Err(ProfError::Report { code }),
        }
    }

    /// Forward a raw payload. Rejected with `NotRunning` while stopped.
    pub fn report_data(&self, module: u32, phase: u32, payload: &[u8]) -> ProfResult<()> {
        if !self.running.load(Ordering::Acquire) {
            return Err(ProfError::NotRunning);
        }
        match self.backend.report_data(module, phase, payload) {
            STATUS_OK => Ok(()),
            code => Err(ProfError::Report { code }),
        }
    }

    /// Lock-free check used on the reporter fast path.
    #[inline]
    pub(crate) fn should_record(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.dump_to_stdout.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, ProfilingState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_type::{ApiRange, ApiTypeId};
    use crate::backend::{BackendCall, MemoryBackend};

    fn manager() -> (Arc<MemoryBackend>, ProfilingManager) {
        let backend = Arc::new(MemoryBackend::new());
        let manager = ProfilingManager::new(backend.clone());
        (backend, manager)
    }

    #[test]
    fn test_start_stop_cycle() {
        let (backend, manager) = manager();
        assert!(!manager.is_running());
        manager.start().unwrap();
        assert!(manager.is_running());
        manager.stop().unwrap();
        assert!(!manager.is_running());
        assert_eq!(backend.count(|c| *c == BackendCall::Init), 1);
        assert_eq!(backend.count(|c| *c == BackendCall::Uninit), 1);
    }

    #[test]
    fn test_double_start_does_not_reinit() {
        let (backend, manager) = manager();
        manager.start().unwrap();
        assert!(matches!(manager.start(), Err(ProfError::AlreadyRunning)));
        assert_eq!(backend.count(|c| *c == BackendCall::Init), 1);
    }

    #[test]
    fn test_stop_while_stopped() {
        let (backend, manager) = manager();
        assert!(matches!(manager.stop(), Err(ProfError::NotRunning)));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_init_failure_keeps_stopped() {
        let (backend, manager) = manager();
        backend.fail_init(-1);
        assert!(matches!(manager.start(), Err(ProfError::BackendInit { code: -1 })));
        assert!(!manager.is_running());
        assert!(backend.registered_ids().is_empty());
    }

    #[test]
    fn test_uninit_failure_keeps_running() {
        let (backend, manager) = manager();
        manager.start().unwrap();
        backend.fail_uninit(-2);
        assert!(matches!(manager.stop(), Err(ProfError::BackendUninit { code: -2 })));
        assert!(manager.is_running());
        backend.heal();
        manager.stop().unwrap();
        assert!(!manager.is_running());
    }

    #[test]
    fn test_registration_failure_leaves_engine_initialized() {
        let (backend, manager) = manager();
        backend.fail_register_at(ApiTypeId::MDL_EXECUTE, -9);
        let err = manager.start().unwrap_err();
        assert!(matches!(
            err,
            ProfError::Registration { id, code: -9 } if id == ApiTypeId::MDL_EXECUTE
        ));
        assert!(!manager.is_running());
        assert_eq!(backend.count(|c| *c == BackendCall::Init), 1);
        assert_eq!(backend.count(|c| *c == BackendCall::Uninit), 0);
    }

    #[test]
    fn test_start_registers_every_id_in_range_order() {
        let (backend, manager) = manager();
        manager.start().unwrap();
        let expected: Vec<ApiTypeId> = ApiRange::REGISTRATION_ORDER
            .into_iter()
            .flat_map(|r| r.ids())
            .collect();
        assert_eq!(backend.registered_ids(), expected);
        assert_eq!(expected.len(), 189);
    }

    #[test]
    fn test_device_set_is_idempotent() {
        let (_, manager) = manager();
        manager.add_devices(&[3, 3, 1]);
        manager.remove_devices(&[3]);
        assert!(!manager.is_device_enabled(3));
        manager.add_devices(&[3]);
        manager.add_devices(&[3]);
        manager.remove_devices(&[9]);
        assert_eq!(manager.devices(), vec![1, 3]);
        manager.remove_devices(&[1, 3]);
        assert!(manager.is_device_set_empty());
    }

    #[test]
    fn test_report_requires_running() {
        let (backend, manager) = manager();
        let record = ApiRecord {
            api: ApiTypeId::RT_MEMCPY,
            begin_time: 1,
            end_time: 2,
            thread_id: 1,
            level: crate::api_type::ACL_LEVEL,
        };
        assert!(matches!(manager.report(&record), Err(ProfError::NotRunning)));
        assert!(matches!(manager.report_data(1, 2, b"x"), Err(ProfError::NotRunning)));
        manager.start().unwrap();
        manager.report(&record).unwrap();
        manager.report_data(1, 2, b"x").unwrap();
        backend.fail_report(-4);
        assert!(matches!(manager.report(&record), Err(ProfError::Report { code: -4 })));
        assert_eq!(backend.records().len(), 2);
    }
}

//! RAII timing guard for one instrumented api call.

use crate::api_type::{ApiTypeId, ACL_LEVEL};
use crate::backend::{ApiRecord, STATUS_OK};
use crate::profiling::timer;
use crate::profiling::ProfilingManager;

/// Brackets one api invocation; the record is submitted on drop.
///
/// Nothing is captured unless the manager is running with dump-to-stdout
/// off, checked both at construction and at drop. Report failures are
/// dropped so profiling never fails the wrapped call.
#[must_use = "the reporter times the enclosing scope; bind it to a variable"]
pub struct ScopedReporter<'a> {
    manager: &'a ProfilingManager,
    api: ApiTypeId,
    begin_time: u64,
}

impl<'a> ScopedReporter<'a> {
    #[inline]
    pub fn new(manager: &'a ProfilingManager, api: ApiTypeId) -> Self {
        let begin_time = if manager.should_record() {
            manager.backend().monotonic_cycle_time()
        } else {
            0
        };
        Self { manager, api, begin_time }
    }

    pub fn api(&self) -> ApiTypeId {
        self.api
    }

    /// Zero when profiling was inactive at construction.
    pub fn begin_time(&self) -> u64 {
        self.begin_time
    }
}

impl Drop for ScopedReporter<'_> {
    fn drop(&mut self) {
        if !self.manager.should_record() {
            return;
        }
        let backend = self.manager.backend();
        let record = ApiRecord {
            api: self.api,
            begin_time: self.begin_time,
            end_time: backend.monotonic_cycle_time(),
            thread_id: timer::current_thread_id(),
            level: ACL_LEVEL,
        };
        let code = backend.report_api(&record);
        if code != STATUS_OK {
            log::debug!("dropped api record for {}: status {code}", self.api);
        }
    }
}

/// Time the rest of the enclosing scope as one call of `$api`.
#[macro_export]
macro_rules! prof_scope {
    ($manager:expr, $api:expr) => {
        let _prof_scope = $crate::profiling::ScopedReporter::new(&$manager, $api);
    };
}

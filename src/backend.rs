//! Tracing backend contract and the host-side backends shipped with the crate.
//!
//! Every backend call returns a raw status where zero means success. The
//! manager maps init/uninit/registration failures to errors; report failures
//! are the caller's to ignore.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api_type::ApiTypeId;
use crate::error::ProfResult;
use crate::profiling::timer;

pub const STATUS_OK: i32 = 0;
pub const STATUS_ERROR: i32 = -1;

/// Timing record for one api invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRecord {
    pub api: ApiTypeId,
    pub begin_time: u64,
    pub end_time: u64,
    pub thread_id: u32,
    pub level: u16,
}

impl ApiRecord {
    pub fn elapsed_cycles(&self) -> u64 {
        self.end_time.saturating_sub(self.begin_time)
    }
}

/// How the engine is configured before the first start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CtrlInitMode {
    /// No static config; the engine waits for dynamic switch commands.
    Dynamic,
    /// Config taken from the `profiler` member of a JSON file.
    JsonConfig,
    /// Config taken from an environment variable.
    EnvConfig,
}

/// External telemetry engine the profiling core reports to.
pub trait TracingBackend: Send + Sync {
    fn init(&self) -> i32;

    fn uninit(&self) -> i32;

    fn register_type_name(&self, level: u16, id: ApiTypeId, name: &str) -> i32;

    fn report_api(&self, record: &ApiRecord) -> i32;

    fn report_data(&self, module: u32, phase: u32, payload: &[u8]) -> i32;

    fn monotonic_cycle_time(&self) -> u64;

    fn ctrl_init(&self, _mode: CtrlInitMode, _config: &str) -> i32 {
        STATUS_OK
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// One observed backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Init,
    Uninit,
    CtrlInit { mode: CtrlInitMode, config: String },
    RegisterTypeName { level: u16, id: ApiTypeId, name: String },
    ReportApi(ApiRecord),
    ReportData { module: u32, phase: u32, payload: Vec<u8> },
}

/// Backend that records every call and can be told to fail.
///
/// The clock is a counter advanced by one on every query, so begin/end
/// pairs are strictly ordered and deterministic.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    calls: Mutex<Vec<BackendCall>>,
    clock: AtomicU64,
    init_status: AtomicI32,
    uninit_status: AtomicI32,
    report_status: AtomicI32,
    ctrl_init_status: AtomicI32,
    register_failure: Mutex<Option<(ApiTypeId, i32)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_init(&self, code: i32) {
        self.init_status.store(code, Ordering::Relaxed);
    }

    pub fn fail_uninit(&self, code: i32) {
        self.uninit_status.store(code, Ordering::Relaxed);
    }

    pub fn fail_report(&self, code: i32) {
        self.report_status.store(code, Ordering::Relaxed);
    }

    pub fn fail_ctrl_init(&self, code: i32) {
        self.ctrl_init_status.store(code, Ordering::Relaxed);
    }

    /// Make registration of `id` return `code`.
    pub fn fail_register_at(&self, id: ApiTypeId, code: i32) {
        *lock(&self.register_failure) = Some((id, code));
    }

    /// Clear every injected failure.
    pub fn heal(&self) {
        self.init_status.store(STATUS_OK, Ordering::Relaxed);
        self.uninit_status.store(STATUS_OK, Ordering::Relaxed);
        self.report_status.store(STATUS_OK, Ordering::Relaxed);
        self.ctrl_init_status.store(STATUS_OK, Ordering::Relaxed);
        *lock(&self.register_failure) = None;
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        lock(&self.calls).clone()
    }

    pub fn clear(&self) {
        lock(&self.calls).clear();
    }

    pub fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|c| pred(*c)).count()
    }

    /// Api records reported so far, in report order.
    pub fn records(&self) -> Vec<ApiRecord> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                BackendCall::ReportApi(r) => Some(*r),
                _ => None,
            })
            .collect()
    }

    /// Ids passed to `register_type_name`, in call order.
    pub fn registered_ids(&self) -> Vec<ApiTypeId> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                BackendCall::RegisterTypeName { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: BackendCall) {
        lock(&self.calls).push(call);
    }
}

impl TracingBackend for MemoryBackend {
    fn init(&self) -> i32 {
        self.push(BackendCall::Init);
        self.init_status.load(Ordering::Relaxed)
    }

    fn uninit(&self) -> i32 {
        self.push(BackendCall::Uninit);
        self.uninit_status.load(Ordering::Relaxed)
    }

    fn register_type_name(&self, level: u16, id: ApiTypeId, name: &str) -> i32 {
        self.push(BackendCall::RegisterTypeName { level, id, name: name.to_string() });
        match *lock(&self.register_failure) {
            Some((failing, code)) if failing == id => code,
            _ => STATUS_OK,
        }
    }

    fn report_api(&self, record: &ApiRecord) -> i32 {
        self.push(BackendCall::ReportApi(*record));
        self.report_status.load(Ordering::Relaxed)
    }

    fn report_data(&self, module: u32, phase: u32, payload: &[u8]) -> i32 {
        self.push(BackendCall::ReportData { module, phase, payload: payload.to_vec() });
        self.report_status.load(Ordering::Relaxed)
    }

    fn monotonic_cycle_time(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn ctrl_init(&self, mode: CtrlInitMode, config: &str) -> i32 {
        self.push(BackendCall::CtrlInit { mode, config: config.to_string() });
        self.ctrl_init_status.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// JSON-lines file backend
// ---------------------------------------------------------------------------

/// Backend that appends one JSON object per event to a file.
pub struct JsonlBackend {
    writer: Mutex<BufWriter<File>>,
    names: Mutex<HashMap<ApiTypeId, String>>,
}

impl JsonlBackend {
    pub fn create(path: impl AsRef<Path>) -> ProfResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        log::info!("writing profiling records to {:?}", path);
        // resolve the clock rate here, not on the first report
        timer::cycle_freq_hz();
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            names: Mutex::new(HashMap::new()),
        })
    }

    fn write(&self, entry: serde_json::Value) -> i32 {
        let mut writer = lock(&self.writer);
        match writeln!(writer, "{entry}") {
            Ok(()) => STATUS_OK,
            Err(e) => {
                log::warn!("profiling record write failed: {e}");
                STATUS_ERROR
            }
        }
    }

    fn flush(&self) -> i32 {
        match lock(&self.writer).flush() {
            Ok(()) => STATUS_OK,
            Err(e) => {
                log::warn!("profiling record flush failed: {e}");
                STATUS_ERROR
            }
        }
    }
}

impl TracingBackend for JsonlBackend {
    fn init(&self) -> i32 {
        timer::cycle_freq_hz();
        self.write(json!({ "event": "init" }))
    }

    fn uninit(&self) -> i32 {
        let status = self.write(json!({ "event": "uninit" }));
        if status != STATUS_OK {
            return status;
        }
        self.flush()
    }

    fn register_type_name(&self, level: u16, id: ApiTypeId, name: &str) -> i32 {
        lock(&self.names).insert(id, name.to_string());
        self.write(json!({ "event": "type", "level": level, "id": id, "name": name }))
    }

    fn report_api(&self, record: &ApiRecord) -> i32 {
        let name = lock(&self.names).get(&record.api).cloned();
        self.write(json!({
            "event": "api",
            "id": record.api,
            "name": name,
            "level": record.level,
            "thread_id": record.thread_id,
            "begin": record.begin_time,
            "end": record.end_time,
            "duration_ns": timer::cycles_to_ns(record.elapsed_cycles()),
        }))
    }

    fn report_data(&self, module: u32, phase: u32, payload: &[u8]) -> i32 {
        self.write(json!({
            "event": "data",
            "module": module,
            "phase": phase,
            "len": payload.len(),
        }))
    }

    fn monotonic_cycle_time(&self) -> u64 {
        timer::cycle_time()
    }

    fn ctrl_init(&self, mode: CtrlInitMode, config: &str) -> i32 {
        self.write(json!({ "event": "ctrl_init", "mode": mode, "config": config }))
    }
}

/// Lock that survives a panicked holder; backend state stays usable.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

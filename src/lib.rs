//! acl-prof: profiling and resource accounting for accelerator runtime API calls.
//!
//! This crate provides:
//! - **API-type registry**: id → name table for every instrumented runtime call,
//!   registered with the tracing engine on start
//! - **Profiling manager**: engine start/stop and the set of observed devices
//! - **Scoped reporters**: RAII timing of one api call, submitted on drop
//! - **Resource statistics**: lock-free apply/release counters per handle family
//! - **Control surface**: decoding of profiling switch commands and config
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use acl_prof::{ApiTypeId, MemoryBackend, ProfCommand, ProfilingControl, ProfilingManager};
//!
//! let backend = Arc::new(MemoryBackend::new());
//! let manager = Arc::new(ProfilingManager::new(backend.clone()));
//! let control = ProfilingControl::new(manager.clone());
//!
//! control.process(&ProfCommand::start(&[0])).unwrap();
//! {
//!     acl_prof::prof_scope!(manager, ApiTypeId::RT_SET_DEVICE);
//! }
//! control.process(&ProfCommand::stop(&[0])).unwrap();
//!
//! assert_eq!(backend.records().len(), 1);
//! assert!(!manager.is_running());
//! ```

pub mod api_type;
pub mod backend;
pub mod config;
pub mod control;
pub mod error;
pub mod profiling;

pub use api_type::{ApiRange, ApiTypeId, ApiTypeRegistry, ACL_LEVEL};
pub use backend::{
    ApiRecord, BackendCall, CtrlInitMode, JsonlBackend, MemoryBackend, TracingBackend,
};
pub use config::ProfilingConfig;
pub use control::{CommandKind, ProfCommand, ProfilingControl, RT_PROF_CTRL_SWITCH};
pub use error::{ProfError, ProfResult};
pub use profiling::{
    CounterOp, ProfilingManager, ResourceKind, ResourceSnapshot, ResourceStatistics, ScopedReporter,
};

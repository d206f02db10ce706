use thiserror::Error;

use crate::api_type::ApiTypeId;

#[derive(Debug, Error)]
pub enum ProfError {
    #[error("profiling engine init failed, status {code}")]
    BackendInit { code: i32 },
    #[error("profiling engine uninit failed, status {code}")]
    BackendUninit { code: i32 },
    #[error("registering api type {id} failed, status {code}")]
    Registration { id: ApiTypeId, code: i32 },
    #[error("profiling report failed, status {code}")]
    Report { code: i32 },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("profiling engine is already running")]
    AlreadyRunning,
    #[error("profiling engine is not running")]
    NotRunning,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ProfResult<T> = Result<T, ProfError>;

//! API-type identifiers and the id → name table registered with the tracing backend.
//!
//! Ids live in four half-open ranges. The base of each range is a marker and
//! never carries a name; named ids start at `base + 1`. A registry may cover
//! a range only sparsely: ids without a name are skipped on registration.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::TracingBackend;
use crate::error::{ProfError, ProfResult};

/// Report level every api record and type registration is tagged with.
pub const ACL_LEVEL: u16 = 20000;

pub const OP_BASE: u32 = 0x0001_0000;
pub const MODEL_BASE: u32 = 0x0002_0000;
pub const RUNTIME_BASE: u32 = 0x0003_0000;
pub const OTHERS_BASE: u32 = 0x0004_0000;

/// Numeric tag of an instrumented API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiTypeId(pub u32);

impl ApiTypeId {
    pub const MDL_EXECUTE: Self = Self(MODEL_BASE + 1);
    pub const MDL_LOAD_FROM_FILE: Self = Self(MODEL_BASE + 5);
    pub const MDL_LOAD_FROM_FILE_WITH_MEM: Self = Self(MODEL_BASE + 6);
    pub const MDL_UNLOAD: Self = Self(MODEL_BASE + 19);
    pub const OP_EXECUTE: Self = Self(OP_BASE + 2);
    pub const RT_SET_DEVICE: Self = Self(RUNTIME_BASE + 7);
    pub const RT_RESET_DEVICE: Self = Self(RUNTIME_BASE + 9);
    pub const RT_FREE: Self = Self(RUNTIME_BASE + 32);
    pub const RT_MEMCPY: Self = Self(RUNTIME_BASE + 35);
    pub const RT_CREATE_STREAM: Self = Self(RUNTIME_BASE + 45);
    pub const RT_DESTROY_STREAM: Self = Self(RUNTIME_BASE + 47);
    pub const RT_MALLOC: Self = Self(RUNTIME_BASE + 61);
    pub const DVPP_CREATE_CHANNEL: Self = Self(OTHERS_BASE + 1);

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Range this id falls in, `None` for markers and ids outside every range.
    pub fn range(self) -> Option<ApiRange> {
        ApiRange::of(self)
    }
}

impl fmt::Display for ApiTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The four id partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiRange {
    Model,
    Op,
    Runtime,
    Others,
}

impl ApiRange {
    /// Order in which ranges are registered with the backend.
    pub const REGISTRATION_ORDER: [ApiRange; 4] =
        [ApiRange::Others, ApiRange::Op, ApiRange::Model, ApiRange::Runtime];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Op => "op",
            Self::Runtime => "runtime",
            Self::Others => "others",
        }
    }

    /// Range marker; not a registrable id.
    pub fn base(&self) -> u32 {
        match self {
            Self::Model => MODEL_BASE,
            Self::Op => OP_BASE,
            Self::Runtime => RUNTIME_BASE,
            Self::Others => OTHERS_BASE,
        }
    }

    /// Exclusive upper bound.
    pub fn end(&self) -> u32 {
        self.base() + 1 + self.builtin_names().len() as u32
    }

    /// Registrable ids of this range, ascending.
    pub fn ids(&self) -> impl Iterator<Item = ApiTypeId> {
        (self.base() + 1..self.end()).map(ApiTypeId)
    }

    pub fn contains(&self, id: ApiTypeId) -> bool {
        id.0 > self.base() && id.0 < self.end()
    }

    pub fn of(id: ApiTypeId) -> Option<ApiRange> {
        Self::REGISTRATION_ORDER.into_iter().find(|r| r.contains(id))
    }

    fn builtin_names(&self) -> &'static [&'static str] {
        match self {
            Self::Model => MODEL_APIS,
            Self::Op => OP_APIS,
            Self::Runtime => RUNTIME_APIS,
            Self::Others => OTHERS_APIS,
        }
    }
}

/// Typed id → name mapping.
#[derive(Debug, Clone, Default)]
pub struct ApiTypeRegistry {
    names: HashMap<ApiTypeId, &'static str>,
}

impl ApiTypeRegistry {
    /// Registry over the full runtime API table.
    pub fn builtin() -> Self {
        let mut names = HashMap::new();
        for range in ApiRange::REGISTRATION_ORDER {
            for (id, name) in range.ids().zip(range.builtin_names().iter().copied()) {
                names.insert(id, name);
            }
        }
        Self { names }
    }

    /// Registry over an explicit table. Later duplicates of an id win.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (ApiTypeId, &'static str)>,
    {
        Self {
            names: entries.into_iter().collect(),
        }
    }

    pub fn name(&self, id: ApiTypeId) -> Option<&'static str> {
        self.names.get(&id).copied()
    }

    pub fn id_of(&self, name: &str) -> Option<ApiTypeId> {
        self.names
            .iter()
            .find_map(|(id, n)| (*n == name).then_some(*id))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Named ids in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (ApiTypeId, &'static str)> + '_ {
        ApiRange::REGISTRATION_ORDER
            .into_iter()
            .flat_map(|range| range.ids())
            .filter_map(move |id| self.name(id).map(|name| (id, name)))
    }

    /// Register one id with the backend. Ids without a name are a successful no-op.
    pub fn register_type(&self, backend: &dyn TracingBackend, id: ApiTypeId) -> ProfResult<()> {
        let Some(name) = self.name(id) else {
            return Ok(());
        };
        let code = backend.register_type_name(ACL_LEVEL, id, name);
        if code != 0 {
            log::error!("registering api type [{id}] {name} failed, status {code}");
            return Err(ProfError::Registration { id, code });
        }
        Ok(())
    }

    /// Register every range, stopping at the first failure.
    pub fn register_all(&self, backend: &dyn TracingBackend) -> ProfResult<()> {
        for range in ApiRange::REGISTRATION_ORDER {
            for id in range.ids() {
                self.register_type(backend, id)?;
            }
            log::debug!("registered {} api types", range.name());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Name tables, one entry per id starting at `base + 1`
// ---------------------------------------------------------------------------

static MODEL_APIS: &[&str] = &[
    "aclmdlExecute",
    "aclmdlLoadFromMemWithQ",
    "aclmdlLoadFromMemWithMem",
    "aclmdlGetDesc",
    "aclmdlLoadFromFile",
    "aclmdlLoadFromFileWithMem",
    "aclmdlLoad",
    "aclmdlLoadFromMem",
    "aclmdlSetInputAIPP",
    "aclmdlSetAIPPByInputIndex",
    "aclmdlExecuteAsync",
    "aclmdlQuerySize",
    "aclmdlQuerySizeFromMem",
    "aclmdlSetDynamicBatchSize",
    "aclmdlSetDynamicHWSize",
    "aclmdlSetInputDynamicDims",
    "aclmdlLoadWithConfig",
    "aclmdlLoadFromFileWithQ",
    "aclmdlUnload",
];

static OP_APIS: &[&str] = &[
    "aclopLoad",
    "aclopExecute",
    "aclopCreateHandle",
    "aclopDestroyHandle",
    "aclopExecWithHandle",
    "aclopExecuteV2",
    "aclTransTensorDescFormat",
    "aclopCreateKernel",
    "aclopUpdateParams",
    "aclopInferShape",
    "aclopCompile",
    "aclopCompileAndExecute",
    "aclopCompileAndExecuteV2",
    "aclGenGraphAndDumpForOp",
    "aclblasGemmEx",
    "aclblasCreateHandleForGemmEx",
    "aclblasCreateHandleForHgemm",
    "aclblasHgemm",
    "aclblasS8gemm",
    "aclblasCreateHandleForS8gemm",
    "aclblasGemvEx",
    "aclblasCreateHandleForGemvEx",
    "aclblasHgemv",
    "aclblasCreateHandleForHgemv",
    "aclblasCreateHandleForS8gemv",
    "aclblasS8gemv",
    "aclopCast",
    "aclopCreateHandleForCast",
    "opCompile",
    "opCompileAndDump",
    "aclopDestroyAttr",
    "aclCreateTensorDesc",
    "aclDestroyTensorDesc",
    "aclCreateDataBuffer",
    "aclopCreateAttr",
];

static RUNTIME_APIS: &[&str] = &[
    "aclrtLaunchCallback",
    "aclrtProcessReport",
    "aclrtCreateContext",
    "aclrtDestroyContext",
    "aclrtSetCurrentContext",
    "aclrtGetCurrentContext",
    "aclrtSetDevice",
    "aclrtSetDeviceWithoutTsdVXX",
    "aclrtResetDevice",
    "aclrtResetDeviceWithoutTsdVXX",
    "aclrtSynchronizeDevice",
    "aclrtSetTsDevice",
    "aclrtCreateEvent",
    "aclrtCreateEventWithFlag",
    "aclrtDestroyEvent",
    "aclrtRecordEvent",
    "aclrtResetEvent",
    "aclrtQueryEvent",
    "aclrtQueryEventStatus",
    "aclrtQueryEventWaitStatus",
    "aclrtSynchronizeEvent",
    "aclrtSetOpWaitTimeout",
    "aclrtSetOpExecuteTimeOut",
    "aclrtSetGroup",
    "aclrtGetGroupCount",
    "aclrtGetAllGroupInfo",
    "aclrtGetGroupInfoDetail",
    "aclMallocMemInner",
    "aclrtMallocCached",
    "aclrtMemFlush",
    "aclrtMemInvalidate",
    "aclrtFree",
    "aclrtMallocHost",
    "aclrtFreeHost",
    "aclrtMemcpy",
    "aclrtMemset",
    "aclrtMemcpyAsync",
    "aclrtMemsetAsync",
    "aclrtDeviceCanAccessPeer",
    "aclrtDeviceEnablePeerAccess",
    "aclrtDeviceDisablePeerAccess",
    "aclrtGetMemInfo",
    "aclrtMemcpy2d",
    "aclrtMemcpy2dAsync",
    "aclrtCreateStream",
    "aclrtCreateStreamWithConfig",
    "aclrtDestroyStream",
    "aclrtDestroyStreamForce",
    "aclrtSynchronizeStream",
    "aclrtSynchronizeStreamWithTimeout",
    "aclrtStreamQuery",
    "aclrtStreamWaitEvent",
    "aclrtAllocatorCreateDesc",
    "aclrtAllocatorDestroyDesc",
    "aclrtCtxGetSysParamOpt",
    "aclrtCtxSetSysParamOpt",
    "aclrtGetOverflowStatus",
    "aclrtResetOverflowStatus",
    "aclrtGetDeviceCount",
    "aclrtGetDevice",
    "aclrtMalloc",
    "aclrtSetStreamFailureMode",
    "aclrtQueryDeviceStatus",
    "aclrtReserveMemAddress",
    "aclrtReleaseMemAddress",
    "aclrtMallocPhysical",
    "aclrtFreePhysical",
    "aclrtMapMem",
    "aclrtUnmapMem",
    "aclrtLaunchKernel",
    "AclrtMemExportToShareableHandle",
    "AclrtMemImportFromShareableHandle",
    "AclrtMemSetPidToShareableHandle",
    "AclrtMemGetAllocationGranularity",
    "AclrtDeviceGetBareTgid",
];

static OTHERS_APIS: &[&str] = &[
    "acldvppCreateChannel",
    "acldvppDestroyChannel",
    "acldvppJpegDecodeAsync",
    "acldvppJpegEncodeAsync",
    "acldvppJpegGetImageInfo",
    "acldvppJpegGetImageInfoV2",
    "acldvppJpegPredictEncSize",
    "acldvppJpegPredictDecSize",
    "acldvppPngDecodeAsync",
    "acldvppPngGetImageInfo",
    "acldvppPngPredictDecSize",
    "aclvdecCreateChannel",
    "aclvdecDestroyChannel",
    "aclvdecSendFrame",
    "aclvdecSendSkippedFrame",
    "aclvencCreateChannel",
    "aclvencDestroyChannel",
    "aclvencSendFrame",
    "acldvppVpcResizeAsync",
    "acldvppVpcCropAsync",
    "acldvppVpcCropAndPasteAsync",
    "acldvppVpcConvertColorAsync",
    "acldvppVpcPyrDownAsync",
    "acldvppVpcBatchCropAsync",
    "acldvppVpcBatchCropAndPasteAsync",
    "acldvppVpcEqualizeHistAsync",
    "acldvppVpcMakeBorderAsync",
    "acldvppVpcCalcHistAsync",
    "acldvppVpcCropResizeAsync",
    "acldvppVpcBatchCropResizeAsync",
    "acldvppVpcCropResizePasteAsync",
    "acldvppVpcBatchCropResizePasteAsync",
    "acldvppVpcBatchCropResizeMakeBorderAsync",
    "acltdtEnqueue",
    "acltdtDequeue",
    "acltdtEnqueueData",
    "acltdtDequeueData",
    "acldvppMalloc",
    "acldvppFree",
    "acldvppCreatePicDesc",
    "acldvppDestroyPicDesc",
    "acldvppCreateRoiConfig",
    "acldvppDestroyRoiConfig",
    "acldvppCreateJpegeConfig",
    "acldvppDestroyJpegeConfig",
    "acldvppCreateResizeConfig",
    "acldvppDestroyResizeConfig",
    "acldvppCreateChannelDesc",
    "acldvppDestroyChannelDesc",
    "aclvdecCreateChannelDesc",
    "aclvdecDestroyChannelDesc",
    "acldvppCreateStreamDesc",
    "acldvppDestroyStreamDesc",
    "aclvdecCreateFrameConfig",
    "aclvdecDestroyFrameConfig",
    "aclvencCreateChannelDesc",
    "aclvencDestroyChannelDesc",
    "aclvencCreateFrameConfig",
    "aclvencDestroyFrameConfig",
    "acldvppDestroyBatchPicDesc",
];

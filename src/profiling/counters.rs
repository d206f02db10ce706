//! Apply/release accounting for runtime handles.
//!
//! Each resource kind owns four independent atomic counters. Increments use
//! relaxed ordering: the counters are advisory diagnostics, and a dump is a
//! best-effort snapshot that may interleave with concurrent increments.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Family of runtime handles whose lifecycle is audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    MallocFree,
    MallocFreeHost,
    CreateDestroyContext,
    SetResetDevice,
    CreateDestroyEvent,
    CreateDestroyStream,
    DvppMallocFree,
    RecordResetEvent,
    CreateDestroyDataBuffer,
    CreateDestroyTensorDesc,
    CreateDestroyDesc,
    CreateDestroyDataset,
    CreateLoadUnloadModel,
    CreateDestroyAipp,
    CreateDestroyAttr,
    CreateDestroyHandle,
    CreateDestroyDvppChannelDesc,
    CreateDestroyDvppPicDesc,
    CreateDestroyDvppRoiConfig,
    CreateDestroyDvppResizeConfig,
    CreateDestroyDvppJpegeConfig,
    CreateDestroyVdecChannelDesc,
    CreateDestroyVencChannelDesc,
    CreateDestroyDvppStreamDesc,
    CreateDestroyVdecFrameConfig,
    CreateDestroyVencFrameConfig,
    CreateDestroyDvppChannel,
    CreateDestroyVdecChannel,
    CreateDestroyVencChannel,
    CreateDestroyDvppBatchPicDesc,
    CreateDestroyGroupInfo,
    CreateDestroyProfConfig,
    CreateDestroyProfSubConfig,
    CreateDestroyModelConfig,
    CreateDestroyQueueId,
    CreateDestroyQueueAttr,
    CreateDestroyQueueRoute,
    CreateDestroyQueueRouteList,
    CreateDestroyQueueRouteQuery,
    CreateDestroyMbuf,
    CreateDestroyGraphDumpOption,
    CreateDestroyAllocatorDesc,
    CreateDestroyAllocatorBinaryDesc,
    ReserveReleaseMemoryAddress,
    MallocFreePhysicalMemory,
    MapUnmapMemory,
    LoadUnloadBinary,
}

impl ResourceKind {
    pub const COUNT: usize = 47;

    pub const ALL: [ResourceKind; Self::COUNT] = [
        Self::MallocFree,
        Self::MallocFreeHost,
        Self::CreateDestroyContext,
        Self::SetResetDevice,
        Self::CreateDestroyEvent,
        Self::CreateDestroyStream,
        Self::DvppMallocFree,
        Self::RecordResetEvent,
        Self::CreateDestroyDataBuffer,
        Self::CreateDestroyTensorDesc,
        Self::CreateDestroyDesc,
        Self::CreateDestroyDataset,
        Self::CreateLoadUnloadModel,
        Self::CreateDestroyAipp,
        Self::CreateDestroyAttr,
        Self::CreateDestroyHandle,
        Self::CreateDestroyDvppChannelDesc,
        Self::CreateDestroyDvppPicDesc,
        Self::CreateDestroyDvppRoiConfig,
        Self::CreateDestroyDvppResizeConfig,
        Self::CreateDestroyDvppJpegeConfig,
        Self::CreateDestroyVdecChannelDesc,
        Self::CreateDestroyVencChannelDesc,
        Self::CreateDestroyDvppStreamDesc,
        Self::CreateDestroyVdecFrameConfig,
        Self::CreateDestroyVencFrameConfig,
        Self::CreateDestroyDvppChannel,
        Self::CreateDestroyVdecChannel,
        Self::CreateDestroyVencChannel,
        Self::CreateDestroyDvppBatchPicDesc,
        Self::CreateDestroyGroupInfo,
        Self::CreateDestroyProfConfig,
        Self::CreateDestroyProfSubConfig,
        Self::CreateDestroyModelConfig,
        Self::CreateDestroyQueueId,
        Self::CreateDestroyQueueAttr,
        Self::CreateDestroyQueueRoute,
        Self::CreateDestroyQueueRouteList,
        Self::CreateDestroyQueueRouteQuery,
        Self::CreateDestroyMbuf,
        Self::CreateDestroyGraphDumpOption,
        Self::CreateDestroyAllocatorDesc,
        Self::CreateDestroyAllocatorBinaryDesc,
        Self::ReserveReleaseMemoryAddress,
        Self::MallocFreePhysicalMemory,
        Self::MapUnmapMemory,
        Self::LoadUnloadBinary,
    ];

    /// Snake-case name used in dumps and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MallocFree => "malloc_free",
            Self::MallocFreeHost => "malloc_free_host",
            Self::CreateDestroyContext => "create_destroy_context",
            Self::SetResetDevice => "set_reset_device",
            Self::CreateDestroyEvent => "create_destroy_event",
            Self::CreateDestroyStream => "create_destroy_stream",
            Self::DvppMallocFree => "dvpp_malloc_free",
            Self::RecordResetEvent => "record_reset_event",
            Self::CreateDestroyDataBuffer => "create_destroy_data_buffer",
            Self::CreateDestroyTensorDesc => "create_destroy_tensor_desc",
            Self::CreateDestroyDesc => "create_destroy_desc",
            Self::CreateDestroyDataset => "create_destroy_dataset",
            Self::CreateLoadUnloadModel => "create_load_unload_model",
            Self::CreateDestroyAipp => "create_destroy_aipp",
            Self::CreateDestroyAttr => "create_destroy_attr",
            Self::CreateDestroyHandle => "create_destroy_handle",
            Self::CreateDestroyDvppChannelDesc => "create_destroy_dvpp_channel_desc",
            Self::CreateDestroyDvppPicDesc => "create_destroy_dvpp_pic_desc",
            Self::CreateDestroyDvppRoiConfig => "create_destroy_dvpp_roi_config",
            Self::CreateDestroyDvppResizeConfig => "create_destroy_dvpp_resize_config",
            Self::CreateDestroyDvppJpegeConfig => "create_destroy_dvpp_jpege_config",
            Self::CreateDestroyVdecChannelDesc => "create_destroy_vdec_channel_desc",
            Self::CreateDestroyVencChannelDesc => "create_destroy_venc_channel_desc",
            Self::CreateDestroyDvppStreamDesc => "create_destroy_dvpp_stream_desc",
            Self::CreateDestroyVdecFrameConfig => "create_destroy_vdec_frame_config",
            Self::CreateDestroyVencFrameConfig => "create_destroy_venc_frame_config",
            Self::CreateDestroyDvppChannel => "create_destroy_dvpp_channel",
            Self::CreateDestroyVdecChannel => "create_destroy_vdec_channel",
            Self::CreateDestroyVencChannel => "create_destroy_venc_channel",
            Self::CreateDestroyDvppBatchPicDesc => "create_destroy_dvpp_batch_pic_desc",
            Self::CreateDestroyGroupInfo => "create_destroy_group_info",
            Self::CreateDestroyProfConfig => "create_destroy_prof_config",
            Self::CreateDestroyProfSubConfig => "create_destroy_prof_sub_config",
            Self::CreateDestroyModelConfig => "create_destroy_model_config",
            Self::CreateDestroyQueueId => "create_destroy_queue_id",
            Self::CreateDestroyQueueAttr => "create_destroy_queue_attr",
            Self::CreateDestroyQueueRoute => "create_destroy_queue_route",
            Self::CreateDestroyQueueRouteList => "create_destroy_queue_route_list",
            Self::CreateDestroyQueueRouteQuery => "create_destroy_queue_route_query",
            Self::CreateDestroyMbuf => "create_destroy_mbuf",
            Self::CreateDestroyGraphDumpOption => "create_destroy_graph_dump_option",
            Self::CreateDestroyAllocatorDesc => "create_destroy_allocator_desc",
            Self::CreateDestroyAllocatorBinaryDesc => "create_destroy_allocator_binary_desc",
            Self::ReserveReleaseMemoryAddress => "reserve_release_memory_address",
            Self::MallocFreePhysicalMemory => "malloc_free_physical_memory",
            Self::MapUnmapMemory => "map_unmap_memory",
            Self::LoadUnloadBinary => "load_unload_binary",
        }
    }
}

/// Which of the four counters of a kind to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterOp {
    ApplyTotal,
    ApplySuccess,
    ReleaseTotal,
    ReleaseSuccess,
}

impl CounterOp {
    pub const ALL: [CounterOp; 4] = [
        Self::ApplyTotal,
        Self::ApplySuccess,
        Self::ReleaseTotal,
        Self::ReleaseSuccess,
    ];
}

#[derive(Debug, Default)]
struct CounterCell {
    values: [AtomicU64; 4],
}

impl CounterCell {
    fn reset(&self) {
        for v in &self.values {
            v.store(0, Ordering::Relaxed);
        }
    }
}

/// Counter values of one kind at dump time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub kind: ResourceKind,
    pub apply_total: u64,
    pub apply_success: u64,
    pub release_total: u64,
    pub release_success: u64,
}

impl ResourceSnapshot {
    /// Successfully applied handles not yet successfully released.
    pub fn leaked(&self) -> u64 {
        self.apply_success.saturating_sub(self.release_success)
    }

    pub fn is_idle(&self) -> bool {
        self.apply_total == 0 && self.release_total == 0
    }
}

/// Fixed-size counter table indexed by [`ResourceKind`].
#[derive(Debug)]
pub struct ResourceStatistics {
    cells: [CounterCell; ResourceKind::COUNT],
}

impl Default for ResourceStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceStatistics {
    pub fn new() -> Self {
        Self {
            cells: std::array::from_fn(|_| CounterCell::default()),
        }
    }

    #[inline]
    pub fn add(&self, kind: ResourceKind, op: CounterOp) {
        self.cells[kind as usize].values[op as usize].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_apply_total(&self, kind: ResourceKind) {
        self.add(kind, CounterOp::ApplyTotal);
    }

    #[inline]
    pub fn add_apply_success(&self, kind: ResourceKind) {
        self.add(kind, CounterOp::ApplySuccess);
    }

    #[inline]
    pub fn add_release_total(&self, kind: ResourceKind) {
        self.add(kind, CounterOp::ReleaseTotal);
    }

    #[inline]
    pub fn add_release_success(&self, kind: ResourceKind) {
        self.add(kind, CounterOp::ReleaseSuccess);
    }

    pub fn get(&self, kind: ResourceKind, op: CounterOp) -> u64 {
        self.cells[kind as usize].values[op as usize].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, kind: ResourceKind) -> ResourceSnapshot {
        ResourceSnapshot {
            kind,
            apply_total: self.get(kind, CounterOp::ApplyTotal),
            apply_success: self.get(kind, CounterOp::ApplySuccess),
            release_total: self.get(kind, CounterOp::ReleaseTotal),
            release_success: self.get(kind, CounterOp::ReleaseSuccess),
        }
    }

    /// Snapshot of every kind, in table order. Not atomic across cells.
    pub fn dump(&self) -> Vec<ResourceSnapshot> {
        ResourceKind::ALL.iter().map(|k| self.snapshot(*k)).collect()
    }

    /// Log every kind that has seen any traffic.
    pub fn traverse(&self) {
        for s in self.dump().into_iter().filter(|s| !s.is_idle()) {
            log::info!(
                "resource {}: apply {}/{}, release {}/{}",
                s.kind.name(),
                s.apply_success,
                s.apply_total,
                s.release_success,
                s.release_total,
            );
        }
    }

    /// Zero every counter.
    pub fn reset(&self) {
        for cell in &self.cells {
            cell.reset();
        }
    }

    pub fn to_json(&self) -> String {
        let active: Vec<ResourceSnapshot> =
            self.dump().into_iter().filter(|s| !s.is_idle()).collect();
        serde_json::to_string_pretty(&active).unwrap_or_else(|_| "[]".to_string())
    }

    /// Format the non-idle kinds as a table.
    pub fn summary_string(&self) -> String {
        let mut s = String::with_capacity(1024);
        s.push_str(&format!(
            " {:<44} {:>10} {:>10} {:>10} {:>10} {:>8}\n",
            "Resource", "ApplyTot", "ApplyOk", "RelTot", "RelOk", "Leaked"
        ));
        s.push_str(&format!("{:-<98}\n", ""));
        for e in self.dump().into_iter().filter(|s| !s.is_idle()) {
            s.push_str(&format!(
                " {:<44} {:>10} {:>10} {:>10} {:>10} {:>8}\n",
                e.kind.name(),
                e.apply_total,
                e.apply_success,
                e.release_total,
                e.release_success,
                e.leaked(),
            ));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_are_independent() {
        let stats = ResourceStatistics::new();
        stats.add_apply_total(ResourceKind::CreateDestroyStream);
        stats.add_apply_total(ResourceKind::CreateDestroyStream);
        stats.add_apply_success(ResourceKind::CreateDestroyStream);
        stats.add_release_total(ResourceKind::MallocFree);

        let stream = stats.snapshot(ResourceKind::CreateDestroyStream);
        assert_eq!(stream.apply_total, 2);
        assert_eq!(stream.apply_success, 1);
        assert_eq!(stream.release_total, 0);
        assert_eq!(stats.get(ResourceKind::MallocFree, CounterOp::ReleaseTotal), 1);
        assert_eq!(stats.get(ResourceKind::MallocFree, CounterOp::ApplyTotal), 0);
    }

    #[test]
    fn test_dump_covers_all_kinds() {
        let stats = ResourceStatistics::new();
        stats.add_apply_success(ResourceKind::LoadUnloadBinary);
        let dump = stats.dump();
        assert_eq!(dump.len(), ResourceKind::COUNT);
        assert_eq!(dump.last().unwrap().kind, ResourceKind::LoadUnloadBinary);
        assert_eq!(dump.last().unwrap().apply_success, 1);
        assert!(dump[0].is_idle());
    }

    #[test]
    fn test_leaked_and_reset() {
        let stats = ResourceStatistics::new();
        for _ in 0..3 {
            stats.add_apply_success(ResourceKind::CreateLoadUnloadModel);
        }
        stats.add_release_success(ResourceKind::CreateLoadUnloadModel);
        assert_eq!(stats.snapshot(ResourceKind::CreateLoadUnloadModel).leaked(), 2);

        stats.reset();
        assert!(stats.dump().iter().all(|s| s.is_idle() && s.leaked() == 0));
    }

    #[test]
    fn test_concurrent_increments_are_exact() {
        let stats = Arc::new(ResourceStatistics::new());
        let threads = 8;
        let per_thread = 10_000;
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..per_thread {
                        stats.add_apply_total(ResourceKind::CreateDestroyEvent);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(
            stats.get(ResourceKind::CreateDestroyEvent, CounterOp::ApplyTotal),
            (threads * per_thread) as u64
        );
    }

    #[test]
    fn test_summary_and_json_skip_idle_kinds() {
        let stats = ResourceStatistics::new();
        stats.add_apply_total(ResourceKind::CreateDestroyContext);
        let summary = stats.summary_string();
        assert!(summary.contains("create_destroy_context"));
        assert!(!summary.contains("malloc_free_host"));

        let json = stats.to_json();
        assert!(json.contains("\"kind\": \"create_destroy_context\""));
        assert!(!json.contains("malloc_free_host"));
    }
}

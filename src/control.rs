//! Profiling switch commands: decoding the raw command buffer and driving the
//! manager's start/stop and device bookkeeping from it.
//!
//! Command layout, little endian:
//!
//! | offset | field            | type        |
//! |--------|------------------|-------------|
//! | 0      | `prof_switch`    | `u64`       |
//! | 8      | `prof_switch_hi` | `u64`       |
//! | 16     | `dev_nums`       | `u32`       |
//! | 20     | `dev_id_list`    | `[u32; 64]` |
//! | 276    | `model_id`       | `u32`       |
//! | 280    | `type`           | `u32`       |

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::backend::{CtrlInitMode, STATUS_OK};
use crate::config::ProfilingConfig;
use crate::error::{ProfError, ProfResult};
use crate::profiling::ProfilingManager;

/// Control data type carrying a switch command.
pub const RT_PROF_CTRL_SWITCH: u32 = 1;
/// Switch bit selecting api-level profiling; other bits are ignored.
pub const ACL_PROF_ACL_API: u64 = 0x0001;
pub const START_PROFILING: u32 = 1;
pub const STOP_PROFILING: u32 = 2;
pub const MAX_DEV_NUM: usize = 64;
/// Encoded size of a command.
pub const COMMAND_LEN: usize = 8 + 8 + 4 + 4 * MAX_DEV_NUM + 4 + 4;

const DEV_LIST_OFFSET: usize = 20;
const MODEL_ID_OFFSET: usize = DEV_LIST_OFFSET + 4 * MAX_DEV_NUM;
const TYPE_OFFSET: usize = MODEL_ID_OFFSET + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    Start,
    Stop,
}

/// Decoded profiling switch command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfCommand {
    pub prof_switch: u64,
    pub prof_switch_hi: u64,
    pub dev_nums: u32,
    pub dev_id_list: Vec<u32>,
    pub model_id: u32,
    pub command: u32,
}

impl ProfCommand {
    pub fn start(devices: &[u32]) -> Self {
        Self::api_switch(START_PROFILING, devices)
    }

    pub fn stop(devices: &[u32]) -> Self {
        Self::api_switch(STOP_PROFILING, devices)
    }

    fn api_switch(command: u32, devices: &[u32]) -> Self {
        Self {
            prof_switch: ACL_PROF_ACL_API,
            prof_switch_hi: 0,
            dev_nums: devices.len() as u32,
            dev_id_list: devices.to_vec(),
            model_id: 0,
            command,
        }
    }

    pub fn kind(&self) -> Option<CommandKind> {
        match self.command {
            START_PROFILING => Some(CommandKind::Start),
            STOP_PROFILING => Some(CommandKind::Stop),
            _ => None,
        }
    }

    pub fn is_api_switch(&self) -> bool {
        self.prof_switch & ACL_PROF_ACL_API != 0
    }

    /// The `dev_nums` leading ids of the list.
    pub fn devices(&self) -> ProfResult<&[u32]> {
        let n = self.dev_nums as usize;
        if n > MAX_DEV_NUM || n > self.dev_id_list.len() {
            return Err(ProfError::InvalidArgument(format!(
                "dev_nums {n} exceeds device list of {} entries",
                self.dev_id_list.len().min(MAX_DEV_NUM)
            )));
        }
        Ok(&self.dev_id_list[..n])
    }

    pub fn decode(data: &[u8]) -> ProfResult<Self> {
        if data.len() < COMMAND_LEN {
            return Err(ProfError::InvalidArgument(format!(
                "command len {} is smaller than {COMMAND_LEN}",
                data.len()
            )));
        }
        let dev_nums = read_u32(data, 16)?;
        if dev_nums as usize > MAX_DEV_NUM {
            return Err(ProfError::InvalidArgument(format!(
                "dev_nums {dev_nums} exceeds {MAX_DEV_NUM}"
            )));
        }
        let dev_id_list = (0..dev_nums as usize)
            .map(|i| read_u32(data, DEV_LIST_OFFSET + 4 * i))
            .collect::<ProfResult<Vec<u32>>>()?;
        Ok(Self {
            prof_switch: read_u64(data, 0)?,
            prof_switch_hi: read_u64(data, 8)?,
            dev_nums,
            dev_id_list,
            model_id: read_u32(data, MODEL_ID_OFFSET)?,
            command: read_u32(data, TYPE_OFFSET)?,
        })
    }

    /// Encode to the fixed layout. Ids past `MAX_DEV_NUM` are dropped.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; COMMAND_LEN];
        out[0..8].copy_from_slice(&self.prof_switch.to_le_bytes());
        out[8..16].copy_from_slice(&self.prof_switch_hi.to_le_bytes());
        out[16..20].copy_from_slice(&self.dev_nums.to_le_bytes());
        for (i, id) in self.dev_id_list.iter().take(MAX_DEV_NUM).enumerate() {
            let off = DEV_LIST_OFFSET + 4 * i;
            out[off..off + 4].copy_from_slice(&id.to_le_bytes());
        }
        out[MODEL_ID_OFFSET..MODEL_ID_OFFSET + 4].copy_from_slice(&self.model_id.to_le_bytes());
        out[TYPE_OFFSET..TYPE_OFFSET + 4].copy_from_slice(&self.command.to_le_bytes());
        out
    }
}

fn read_u32(data: &[u8], off: usize) -> ProfResult<u32> {
    data.get(off..off + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| ProfError::InvalidArgument(format!("truncated command at offset {off}")))
}

fn read_u64(data: &[u8], off: usize) -> ProfResult<u64> {
    data.get(off..off + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| ProfError::InvalidArgument(format!("truncated command at offset {off}")))
}

/// Entry point the runtime's profiling callback forwards to.
pub struct ProfilingControl {
    manager: Arc<ProfilingManager>,
    serial: Mutex<()>,
}

impl ProfilingControl {
    pub fn new(manager: Arc<ProfilingManager>) -> Self {
        Self {
            manager,
            serial: Mutex::new(()),
        }
    }

    pub fn manager(&self) -> &Arc<ProfilingManager> {
        &self.manager
    }

    /// Handle one control message. Types other than a switch are ignored.
    pub fn handle(&self, data_type: u32, data: &[u8]) -> ProfResult<()> {
        if data_type != RT_PROF_CTRL_SWITCH {
            log::info!("ignoring unsupported profiling control type {data_type}");
            return Ok(());
        }
        let command = ProfCommand::decode(data)?;
        self.process(&command).map_err(|e| {
            log::error!("processing profiling switch failed: {e}");
            e
        })
    }

    /// Apply a decoded command. Only api-level start/stop is acted on; for
    /// those an invalid device list is rejected before any state changes.
    pub fn process(&self, command: &ProfCommand) -> ProfResult<()> {
        let _serial = self.serial.lock().unwrap_or_else(|p| p.into_inner());
        if !command.is_api_switch() {
            return Ok(());
        }
        match command.kind() {
            Some(CommandKind::Start) => self.inner_start(command.devices()?),
            Some(CommandKind::Stop) => self.inner_stop(command.devices()?),
            None => Ok(()),
        }
    }

    fn inner_start(&self, devices: &[u32]) -> ProfResult<()> {
        log::debug!("profiling start for devices {devices:?}");
        if !self.manager.is_running() {
            self.manager.start()?;
        }
        self.manager.add_devices(devices);
        Ok(())
    }

    fn inner_stop(&self, devices: &[u32]) -> ProfResult<()> {
        log::debug!("profiling stop for devices {devices:?}");
        if !self.manager.is_device_set_empty() {
            self.manager.remove_devices(devices);
        }
        if self.manager.is_device_set_empty() && self.manager.is_running() {
            self.manager.stop()?;
        }
        Ok(())
    }

    /// Hand the resolved configuration to the engine.
    ///
    /// Without a static config a failure is only logged; a rejected JSON or
    /// environment config is an invalid argument.
    pub fn apply_config(&self, config: &ProfilingConfig) -> ProfResult<()> {
        let code = self.manager.backend().ctrl_init(config.mode, &config.payload);
        if code == STATUS_OK {
            log::info!("profiling config applied in {:?} mode", config.mode);
            return Ok(());
        }
        match config.mode {
            CtrlInitMode::Dynamic => {
                log::error!("init profiling without config failed, status {code}");
                Ok(())
            }
            mode => Err(ProfError::InvalidArgument(format!(
                "profiling rejected {mode:?} config, status {code}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, MemoryBackend};

    fn control() -> (Arc<MemoryBackend>, ProfilingControl) {
        let backend = Arc::new(MemoryBackend::new());
        let manager = Arc::new(ProfilingManager::new(backend.clone()));
        (backend, ProfilingControl::new(manager))
    }

    #[test]
    fn test_command_layout() {
        let cmd = ProfCommand::start(&[2, 5]);
        let bytes = cmd.to_bytes();
        assert_eq!(bytes.len(), COMMAND_LEN);
        assert_eq!(&bytes[16..20], &2u32.to_le_bytes());
        assert_eq!(&bytes[24..28], &5u32.to_le_bytes());
        assert_eq!(&bytes[TYPE_OFFSET..], &START_PROFILING.to_le_bytes());
        assert_eq!(ProfCommand::decode(&bytes).unwrap(), cmd);
    }

    #[test]
    fn test_decode_rejects_short_buffer() {
        let bytes = ProfCommand::start(&[0]).to_bytes();
        let err = ProfCommand::decode(&bytes[..COMMAND_LEN - 1]).unwrap_err();
        assert!(matches!(err, ProfError::InvalidArgument(_)));
    }

    #[test]
    fn test_decode_rejects_oversized_dev_nums() {
        let mut bytes = ProfCommand::start(&[]).to_bytes();
        bytes[16..20].copy_from_slice(&65u32.to_le_bytes());
        assert!(matches!(ProfCommand::decode(&bytes), Err(ProfError::InvalidArgument(_))));
    }

    #[test]
    fn test_missing_device_list_rejected_before_mutation() {
        let (backend, control) = control();
        let mut cmd = ProfCommand::start(&[]);
        cmd.dev_nums = 2;
        assert!(matches!(control.process(&cmd), Err(ProfError::InvalidArgument(_))));
        assert!(backend.calls().is_empty());
        assert!(!control.manager().is_running());
    }

    #[test]
    fn test_start_then_stop_via_switch() {
        let (backend, control) = control();
        control.handle(RT_PROF_CTRL_SWITCH, &ProfCommand::start(&[5]).to_bytes()).unwrap();
        assert!(control.manager().is_running());
        assert_eq!(control.manager().devices(), vec![5]);

        control.handle(RT_PROF_CTRL_SWITCH, &ProfCommand::stop(&[5]).to_bytes()).unwrap();
        assert!(!control.manager().is_running());
        assert!(control.manager().is_device_set_empty());
        assert_eq!(backend.count(|c| *c == BackendCall::Init), 1);
        assert_eq!(backend.count(|c| *c == BackendCall::Uninit), 1);
    }

    #[test]
    fn test_second_start_only_adds_devices() {
        let (backend, control) = control();
        control.process(&ProfCommand::start(&[0])).unwrap();
        control.process(&ProfCommand::start(&[1])).unwrap();
        assert_eq!(backend.count(|c| *c == BackendCall::Init), 1);

        control.process(&ProfCommand::stop(&[0])).unwrap();
        assert!(control.manager().is_running());
        control.process(&ProfCommand::stop(&[1])).unwrap();
        assert!(!control.manager().is_running());
    }

    #[test]
    fn test_other_switch_bits_ignored() {
        let (backend, control) = control();
        let mut cmd = ProfCommand::start(&[1]);
        cmd.prof_switch = 0x0002;
        control.process(&cmd).unwrap();
        assert!(backend.calls().is_empty());
        assert!(control.manager().is_device_set_empty());

        // the device list is only checked for commands that use it
        let stray = ProfCommand {
            prof_switch: 0x0002,
            prof_switch_hi: 0,
            dev_nums: 3,
            dev_id_list: Vec::new(),
            model_id: 0,
            command: START_PROFILING,
        };
        control.process(&stray).unwrap();
        let unknown = ProfCommand {
            prof_switch: ACL_PROF_ACL_API,
            command: 9,
            ..stray
        };
        control.process(&unknown).unwrap();
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_unsupported_data_type_ignored() {
        let (backend, control) = control();
        control.handle(2, &[]).unwrap();
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_start_failure_propagates_without_devices() {
        let (backend, control) = control();
        backend.fail_init(-1);
        let err = control.process(&ProfCommand::start(&[3])).unwrap_err();
        assert!(matches!(err, ProfError::BackendInit { code: -1 }));
        assert!(control.manager().is_device_set_empty());
    }

    #[test]
    fn test_stop_failure_keeps_running() {
        let (backend, control) = control();
        control.process(&ProfCommand::start(&[3])).unwrap();
        backend.fail_uninit(-8);
        let err = control.process(&ProfCommand::stop(&[3])).unwrap_err();
        assert!(matches!(err, ProfError::BackendUninit { code: -8 }));
        assert!(control.manager().is_running());
        assert!(control.manager().is_device_set_empty());
    }

    #[test]
    fn test_apply_config_modes() {
        let (backend, control) = control();
        backend.fail_ctrl_init(-1);
        control.apply_config(&ProfilingConfig::dynamic()).unwrap();
        let env = ProfilingConfig {
            mode: CtrlInitMode::EnvConfig,
            payload: "{\"output\":\"/tmp\"}".to_string(),
        };
        assert!(matches!(control.apply_config(&env), Err(ProfError::InvalidArgument(_))));
        backend.heal();
        control.apply_config(&env).unwrap();
    }
}

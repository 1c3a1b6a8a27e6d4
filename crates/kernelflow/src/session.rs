//! Session-scoped resources, owned by an explicit context instead of process globals.
//!
//! A [`SessionContext`] is created empty, initialized once from a [`SessionConfig`] and
//! torn down explicitly. Accessing its resources outside that window is an error.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::sbp::{DeviceType, ParallelDesc};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session is not initialized")]
    NotInitialized,

    #[error("invalid session config: {reason}")]
    InvalidConfig { reason: String },

    #[error("session has no {device} devices")]
    NoDevices { device: DeviceType },

    #[error("no buffer named `{name}`")]
    UnknownBuffer { name: String },

    #[error("buffer `{name}` already exists")]
    DuplicateBuffer { name: String },

    #[error("buffer `{name}` is full (capacity {capacity})")]
    BufferFull { name: String, capacity: usize },
}

/// Device counts derived at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDesc {
    pub gpu_device_num: usize,
    /// Host-side devices: one per GPU, or one per process in a CPU-only session.
    pub cpu_device_num: usize,
    pub process_num: usize,
}

impl ResourceDesc {
    pub fn device_num(&self, device: DeviceType) -> usize {
        match device {
            DeviceType::Cpu => self.cpu_device_num,
            DeviceType::Gpu => self.gpu_device_num,
        }
    }

    fn from_config(config: &SessionConfig) -> Result<Self, SessionError> {
        if config.process_num == 0 {
            return Err(SessionError::InvalidConfig {
                reason: "process_num must be at least 1".to_string(),
            });
        }
        if config.buffer_capacity == 0 {
            return Err(SessionError::InvalidConfig {
                reason: "buffer_capacity must be at least 1".to_string(),
            });
        }
        let cpu_device_num = if config.gpu_device_num == 0 {
            config.process_num
        } else {
            config.gpu_device_num
        };
        Ok(ResourceDesc {
            gpu_device_num: config.gpu_device_num,
            cpu_device_num,
            process_num: config.process_num,
        })
    }
}

/// Monotonic id allocation for ops, blobs and register descriptors.
#[derive(Debug, Default)]
pub struct IdManager {
    next_op_id: AtomicU64,
    next_blob_id: AtomicU64,
    next_regst_desc_id: AtomicU64,
}

impl IdManager {
    pub fn new_op_id(&self) -> u64 {
        self.next_op_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn new_blob_id(&self) -> u64 {
        self.next_blob_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn new_regst_desc_id(&self) -> u64 {
        self.next_regst_desc_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// One pending run of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInstance {
    pub job_name: String,
    pub piece_id: u64,
}

/// Named bounded FIFO queues of job instances.
#[derive(Debug)]
pub struct BufferManager {
    capacity: usize,
    buffers: Mutex<HashMap<String, VecDeque<JobInstance>>>,
}

impl BufferManager {
    fn new(capacity: usize) -> Self {
        BufferManager {
            capacity,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    pub fn new_buffer(&self, name: impl Into<String>) -> Result<(), SessionError> {
        let name = name.into();
        let mut buffers = self.buffers.lock().expect("buffer manager poisoned");
        if buffers.contains_key(&name) {
            return Err(SessionError::DuplicateBuffer { name });
        }
        buffers.insert(name, VecDeque::with_capacity(self.capacity));
        Ok(())
    }

    pub fn push(&self, name: &str, instance: JobInstance) -> Result<(), SessionError> {
        let mut buffers = self.buffers.lock().expect("buffer manager poisoned");
        let queue = buffers
            .get_mut(name)
            .ok_or_else(|| SessionError::UnknownBuffer {
                name: name.to_string(),
            })?;
        if queue.len() >= self.capacity {
            return Err(SessionError::BufferFull {
                name: name.to_string(),
                capacity: self.capacity,
            });
        }
        queue.push_back(instance);
        Ok(())
    }

    pub fn pop(&self, name: &str) -> Result<Option<JobInstance>, SessionError> {
        let mut buffers = self.buffers.lock().expect("buffer manager poisoned");
        let queue = buffers
            .get_mut(name)
            .ok_or_else(|| SessionError::UnknownBuffer {
                name: name.to_string(),
            })?;
        Ok(queue.pop_front())
    }

    pub fn len(&self, name: &str) -> Result<usize, SessionError> {
        let buffers = self.buffers.lock().expect("buffer manager poisoned");
        buffers
            .get(name)
            .map(VecDeque::len)
            .ok_or_else(|| SessionError::UnknownBuffer {
                name: name.to_string(),
            })
    }
}

#[derive(Debug)]
struct SessionState {
    resource: ResourceDesc,
    ids: IdManager,
    buffers: BufferManager,
}

#[derive(Debug, Default)]
pub struct SessionContext {
    state: Option<SessionState>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initializes session resources. A second call on an initialized session is a no-op.
    pub fn try_init(&mut self, config: &SessionConfig) -> Result<(), SessionError> {
        if self.state.is_some() {
            debug!("session already initialized");
            return Ok(());
        }
        let resource = ResourceDesc::from_config(config)?;
        info!(
            gpu_device_num = resource.gpu_device_num,
            cpu_device_num = resource.cpu_device_num,
            process_num = resource.process_num,
            "session initialized"
        );
        self.state = Some(SessionState {
            resource,
            ids: IdManager::default(),
            buffers: BufferManager::new(config.buffer_capacity),
        });
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    fn state(&self) -> Result<&SessionState, SessionError> {
        self.state.as_ref().ok_or(SessionError::NotInitialized)
    }

    pub fn resource(&self) -> Result<&ResourceDesc, SessionError> {
        Ok(&self.state()?.resource)
    }

    /// Placement spanning every device of `device` type in the session.
    pub fn parallel_desc(&self, device: DeviceType) -> Result<ParallelDesc, SessionError> {
        match self.resource()?.device_num(device) {
            0 => Err(SessionError::NoDevices { device }),
            parallel_num => Ok(ParallelDesc::new(device, parallel_num)),
        }
    }

    pub fn id_manager(&self) -> Result<&IdManager, SessionError> {
        Ok(&self.state()?.ids)
    }

    pub fn buffer_manager(&self) -> Result<&BufferManager, SessionError> {
        Ok(&self.state()?.buffers)
    }

    /// Releases session resources, buffers first. Tearing down an uninitialized
    /// session does nothing.
    pub fn teardown(&mut self) {
        if let Some(state) = self.state.take() {
            let SessionState {
                resource,
                ids,
                buffers,
            } = state;
            drop(buffers);
            drop(ids);
            info!(process_num = resource.process_num, "session torn down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_only_session_uses_one_device_per_process() {
        let mut session = SessionContext::new();
        session
            .try_init(&SessionConfig {
                process_num: 4,
                ..SessionConfig::default()
            })
            .unwrap();
        let resource = session.resource().unwrap();
        assert_eq!(resource.cpu_device_num, 4);
        assert_eq!(resource.gpu_device_num, 0);
    }

    #[test]
    fn gpu_session_pairs_host_devices_with_gpus() {
        let mut session = SessionContext::new();
        session
            .try_init(&SessionConfig {
                gpu_device_num: 2,
                process_num: 8,
                ..SessionConfig::default()
            })
            .unwrap();
        assert_eq!(session.resource().unwrap().cpu_device_num, 2);
    }

    #[test]
    fn try_init_is_idempotent() {
        let mut session = SessionContext::new();
        session.try_init(&SessionConfig::default()).unwrap();
        let first = session.id_manager().unwrap().new_op_id();
        session
            .try_init(&SessionConfig {
                process_num: 9,
                ..SessionConfig::default()
            })
            .unwrap();
        assert_eq!(session.resource().unwrap().process_num, 1);
        assert_eq!(session.id_manager().unwrap().new_op_id(), first + 1);
    }

    #[test]
    fn use_after_teardown_fails() {
        let mut session = SessionContext::new();
        assert_eq!(session.resource().unwrap_err(), SessionError::NotInitialized);
        session.try_init(&SessionConfig::default()).unwrap();
        session.teardown();
        assert!(!session.is_initialized());
        assert!(matches!(
            session.buffer_manager(),
            Err(SessionError::NotInitialized)
        ));
    }

    #[test]
    fn buffers_are_bounded_fifo_queues() {
        let mut session = SessionContext::new();
        session
            .try_init(&SessionConfig {
                buffer_capacity: 1,
                ..SessionConfig::default()
            })
            .unwrap();
        let buffers = session.buffer_manager().unwrap();
        buffers.new_buffer("train").unwrap();
        let instance = JobInstance {
            job_name: "train".to_string(),
            piece_id: 0,
        };
        buffers.push("train", instance.clone()).unwrap();
        assert!(matches!(
            buffers.push("train", instance.clone()),
            Err(SessionError::BufferFull { capacity: 1, .. })
        ));
        assert_eq!(buffers.pop("train").unwrap(), Some(instance));
        assert_eq!(buffers.len("train").unwrap(), 0);
        assert!(matches!(
            buffers.pop("eval"),
            Err(SessionError::UnknownBuffer { .. })
        ));
    }

    #[test]
    fn zero_processes_is_rejected() {
        let mut session = SessionContext::new();
        let err = session
            .try_init(&SessionConfig {
                process_num: 0,
                ..SessionConfig::default()
            })
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig { .. }));
        assert!(!session.is_initialized());
    }

    #[test]
    fn zero_buffer_capacity_is_rejected() {
        let mut session = SessionContext::new();
        let err = session
            .try_init(&SessionConfig {
                buffer_capacity: 0,
                ..SessionConfig::default()
            })
            .unwrap_err();
        assert!(err.to_string().contains("buffer_capacity"));
        assert!(!session.is_initialized());
    }

    #[test]
    fn placements_span_the_session_devices() {
        let mut session = SessionContext::new();
        assert_eq!(
            session.parallel_desc(DeviceType::Cpu).unwrap_err(),
            SessionError::NotInitialized
        );
        session
            .try_init(&SessionConfig {
                process_num: 3,
                ..SessionConfig::default()
            })
            .unwrap();
        assert_eq!(
            session.parallel_desc(DeviceType::Cpu).unwrap(),
            ParallelDesc::cpu(3)
        );
        assert_eq!(
            session.parallel_desc(DeviceType::Gpu).unwrap_err(),
            SessionError::NoDevices {
                device: DeviceType::Gpu
            }
        );
    }
}

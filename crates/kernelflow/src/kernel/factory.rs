//! Kernel registry: `(op type, device)` to a factory for the compute body.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use tracing::debug;

use super::conf::KernelConf;
use super::error::KernelError;
use super::kernel::{Kernel, KernelCompute};
use crate::config::JobConfig;
use crate::error::ConfigError;
use crate::op::{op_def, validate_conf};
use crate::sbp::DeviceType;

/// Builds the compute body for one node.
pub type KernelFactory = fn(&KernelConf) -> Box<dyn KernelCompute>;

struct KernelRegistry {
    factories: RwLock<HashMap<(String, DeviceType), KernelFactory>>,
}

impl KernelRegistry {
    fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }
}

static GLOBAL_REGISTRY: OnceLock<KernelRegistry> = OnceLock::new();

fn global_registry() -> &'static KernelRegistry {
    GLOBAL_REGISTRY.get_or_init(KernelRegistry::new)
}

pub fn register_kernel(
    op_type: impl Into<String>,
    device: DeviceType,
    factory: KernelFactory,
) -> Result<(), ConfigError> {
    let op_type = op_type.into();
    let mut factories = global_registry()
        .factories
        .write()
        .expect("kernel registry poisoned");
    let key = (op_type, device);
    if factories.contains_key(&key) {
        return Err(ConfigError::DuplicateKernel {
            op_type: key.0,
            device,
        });
    }
    debug!(op_type = %key.0, %device, "registered kernel");
    factories.insert(key, factory);
    Ok(())
}

pub fn lookup_kernel(op_type: &str, device: DeviceType) -> Option<KernelFactory> {
    global_registry()
        .factories
        .read()
        .expect("kernel registry poisoned")
        .get(&(op_type.to_string(), device))
        .copied()
}

pub fn has_kernel(op_type: &str, device: DeviceType) -> bool {
    lookup_kernel(op_type, device).is_some()
}

/// Resolves the node's descriptor and kernel factory, then builds and initializes it.
///
/// Fails with a configuration error when the op type is unset or unknown, when no
/// kernel is registered for the node's device, or when a declared argument lacks a
/// blob binding.
pub fn construct_kernel(job: Arc<JobConfig>, mut conf: KernelConf) -> Result<Kernel, KernelError> {
    let op_type = conf
        .op_conf
        .op_type()
        .ok_or_else(|| ConfigError::OpTypeUnset {
            op: conf.op_conf.name.clone(),
        })?
        .to_string();
    let def = op_def(&op_type)?;
    validate_conf(&def, &conf.op_conf)?;
    let device = conf.op_conf.device_type;
    let factory = lookup_kernel(&op_type, device).ok_or(ConfigError::UnknownKernel {
        op_type: op_type.clone(),
        device,
    })?;
    conf.apply_output_modifiers(&def);

    let mut kernel = Kernel::new(def, factory(&conf));
    kernel.init(job, conf)?;
    Ok(kernel)
}

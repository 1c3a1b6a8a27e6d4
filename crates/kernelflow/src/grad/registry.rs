use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use tracing::debug;

use super::error::GradError;
use super::wrapper::UserOpWrapper;
use crate::error::ConfigError;
use crate::op::OperatorConf;

/// Emits the backward ops of one forward op through `add_op` and binds input gradients
/// on the wrapper.
pub type GenBackwardFn =
    fn(&mut UserOpWrapper<'_>, &mut dyn FnMut(OperatorConf)) -> Result<(), GradError>;

static GRAD_REGISTRY: OnceLock<RwLock<HashMap<String, GenBackwardFn>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<String, GenBackwardFn>> {
    GRAD_REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

pub fn register_grad(op_type: impl Into<String>, generator: GenBackwardFn) -> Result<(), ConfigError> {
    let op_type = op_type.into();
    let mut generators = registry().write().expect("grad registry poisoned");
    if generators.contains_key(&op_type) {
        return Err(ConfigError::DuplicateGrad { op_type });
    }
    debug!(%op_type, "registered backward generator");
    generators.insert(op_type, generator);
    Ok(())
}

pub fn lookup_grad(op_type: &str) -> Option<GenBackwardFn> {
    registry()
        .read()
        .expect("grad registry poisoned")
        .get(op_type)
        .copied()
}

pub fn has_grad(op_type: &str) -> bool {
    lookup_grad(op_type).is_some()
}

//! Process-wide operator registry.
//!
//! Descriptors are registered once per op type, either explicitly through
//! [`register_op`] or from registrar functions collected in [`REGISTRARS`], and are
//! immutable afterwards. Every other registry in the crate (kernels, backward
//! generators) is populated by the same registrars.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use tracing::debug;

use super::def::OpDef;
use crate::error::ConfigError;

/// Registrar functions run once by [`ensure_registered`].
///
/// Operator libraries add entries with
/// `#[kernelflow::linkme::distributed_slice(kernelflow::op::registry::REGISTRARS)]`.
#[linkme::distributed_slice]
pub static REGISTRARS: [fn() -> Result<(), ConfigError>] = [..];

struct OpRegistry {
    defs: RwLock<HashMap<String, Arc<OpDef>>>,
}

impl OpRegistry {
    fn new() -> Self {
        Self {
            defs: RwLock::new(HashMap::new()),
        }
    }

    fn register(&self, def: OpDef) -> Result<(), ConfigError> {
        let mut defs = self.defs.write().expect("op registry poisoned");
        if defs.contains_key(def.op_type()) {
            return Err(ConfigError::DuplicateOp {
                op_type: def.op_type().to_string(),
            });
        }
        debug!(op_type = %def.op_type(), "registered op");
        defs.insert(def.op_type().to_string(), Arc::new(def));
        Ok(())
    }

    fn lookup(&self, op_type: &str) -> Option<Arc<OpDef>> {
        self.defs
            .read()
            .expect("op registry poisoned")
            .get(op_type)
            .cloned()
    }

    fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .defs
            .read()
            .expect("op registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

static GLOBAL_REGISTRY: OnceLock<OpRegistry> = OnceLock::new();

fn global_registry() -> &'static OpRegistry {
    GLOBAL_REGISTRY.get_or_init(OpRegistry::new)
}

/// Registers a descriptor. Re-registering an op type is a configuration error.
pub fn register_op(def: OpDef) -> Result<(), ConfigError> {
    global_registry().register(def)
}

pub fn lookup_op(op_type: &str) -> Option<Arc<OpDef>> {
    global_registry().lookup(op_type)
}

/// Like [`lookup_op`], but reports an unknown op type as an error.
pub fn op_def(op_type: &str) -> Result<Arc<OpDef>, ConfigError> {
    lookup_op(op_type).ok_or_else(|| ConfigError::UnknownOp {
        op_type: op_type.to_string(),
    })
}

pub fn has_op(op_type: &str) -> bool {
    global_registry().lookup(op_type).is_some()
}

/// Registered op types, sorted.
pub fn list_ops() -> Vec<String> {
    global_registry().list()
}

static REGISTRATION: OnceLock<Result<(), ConfigError>> = OnceLock::new();

/// Runs every linked registrar exactly once and returns the first failure, if any.
/// Later calls return the cached outcome.
pub fn ensure_registered() -> Result<(), ConfigError> {
    REGISTRATION
        .get_or_init(|| {
            debug!(registrars = REGISTRARS.len(), "running registrars");
            REGISTRARS.iter().try_for_each(|registrar| registrar())
        })
        .clone()
}

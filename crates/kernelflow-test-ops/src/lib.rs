//! Reference operator library for kernelflow.
//!
//! Registers the descriptors, CPU kernels and backward generators of a small set of
//! test operators (`ccrelu`, `TestReshape`, `TestSource`, ...). Registration runs once,
//! either from kernelflow's registrar slice or through [`register`].

use std::sync::OnceLock;

use kernelflow::error::ConfigError;
use tracing::debug;

mod grads;
mod kernels;
mod ops;

static REGISTERED: OnceLock<Result<(), ConfigError>> = OnceLock::new();

/// Registers every op, kernel and backward generator of this library. Idempotent.
pub fn register() -> Result<(), ConfigError> {
    REGISTERED
        .get_or_init(|| {
            ops::register_ops()?;
            kernels::register_kernels()?;
            grads::register_grads()?;
            debug!("registered reference test ops");
            Ok(())
        })
        .clone()
}

#[kernelflow::linkme::distributed_slice(kernelflow::op::registry::REGISTRARS)]
static REGISTER_TEST_OPS: fn() -> Result<(), ConfigError> = register;

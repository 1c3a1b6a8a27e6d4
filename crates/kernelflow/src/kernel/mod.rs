//! Kernels: configuration, the launch phase engine and the per-device registry.

pub mod conf;
pub mod error;
pub mod factory;
#[allow(clippy::module_inception)]
pub mod kernel;
pub mod shape_infer;

pub use conf::KernelConf;
pub use error::KernelError;
pub use factory::{construct_kernel, has_kernel, lookup_kernel, register_kernel, KernelFactory};
pub use kernel::{
    ComputeContext, Kernel, KernelCompute, KernelPhase, KernelSnapshot, LaunchContext,
    LaunchFailure, Launched, PhaseTrace,
};
pub use shape_infer::RuntimeShapeInferHelper;

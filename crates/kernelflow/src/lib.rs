extern crate self as kernelflow;

pub use linkme;

pub mod config;
mod env;
pub mod error;
pub mod grad;
pub mod kernel;
pub mod logging;
pub mod op;
pub mod sbp;
pub mod session;
pub mod tensor;

pub use config::{JobConfig, SessionConfig};
pub use error::ConfigError;
pub use kernel::{construct_kernel, Kernel, KernelCompute, KernelConf, KernelError, LaunchContext};
pub use op::{ensure_registered, OpDef, OpDefBuilder, OperatorConf};
pub use sbp::{DeviceType, ParallelContext, ParallelDesc, SbpParallel, SbpSignature};
pub use session::SessionContext;
pub use tensor::{AccessChecker, BlobHandle, BlobMap, DataType, Shape, TensorDesc};

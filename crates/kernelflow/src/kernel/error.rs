use thiserror::Error;

use crate::error::ConfigError;
use crate::op::InferError;
use crate::tensor::{AccessViolation, BlobError, DataType};

/// Failure of kernel construction or of one launch.
///
/// A launch failure aborts that invocation only; the kernel stays usable.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("kernel `{op}` launched before init")]
    NotInitialized { op: String },

    #[error("kernel `{op}`: no blob bound for `{bn}`")]
    MissingBlob { op: String, bn: String },

    #[error("kernel `{op}`: {source}")]
    Blob {
        op: String,
        #[source]
        source: BlobError,
    },

    #[error("kernel `{op}`: header inference failed: {source}")]
    Infer {
        op: String,
        #[source]
        source: InferError,
    },

    #[error("kernel `{op}`: output `{bn}` is allocated as {allocated} but inferred as {inferred}")]
    HeaderMismatch {
        op: String,
        bn: String,
        allocated: DataType,
        inferred: DataType,
    },

    #[error("kernel `{op}`: compute failed: {source}")]
    Compute {
        op: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl KernelError {
    /// The access violation behind this failure, whether raised by the phase
    /// machinery or by the compute body.
    pub fn access_violation(&self) -> Option<&AccessViolation> {
        match self {
            KernelError::Blob {
                source: BlobError::Access(violation),
                ..
            } => Some(violation),
            KernelError::Compute { source, .. } => source
                .downcast_ref::<AccessViolation>()
                .or_else(|| match source.downcast_ref::<BlobError>() {
                    Some(BlobError::Access(violation)) => Some(violation),
                    _ => None,
                }),
            _ => None,
        }
    }
}

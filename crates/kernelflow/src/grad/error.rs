use thiserror::Error;

use crate::error::ConfigError;
use crate::op::InferError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GradError {
    #[error("no backward generator registered for op type `{op_type}`")]
    NotRegistered { op_type: String },

    #[error("op `{op}`: generated op `{generated}` has unknown op type `{op_type}`")]
    UnknownGeneratedOp {
        op: String,
        generated: String,
        op_type: String,
    },

    #[error("op `{op}`: no argument `{arg}`")]
    UnknownArg { op: String, arg: String },

    #[error("op `{op}`: no gradient supplied for output `{arg}`")]
    MissingOutputGrad { op: String, arg: String },

    #[error("backward of `{op}`: blob `{lbi}` is not produced by the forward op or the backward fragment")]
    UnresolvedBlob { op: String, lbi: String },

    #[error("backward of `{op}` evaluated before capture")]
    NotCaptured { op: String },

    #[error(transparent)]
    Infer(#[from] InferError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

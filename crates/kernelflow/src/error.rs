//! Configuration errors shared by registration, kernel construction and inference.
//!
//! These are static mistakes in how an operator or node was declared. They are
//! detected at registration or construction time and are never retried.

use thiserror::Error;

use crate::op::AttrType;
use crate::sbp::DeviceType;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("op `{op}` has no op type set")]
    OpTypeUnset { op: String },

    #[error("op `{op}`: required argument `{arg}` has no blob binding")]
    MissingBinding { op: String, arg: String },

    #[error("op `{op}`: argument `{arg}` is not declared by op type `{op_type}`")]
    UndeclaredArg {
        op: String,
        op_type: String,
        arg: String,
    },

    #[error("op `{op}`: argument `{arg}` expects {expected} bindings, got {actual}")]
    ArityMismatch {
        op: String,
        arg: String,
        expected: String,
        actual: usize,
    },

    #[error("op type `{op_type}` is already registered")]
    DuplicateOp { op_type: String },

    #[error("kernel for op type `{op_type}` on {device} is already registered")]
    DuplicateKernel { op_type: String, device: DeviceType },

    #[error("backward generator for op type `{op_type}` is already registered")]
    DuplicateGrad { op_type: String },

    #[error("op type `{op_type}` is not registered")]
    UnknownOp { op_type: String },

    #[error("no kernel registered for op type `{op_type}` on {device}")]
    UnknownKernel { op_type: String, device: DeviceType },

    #[error("invalid definition for op type `{op_type}`: {reason}")]
    InvalidDef { op_type: String, reason: String },

    #[error("op `{op}`: attribute `{name}` is not set and has no default")]
    MissingAttr { op: String, name: String },

    #[error("op `{op}`: attribute `{name}` is {actual}, expected {expected}")]
    AttrType {
        op: String,
        name: String,
        expected: AttrType,
        actual: AttrType,
    },

    #[error("op `{op}`: attribute `{name}` is not declared")]
    UndeclaredAttr { op: String, name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_names_the_op() {
        let err = ConfigError::MissingBinding {
            op: "relu_1".to_string(),
            arg: "in".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "op `relu_1`: required argument `in` has no blob binding"
        );
    }
}

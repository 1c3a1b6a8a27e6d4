//! Operator descriptors, per-node configuration and header inference.

pub mod arg;
pub mod attr;
pub mod builder;
pub mod conf;
pub mod def;
pub mod infer;
pub mod infer_ctx;
pub mod registry;

pub use arg::{LogicalBlobId, OpArg};
pub use attr::{AttrKind, AttrMap, AttrType, AttrValue};
pub use builder::OpDefBuilder;
pub use conf::{OperatorConf, OperatorConfBuilder};
pub use def::{
    ArgDef, ArgModifiers, AttrDef, DataTypeInferFn, InputArgModifier, InputArgModifyFn, OpDef,
    OutputArgModifier, OutputArgModifyFn, SbpFn, ShapeInfer, TensorDescInferFn,
};
pub use infer::{
    infer_logical, infer_physical, infer_physical_outputs, unchanged_data_type, unchanged_shape,
    validate_conf, InferError, PhysicalDescs,
};
pub use infer_ctx::InferContext;
pub use registry::{ensure_registered, has_op, list_ops, lookup_op, op_def, register_op};

//! Backward-operator expansion and op-expression gradients.

pub mod error;
pub mod expand;
pub mod op_expr;
pub mod registry;
pub mod wrapper;

pub use error::GradError;
pub use expand::{generate_backward_ops, BackwardExpansion};
pub use op_expr::{OpExprGrad, UserOpExprGrad};
pub use registry::{has_grad, lookup_grad, register_grad, GenBackwardFn};
pub use wrapper::{NeedsGradFn, OutputGradFn, UserOpWrapper};

//! Backward expansion of one forward op into new op confs.

use std::collections::BTreeMap;

use tracing::debug;

use super::error::GradError;
use super::registry::lookup_grad;
use super::wrapper::{NeedsGradFn, OutputGradFn, UserOpWrapper};
use crate::error::ConfigError;
use crate::op::{lookup_op, op_def, validate_conf, LogicalBlobId, OpArg, OperatorConf};

/// Backward fragment of one forward op.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackwardExpansion {
    /// Generated ops in the order the generator emitted them.
    pub ops: Vec<OperatorConf>,
    /// Gradient blob of each forward input that needed one.
    pub input_grads: BTreeMap<OpArg, LogicalBlobId>,
}

impl BackwardExpansion {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && self.input_grads.is_empty()
    }

    pub fn input_grad(&self, arg: &str, index: usize) -> Option<&LogicalBlobId> {
        self.input_grads.get(&OpArg::new(arg, index))
    }
}

/// Runs the registered generator of `forward`.
///
/// The result depends only on `forward`, the `needs_grad` flags and the `output_grad`
/// lookup. When no input needs a gradient the expansion is empty and no generator is
/// required.
pub fn generate_backward_ops(
    forward: &OperatorConf,
    needs_grad: NeedsGradFn<'_>,
    output_grad: OutputGradFn<'_>,
) -> Result<BackwardExpansion, GradError> {
    let op_type = forward.op_type().ok_or_else(|| ConfigError::OpTypeUnset {
        op: forward.name.clone(),
    })?;
    let any_needed = forward
        .input_args()
        .iter()
        .any(|arg| needs_grad(arg.name(), arg.index()));
    if !any_needed {
        debug!(op = %forward.name, "no input needs a gradient");
        return Ok(BackwardExpansion::default());
    }

    let def = op_def(op_type)?;
    let attrs = validate_conf(&def, forward)?;
    let generator = lookup_grad(op_type).ok_or_else(|| GradError::NotRegistered {
        op_type: op_type.to_string(),
    })?;

    let mut wrapper = UserOpWrapper::new(forward, &attrs, needs_grad, output_grad);
    let mut ops = Vec::new();
    generator(&mut wrapper, &mut |conf| ops.push(conf))?;

    for op in &ops {
        let generated_type = op.op_type().ok_or_else(|| ConfigError::OpTypeUnset {
            op: op.name.clone(),
        })?;
        let generated_def = lookup_op(generated_type).ok_or_else(|| GradError::UnknownGeneratedOp {
            op: forward.name.clone(),
            generated: op.name.clone(),
            op_type: generated_type.to_string(),
        })?;
        validate_conf(&generated_def, op)?;
    }

    let input_grads = wrapper
        .into_input_grads()
        .into_iter()
        .filter(|(arg, _)| needs_grad(arg.name(), arg.index()))
        .collect();
    debug!(op = %forward.name, generated = ops.len(), "expanded backward ops");
    Ok(BackwardExpansion { ops, input_grads })
}

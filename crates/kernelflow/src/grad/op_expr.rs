//! Eager-style backward of a single op expression over tensor headers.

use std::collections::{BTreeMap, HashMap};

use super::error::GradError;
use super::expand::{generate_backward_ops, BackwardExpansion};
use crate::op::{infer_logical, op_def, LogicalBlobId, OpArg, OperatorConf};
use crate::tensor::TensorDesc;

/// Capture/backward capability of one forward op expression.
pub trait OpExprGrad {
    /// Remembers what the backward pass needs from the forward call.
    fn capture(
        &mut self,
        inputs: &BTreeMap<OpArg, TensorDesc>,
        outputs: &BTreeMap<OpArg, TensorDesc>,
    ) -> Result<(), GradError>;

    /// Maps output gradients to input gradients.
    fn do_backward(
        &self,
        out_grads: &BTreeMap<OpArg, TensorDesc>,
    ) -> Result<BTreeMap<OpArg, TensorDesc>, GradError>;
}

struct Captured {
    inputs: BTreeMap<OpArg, TensorDesc>,
    outputs: BTreeMap<OpArg, TensorDesc>,
}

/// Backward of a registered op, built from its backward generator.
///
/// The backward fragment is expanded once at construction with every input needing a
/// gradient, against placeholder blobs for the output gradients. `do_backward` then
/// evaluates the fragment with header inference.
pub struct UserOpExprGrad {
    forward: OperatorConf,
    fragment: BackwardExpansion,
    out_grad_blobs: BTreeMap<OpArg, LogicalBlobId>,
    captured: Option<Captured>,
}

impl UserOpExprGrad {
    pub fn new(forward: OperatorConf) -> Result<Self, GradError> {
        let placeholder_op = format!("{}-out_grad", forward.name);
        let out_grad_blobs: BTreeMap<OpArg, LogicalBlobId> = forward
            .output_args()
            .into_iter()
            .map(|arg| {
                let lbi = LogicalBlobId::new(placeholder_op.clone(), arg.bn());
                (arg, lbi)
            })
            .collect();
        let lookup = |arg: &str, index: usize| out_grad_blobs.get(&OpArg::new(arg, index)).cloned();
        let fragment = generate_backward_ops(&forward, &|_, _| true, &lookup)?;
        Ok(UserOpExprGrad {
            forward,
            fragment,
            out_grad_blobs,
            captured: None,
        })
    }

    pub fn fragment(&self) -> &BackwardExpansion {
        &self.fragment
    }
}

impl OpExprGrad for UserOpExprGrad {
    fn capture(
        &mut self,
        inputs: &BTreeMap<OpArg, TensorDesc>,
        outputs: &BTreeMap<OpArg, TensorDesc>,
    ) -> Result<(), GradError> {
        self.captured = Some(Captured {
            inputs: inputs.clone(),
            outputs: outputs.clone(),
        });
        Ok(())
    }

    fn do_backward(
        &self,
        out_grads: &BTreeMap<OpArg, TensorDesc>,
    ) -> Result<BTreeMap<OpArg, TensorDesc>, GradError> {
        let captured = self.captured.as_ref().ok_or_else(|| GradError::NotCaptured {
            op: self.forward.name.clone(),
        })?;

        let mut env: HashMap<LogicalBlobId, TensorDesc> = HashMap::new();
        let sides = [
            (&self.forward.inputs, &captured.inputs),
            (&self.forward.outputs, &captured.outputs),
        ];
        for (bindings, descs) in sides {
            for (name, lbis) in bindings {
                for (index, lbi) in lbis.iter().enumerate() {
                    if let Some(desc) = descs.get(&OpArg::new(name.clone(), index)) {
                        env.insert(lbi.clone(), desc.clone());
                    }
                }
            }
        }
        for (arg, lbi) in &self.out_grad_blobs {
            if let Some(desc) = out_grads.get(arg) {
                env.insert(lbi.clone(), desc.clone());
            }
        }

        let unresolved = |lbi: &LogicalBlobId| GradError::UnresolvedBlob {
            op: self.forward.name.clone(),
            lbi: lbi.to_string(),
        };
        for op in &self.fragment.ops {
            let def = op_def(op.op_type().unwrap_or_default())?;
            let mut inputs = BTreeMap::new();
            for (name, lbis) in &op.inputs {
                for (index, lbi) in lbis.iter().enumerate() {
                    let desc = env.get(lbi).ok_or_else(|| unresolved(lbi))?;
                    inputs.insert(OpArg::new(name.clone(), index), desc.clone());
                }
            }
            for (arg, desc) in infer_logical(&def, op, &inputs)? {
                if let Some(lbi) = op.output(arg.name(), arg.index()) {
                    env.insert(lbi.clone(), desc);
                }
            }
        }

        self.fragment
            .input_grads
            .iter()
            .map(|(arg, lbi)| {
                let desc = env.get(lbi).ok_or_else(|| unresolved(lbi))?;
                Ok((arg.clone(), desc.clone()))
            })
            .collect()
    }
}

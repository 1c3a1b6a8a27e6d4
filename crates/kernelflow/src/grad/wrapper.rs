use std::collections::BTreeMap;

use super::error::GradError;
use crate::op::{AttrKind, AttrMap, LogicalBlobId, OpArg, OperatorConf};

/// External predicate: does forward input `(arg, index)` need a gradient?
pub type NeedsGradFn<'a> = &'a dyn Fn(&str, usize) -> bool;

/// External lookup: gradient blob of forward output `(arg, index)`.
pub type OutputGradFn<'a> = &'a dyn Fn(&str, usize) -> Option<LogicalBlobId>;

/// The view of a forward op that backward generators work against.
pub struct UserOpWrapper<'a> {
    conf: &'a OperatorConf,
    attrs: &'a AttrMap,
    needs_grad: NeedsGradFn<'a>,
    output_grad: OutputGradFn<'a>,
    input_grads: BTreeMap<OpArg, LogicalBlobId>,
}

impl<'a> UserOpWrapper<'a> {
    pub(crate) fn new(
        conf: &'a OperatorConf,
        attrs: &'a AttrMap,
        needs_grad: NeedsGradFn<'a>,
        output_grad: OutputGradFn<'a>,
    ) -> Self {
        UserOpWrapper {
            conf,
            attrs,
            needs_grad,
            output_grad,
            input_grads: BTreeMap::new(),
        }
    }

    pub fn op_name(&self) -> &str {
        &self.conf.name
    }

    pub fn op_conf(&self) -> &OperatorConf {
        self.conf
    }

    fn unknown(&self, arg: &str, index: usize) -> GradError {
        GradError::UnknownArg {
            op: self.conf.name.clone(),
            arg: OpArg::new(arg, index).bn(),
        }
    }

    pub fn input(&self, arg: &str, index: usize) -> Result<&LogicalBlobId, GradError> {
        self.conf
            .input(arg, index)
            .ok_or_else(|| self.unknown(arg, index))
    }

    pub fn output(&self, arg: &str, index: usize) -> Result<&LogicalBlobId, GradError> {
        self.conf
            .output(arg, index)
            .ok_or_else(|| self.unknown(arg, index))
    }

    pub fn input_size(&self, arg: &str) -> usize {
        self.conf.input_size(arg)
    }

    pub fn attr<T: AttrKind>(&self, name: &str) -> Result<T, GradError> {
        Ok(self.attrs.get(&self.conf.name, name)?)
    }

    pub fn need_gen_grad_tensor_for_op_input(&self, arg: &str, index: usize) -> bool {
        self.conf.input(arg, index).is_some() && (self.needs_grad)(arg, index)
    }

    pub fn grad_tensor_with_op_output(&self, arg: &str, index: usize) -> Result<LogicalBlobId, GradError> {
        self.output(arg, index)?;
        (self.output_grad)(arg, index).ok_or_else(|| GradError::MissingOutputGrad {
            op: self.conf.name.clone(),
            arg: OpArg::new(arg, index).bn(),
        })
    }

    /// Records `lbi` as the gradient of forward input `(arg, index)`.
    pub fn bind_grad_tensor_with_op_input(
        &mut self,
        lbi: LogicalBlobId,
        arg: &str,
        index: usize,
    ) -> Result<(), GradError> {
        self.input(arg, index)?;
        self.input_grads.insert(OpArg::new(arg, index), lbi);
        Ok(())
    }

    pub(crate) fn into_input_grads(self) -> BTreeMap<OpArg, LogicalBlobId> {
        self.input_grads
    }
}

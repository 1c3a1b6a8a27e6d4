use std::collections::BTreeMap;

use super::builder::SbpSignatureBuilder;
use super::infer::SbpError;
use super::parallel::{DeviceType, ParallelDesc, SbpSignature};
use crate::op::{AttrKind, AttrMap, InferError, OpArg};
use crate::tensor::TensorDesc;

/// What an operator's sbp callback sees while proposing candidates.
pub struct SbpContext<'a> {
    op_name: &'a str,
    attrs: &'a AttrMap,
    inputs: Vec<OpArg>,
    outputs: Vec<OpArg>,
    logical_inputs: &'a BTreeMap<OpArg, TensorDesc>,
    parallel_desc: ParallelDesc,
    candidates: Vec<SbpSignature>,
}

impl<'a> SbpContext<'a> {
    pub(crate) fn new(
        op_name: &'a str,
        attrs: &'a AttrMap,
        inputs: Vec<OpArg>,
        outputs: Vec<OpArg>,
        logical_inputs: &'a BTreeMap<OpArg, TensorDesc>,
        parallel_desc: ParallelDesc,
    ) -> Self {
        SbpContext {
            op_name,
            attrs,
            inputs,
            outputs,
            logical_inputs,
            parallel_desc,
            candidates: Vec::new(),
        }
    }

    pub fn op_name(&self) -> &str {
        self.op_name
    }

    pub fn inputs(&self) -> &[OpArg] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OpArg] {
        &self.outputs
    }

    /// Inputs followed by outputs.
    pub fn all_args(&self) -> Vec<OpArg> {
        self.inputs.iter().chain(self.outputs.iter()).cloned().collect()
    }

    pub fn logical_input_desc(&self, name: &str, index: usize) -> Result<&TensorDesc, SbpError> {
        let arg = OpArg::new(name, index);
        self.logical_inputs.get(&arg).ok_or_else(|| {
            SbpError::Infer(InferError::MissingInput {
                op: self.op_name.to_string(),
                arg: arg.bn(),
            })
        })
    }

    pub fn attr<T: AttrKind>(&self, name: &str) -> Result<T, SbpError> {
        Ok(self.attrs.get(self.op_name, name)?)
    }

    pub fn parallel_num(&self) -> usize {
        self.parallel_desc.parallel_num
    }

    pub fn device_type(&self) -> DeviceType {
        self.parallel_desc.device_type
    }

    pub fn new_builder(&self) -> SbpSignatureBuilder {
        SbpSignatureBuilder::new()
    }

    pub fn add_signature(&mut self, signature: SbpSignature) {
        self.candidates.push(signature);
    }

    pub(crate) fn into_candidates(self) -> Vec<SbpSignature> {
        self.candidates
    }
}

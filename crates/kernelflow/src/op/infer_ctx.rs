use std::collections::BTreeMap;

use super::arg::OpArg;
use super::attr::{AttrKind, AttrMap};
use super::infer::InferError;
use crate::sbp::{ParallelContext, SbpParallel, SbpSignature};
use crate::tensor::{DataType, Shape, TensorDesc};

#[derive(Debug, Clone, Default)]
pub(crate) struct OutputSlot {
    pub(crate) desc: TensorDesc,
    pub(crate) shape_set: bool,
    pub(crate) data_type_set: bool,
}

/// What shape and data-type callbacks see: resolved input headers, writable output
/// headers, attributes with defaults filled in and, for physical inference, the
/// parallel context and chosen signature.
pub struct InferContext<'a> {
    op_name: &'a str,
    attrs: &'a AttrMap,
    inputs: &'a BTreeMap<OpArg, TensorDesc>,
    input_order: Vec<OpArg>,
    output_order: Vec<OpArg>,
    outputs: BTreeMap<OpArg, OutputSlot>,
    parallel_ctx: ParallelContext,
    sbp_signature: Option<&'a SbpSignature>,
}

impl<'a> InferContext<'a> {
    pub(crate) fn new(
        op_name: &'a str,
        attrs: &'a AttrMap,
        inputs: &'a BTreeMap<OpArg, TensorDesc>,
        input_order: Vec<OpArg>,
        output_order: Vec<OpArg>,
        parallel_ctx: ParallelContext,
        sbp_signature: Option<&'a SbpSignature>,
    ) -> Self {
        let outputs = output_order
            .iter()
            .map(|arg| (arg.clone(), OutputSlot::default()))
            .collect();
        InferContext {
            op_name,
            attrs,
            inputs,
            input_order,
            output_order,
            outputs,
            parallel_ctx,
            sbp_signature,
        }
    }

    pub(crate) fn into_outputs(self) -> BTreeMap<OpArg, OutputSlot> {
        self.outputs
    }

    pub fn op_name(&self) -> &str {
        self.op_name
    }

    pub fn attr<T: AttrKind>(&self, name: &str) -> Result<T, InferError> {
        Ok(self.attrs.get(self.op_name, name)?)
    }

    /// Bound inputs in declaration order.
    pub fn inputs(&self) -> Vec<OpArg> {
        self.input_order.clone()
    }

    /// Bound outputs in declaration order.
    pub fn outputs(&self) -> Vec<OpArg> {
        self.output_order.clone()
    }

    pub fn input_size(&self, name: &str) -> usize {
        self.inputs.keys().filter(|arg| arg.name() == name).count()
    }

    pub fn output_size(&self, name: &str) -> usize {
        self.outputs.keys().filter(|arg| arg.name() == name).count()
    }

    pub fn has_input(&self, name: &str, index: usize) -> bool {
        self.inputs.contains_key(&OpArg::new(name, index))
    }

    pub fn input_desc(&self, name: &str, index: usize) -> Result<&TensorDesc, InferError> {
        self.inputs
            .get(&OpArg::new(name, index))
            .ok_or_else(|| InferError::MissingInput {
                op: self.op_name.to_string(),
                arg: OpArg::new(name, index).bn(),
            })
    }

    pub fn input_shape(&self, name: &str, index: usize) -> Result<&Shape, InferError> {
        Ok(&self.input_desc(name, index)?.shape)
    }

    pub fn input_data_type(&self, name: &str, index: usize) -> Result<DataType, InferError> {
        Ok(self.input_desc(name, index)?.data_type)
    }

    pub fn input_is_dynamic(&self, name: &str, index: usize) -> Result<bool, InferError> {
        Ok(self.input_desc(name, index)?.is_dynamic)
    }

    fn slot_mut(&mut self, name: &str, index: usize) -> Result<&mut OutputSlot, InferError> {
        let op = self.op_name;
        self.outputs
            .get_mut(&OpArg::new(name, index))
            .ok_or_else(|| InferError::UnknownOutput {
                op: op.to_string(),
                arg: OpArg::new(name, index).bn(),
            })
    }

    /// Output header as written so far.
    pub fn output_desc(&self, name: &str, index: usize) -> Result<&TensorDesc, InferError> {
        self.outputs
            .get(&OpArg::new(name, index))
            .map(|slot| &slot.desc)
            .ok_or_else(|| InferError::UnknownOutput {
                op: self.op_name.to_string(),
                arg: OpArg::new(name, index).bn(),
            })
    }

    /// Mutable access to an output shape; marks the shape as inferred.
    pub fn output_shape_mut(&mut self, name: &str, index: usize) -> Result<&mut Shape, InferError> {
        let slot = self.slot_mut(name, index)?;
        slot.shape_set = true;
        Ok(&mut slot.desc.shape)
    }

    pub fn set_output_shape(&mut self, name: &str, index: usize, shape: Shape) -> Result<(), InferError> {
        *self.output_shape_mut(name, index)? = shape;
        Ok(())
    }

    pub fn set_output_data_type(
        &mut self,
        name: &str,
        index: usize,
        data_type: DataType,
    ) -> Result<(), InferError> {
        let slot = self.slot_mut(name, index)?;
        slot.desc.data_type = data_type;
        slot.data_type_set = true;
        Ok(())
    }

    pub fn set_output_is_dynamic(&mut self, name: &str, index: usize, is_dynamic: bool) -> Result<(), InferError> {
        self.slot_mut(name, index)?.desc.is_dynamic = is_dynamic;
        Ok(())
    }

    pub fn parallel_ctx(&self) -> &ParallelContext {
        &self.parallel_ctx
    }

    /// Assignment of `name_index` in the chosen signature (physical inference only).
    pub fn sbp_parallel(&self, name: &str, index: usize) -> Result<SbpParallel, InferError> {
        let arg = OpArg::new(name, index);
        self.sbp_signature
            .and_then(|sig| sig.get(&arg))
            .ok_or_else(|| InferError::MissingSbp {
                op: self.op_name.to_string(),
                arg: arg.bn(),
            })
    }
}

/// Fails the surrounding inference callback with [`InferError::Check`] when the
/// condition does not hold.
#[macro_export]
macro_rules! infer_ensure {
    ($ctx:expr, $cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::op::InferError::Check {
                op: $ctx.op_name().to_string(),
                message: format!($($arg)+),
            });
        }
    };
}

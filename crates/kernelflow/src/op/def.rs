//! Immutable operator descriptors produced by [`super::OpDefBuilder`].

use super::arg::OpArg;
use super::attr::{AttrType, AttrValue};
use super::conf::OperatorConf;
use super::infer::InferError;
use super::infer_ctx::InferContext;
use crate::sbp::{DeviceType, SbpContext, SbpError};

/// Sets every output shape (and optionally dtype) from the resolved inputs.
pub type TensorDescInferFn = fn(&mut InferContext<'_>) -> Result<(), InferError>;

pub type DataTypeInferFn = fn(&mut InferContext<'_>) -> Result<(), InferError>;

/// Proposes candidate signatures through [`SbpContext::add_signature`].
pub type SbpFn = fn(&mut SbpContext<'_>) -> Result<(), SbpError>;

/// Adjusts per-output runtime flags once the instance's configuration is known.
pub type OutputArgModifyFn = fn(&mut ArgModifiers<OutputArgModifier>, &OperatorConf);

pub type InputArgModifyFn = fn(&mut ArgModifiers<InputArgModifier>, &OperatorConf);

/// A declared input or output argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgDef {
    pub name: String,
    pub is_optional: bool,
    /// Number of bindings; a lower bound when `num_as_min` is set.
    pub num: usize,
    pub num_as_min: bool,
}

impl ArgDef {
    /// Checks a binding count against the declaration.
    pub fn accepts(&self, count: usize) -> bool {
        if count == 0 && self.is_optional {
            return true;
        }
        if self.num_as_min {
            count >= self.num
        } else {
            count == self.num
        }
    }

    pub fn describe_arity(&self) -> String {
        match (self.is_optional, self.num_as_min) {
            (true, true) => format!("0 or at least {}", self.num),
            (true, false) => format!("0 or {}", self.num),
            (false, true) => format!("at least {}", self.num),
            (false, false) => self.num.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttrDef {
    pub name: String,
    pub attr_type: AttrType,
    pub default: Option<AttrValue>,
}

/// The two supported shape-inference forms.
#[derive(Debug, Clone, Copy)]
pub enum ShapeInfer {
    /// One callback used for both logical and physical inference.
    Combined(TensorDescInferFn),
    /// Separate callbacks when the physical shape depends on the chosen signature.
    Split {
        logical: TensorDescInferFn,
        physical: TensorDescInferFn,
    },
}

impl ShapeInfer {
    pub fn logical(&self) -> TensorDescInferFn {
        match *self {
            ShapeInfer::Combined(f) => f,
            ShapeInfer::Split { logical, .. } => logical,
        }
    }

    pub fn physical(&self) -> TensorDescInferFn {
        match *self {
            ShapeInfer::Combined(f) => f,
            ShapeInfer::Split { physical, .. } => physical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputArgModifier {
    pub header_inferred_before_compute: bool,
}

impl Default for OutputArgModifier {
    fn default() -> Self {
        OutputArgModifier {
            header_inferred_before_compute: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputArgModifier {
    pub is_mutable: bool,
}

/// Modifiers for every bound argument of one side of an operator, keyed by `(name, index)`.
#[derive(Debug, Clone, Default)]
pub struct ArgModifiers<M> {
    entries: Vec<(String, usize, M)>,
}

impl<M: Default> ArgModifiers<M> {
    pub(crate) fn for_bindings<'a>(bindings: impl IntoIterator<Item = (&'a str, usize)>) -> Self {
        let entries = bindings
            .into_iter()
            .map(|(name, index)| (name.to_string(), index, M::default()))
            .collect();
        ArgModifiers { entries }
    }

    /// Returns the modifier for a bound argument, `None` if it is not bound.
    pub fn get(&mut self, name: &str, index: usize) -> Option<&mut M> {
        self.entries
            .iter_mut()
            .find(|(n, i, _)| n == name && *i == index)
            .map(|(_, _, modifier)| modifier)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize, &M)> {
        self.entries
            .iter()
            .map(|(name, index, modifier)| (name.as_str(), *index, modifier))
    }
}

fn declared_args(defs: &[ArgDef], bound: impl Fn(&str) -> usize) -> Vec<OpArg> {
    defs.iter()
        .flat_map(|def| (0..bound(&def.name)).map(move |index| OpArg::new(def.name.clone(), index)))
        .collect()
}

/// Declarative description of an operator type. Immutable once registered.
#[derive(Debug, Clone)]
pub struct OpDef {
    pub(crate) op_type: String,
    pub(crate) inputs: Vec<ArgDef>,
    pub(crate) outputs: Vec<ArgDef>,
    pub(crate) attrs: Vec<AttrDef>,
    pub(crate) shape_infer: ShapeInfer,
    pub(crate) data_type_infer: DataTypeInferFn,
    pub(crate) sbp_fn: SbpFn,
    pub(crate) output_arg_modify: Option<OutputArgModifyFn>,
    pub(crate) input_arg_modify: Option<InputArgModifyFn>,
    pub(crate) device_restriction: Option<DeviceType>,
}

impl OpDef {
    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn inputs(&self) -> &[ArgDef] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ArgDef] {
        &self.outputs
    }

    /// Bound inputs of `conf` in declaration order, then index order.
    pub fn input_args(&self, conf: &OperatorConf) -> Vec<OpArg> {
        declared_args(&self.inputs, |name| conf.input_size(name))
    }

    /// Bound outputs of `conf` in declaration order, then index order.
    pub fn output_args(&self, conf: &OperatorConf) -> Vec<OpArg> {
        declared_args(&self.outputs, |name| conf.output_size(name))
    }

    pub fn attrs(&self) -> &[AttrDef] {
        &self.attrs
    }

    pub fn input(&self, name: &str) -> Option<&ArgDef> {
        self.inputs.iter().find(|arg| arg.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&ArgDef> {
        self.outputs.iter().find(|arg| arg.name == name)
    }

    pub fn attr(&self, name: &str) -> Option<&AttrDef> {
        self.attrs.iter().find(|attr| attr.name == name)
    }

    pub fn shape_infer(&self) -> ShapeInfer {
        self.shape_infer
    }

    pub fn data_type_infer(&self) -> DataTypeInferFn {
        self.data_type_infer
    }

    pub fn sbp_fn(&self) -> SbpFn {
        self.sbp_fn
    }

    /// Ops with no declared inputs produce their outputs from attributes alone.
    pub fn is_source(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn device_restriction(&self) -> Option<DeviceType> {
        self.device_restriction
    }

    pub fn supports_device(&self, device: DeviceType) -> bool {
        self.device_restriction.map_or(true, |only| only == device)
    }

    /// Runs the output-arg modifier (if any) over the outputs bound in `conf`.
    pub fn output_arg_modifiers(&self, conf: &OperatorConf) -> ArgModifiers<OutputArgModifier> {
        let mut modifiers = ArgModifiers::for_bindings(
            conf.outputs
                .iter()
                .flat_map(|(name, lbis)| (0..lbis.len()).map(move |i| (name.as_str(), i))),
        );
        if let Some(modify) = self.output_arg_modify {
            modify(&mut modifiers, conf);
        }
        modifiers
    }

    pub fn input_arg_modifiers(&self, conf: &OperatorConf) -> ArgModifiers<InputArgModifier> {
        let mut modifiers = ArgModifiers::for_bindings(
            conf.inputs
                .iter()
                .flat_map(|(name, lbis)| (0..lbis.len()).map(move |i| (name.as_str(), i))),
        );
        if let Some(modify) = self.input_arg_modify {
            modify(&mut modifiers, conf);
        }
        modifiers
    }
}

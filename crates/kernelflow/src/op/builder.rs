use tracing::debug;

use super::attr::{AttrKind, AttrType, AttrValue};
use super::def::{
    ArgDef, AttrDef, DataTypeInferFn, InputArgModifyFn, OpDef, OutputArgModifyFn, SbpFn,
    ShapeInfer, TensorDescInferFn,
};
use crate::error::ConfigError;
use crate::sbp::DeviceType;

/// Collects the declaration of one operator type.
///
/// Each callback slot may be filled once; `build` rejects a missing or doubly-set slot.
/// Errors are deferred to `build` so registrars can chain calls without `?`.
pub struct OpDefBuilder {
    op_type: String,
    inputs: Vec<ArgDef>,
    outputs: Vec<ArgDef>,
    attrs: Vec<AttrDef>,
    tensor_desc_infer: Option<TensorDescInferFn>,
    logical_infer: Option<TensorDescInferFn>,
    physical_infer: Option<TensorDescInferFn>,
    data_type_infer: Option<DataTypeInferFn>,
    sbp_fn: Option<SbpFn>,
    output_arg_modify: Option<OutputArgModifyFn>,
    input_arg_modify: Option<InputArgModifyFn>,
    device_restriction: Option<DeviceType>,
    errors: Vec<String>,
}

impl OpDefBuilder {
    pub fn new(op_type: impl Into<String>) -> Self {
        OpDefBuilder {
            op_type: op_type.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attrs: Vec::new(),
            tensor_desc_infer: None,
            logical_infer: None,
            physical_infer: None,
            data_type_infer: None,
            sbp_fn: None,
            output_arg_modify: None,
            input_arg_modify: None,
            device_restriction: None,
            errors: Vec::new(),
        }
    }

    fn push_arg(&mut self, output: bool, name: String, is_optional: bool, num: usize, num_as_min: bool) {
        let exists = self
            .inputs
            .iter()
            .chain(self.outputs.iter())
            .any(|arg| arg.name == name);
        if exists {
            self.errors.push(format!("argument `{name}` declared twice"));
            return;
        }
        if num == 0 {
            self.errors.push(format!("argument `{name}` declared with zero arity"));
            return;
        }
        let arg = ArgDef {
            name,
            is_optional,
            num,
            num_as_min,
        };
        if output {
            self.outputs.push(arg);
        } else {
            self.inputs.push(arg);
        }
    }

    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.push_arg(false, name.into(), false, 1, false);
        self
    }

    pub fn input_with_num(mut self, name: impl Into<String>, num: usize) -> Self {
        self.push_arg(false, name.into(), false, num, false);
        self
    }

    /// A repeated input that accepts `min` or more bindings.
    pub fn input_with_min(mut self, name: impl Into<String>, min: usize) -> Self {
        self.push_arg(false, name.into(), false, min, true);
        self
    }

    pub fn optional_input(mut self, name: impl Into<String>) -> Self {
        self.push_arg(false, name.into(), true, 1, false);
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.push_arg(true, name.into(), false, 1, false);
        self
    }

    pub fn output_with_num(mut self, name: impl Into<String>, num: usize) -> Self {
        self.push_arg(true, name.into(), false, num, false);
        self
    }

    /// An output whose count is chosen per instance (at least `min`).
    pub fn output_with_min(mut self, name: impl Into<String>, min: usize) -> Self {
        self.push_arg(true, name.into(), false, min, true);
        self
    }

    pub fn optional_output(mut self, name: impl Into<String>) -> Self {
        self.push_arg(true, name.into(), true, 1, false);
        self
    }

    fn push_attr(&mut self, name: String, attr_type: AttrType, default: Option<AttrValue>) {
        if self.attrs.iter().any(|attr| attr.name == name) {
            self.errors.push(format!("attribute `{name}` declared twice"));
            return;
        }
        self.attrs.push(AttrDef {
            name,
            attr_type,
            default,
        });
    }

    /// A required attribute of type `T`.
    pub fn attr<T: AttrKind>(mut self, name: impl Into<String>) -> Self {
        self.push_attr(name.into(), T::TYPE, None);
        self
    }

    pub fn attr_with_default<T: AttrKind>(mut self, name: impl Into<String>, default: T) -> Self {
        self.push_attr(name.into(), T::TYPE, Some(default.into_value()));
        self
    }

    fn set_once<F>(slot: &mut Option<F>, value: F, what: &str, errors: &mut Vec<String>) {
        if slot.is_some() {
            errors.push(format!("{what} set twice"));
        } else {
            *slot = Some(value);
        }
    }

    pub fn tensor_desc_infer_fn(mut self, f: TensorDescInferFn) -> Self {
        Self::set_once(&mut self.tensor_desc_infer, f, "tensor desc infer fn", &mut self.errors);
        self
    }

    pub fn logical_tensor_desc_infer_fn(mut self, f: TensorDescInferFn) -> Self {
        Self::set_once(&mut self.logical_infer, f, "logical tensor desc infer fn", &mut self.errors);
        self
    }

    pub fn physical_tensor_desc_infer_fn(mut self, f: TensorDescInferFn) -> Self {
        Self::set_once(&mut self.physical_infer, f, "physical tensor desc infer fn", &mut self.errors);
        self
    }

    pub fn data_type_infer_fn(mut self, f: DataTypeInferFn) -> Self {
        Self::set_once(&mut self.data_type_infer, f, "data type infer fn", &mut self.errors);
        self
    }

    pub fn sbp_fn(mut self, f: SbpFn) -> Self {
        Self::set_once(&mut self.sbp_fn, f, "sbp fn", &mut self.errors);
        self
    }

    pub fn output_arg_modify_fn(mut self, f: OutputArgModifyFn) -> Self {
        Self::set_once(&mut self.output_arg_modify, f, "output arg modify fn", &mut self.errors);
        self
    }

    pub fn input_arg_modify_fn(mut self, f: InputArgModifyFn) -> Self {
        Self::set_once(&mut self.input_arg_modify, f, "input arg modify fn", &mut self.errors);
        self
    }

    /// Restricts the op to CPU placements.
    pub fn cpu_only(mut self) -> Self {
        self.device_restriction = Some(DeviceType::Cpu);
        self
    }

    pub fn build(mut self) -> Result<OpDef, ConfigError> {
        let shape_infer = match (self.tensor_desc_infer, self.logical_infer, self.physical_infer) {
            (Some(f), None, None) => Some(ShapeInfer::Combined(f)),
            (None, Some(logical), Some(physical)) => Some(ShapeInfer::Split { logical, physical }),
            (None, None, None) => {
                self.errors.push("no tensor desc infer fn".to_string());
                None
            }
            (Some(_), _, _) => {
                self.errors
                    .push("combined and logical/physical tensor desc infer fns both set".to_string());
                None
            }
            (None, _, _) => {
                self.errors
                    .push("logical and physical tensor desc infer fns must be set together".to_string());
                None
            }
        };
        if self.data_type_infer.is_none() {
            self.errors.push("no data type infer fn".to_string());
        }
        if self.sbp_fn.is_none() {
            self.errors.push("no sbp fn".to_string());
        }
        if self.outputs.is_empty() {
            self.errors.push("no outputs declared".to_string());
        }
        for attr in &self.attrs {
            if let Some(default) = &attr.default {
                if default.attr_type() != attr.attr_type {
                    self.errors.push(format!(
                        "default of attribute `{}` is {}, declared {}",
                        attr.name,
                        default.attr_type(),
                        attr.attr_type
                    ));
                }
            }
        }

        match (shape_infer, self.data_type_infer, self.sbp_fn) {
            (Some(shape_infer), Some(data_type_infer), Some(sbp_fn)) if self.errors.is_empty() => {
                debug!(op_type = %self.op_type, "built op def");
                Ok(OpDef {
                    op_type: self.op_type,
                    inputs: self.inputs,
                    outputs: self.outputs,
                    attrs: self.attrs,
                    shape_infer,
                    data_type_infer,
                    sbp_fn,
                    output_arg_modify: self.output_arg_modify,
                    input_arg_modify: self.input_arg_modify,
                    device_restriction: self.device_restriction,
                })
            }
            _ => Err(ConfigError::InvalidDef {
                op_type: self.op_type,
                reason: self.errors.join("; "),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::infer_ctx::InferContext;
    use crate::op::{unchanged_data_type, unchanged_shape, InferError};
    use crate::sbp::{default_broadcast_to_broadcast, SbpContext, SbpError};

    fn noop_shape(_: &mut InferContext<'_>) -> Result<(), InferError> {
        Ok(())
    }

    fn noop_sbp(_: &mut SbpContext<'_>) -> Result<(), SbpError> {
        Ok(())
    }

    #[test]
    fn build_requires_every_callback() {
        let err = OpDefBuilder::new("partial")
            .input("in")
            .output("out")
            .tensor_desc_infer_fn(unchanged_shape)
            .build()
            .unwrap_err();
        match err {
            ConfigError::InvalidDef { op_type, reason } => {
                assert_eq!(op_type, "partial");
                assert!(reason.contains("no data type infer fn"));
                assert!(reason.contains("no sbp fn"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn build_rejects_callback_set_twice() {
        let err = OpDefBuilder::new("twice")
            .input("in")
            .output("out")
            .tensor_desc_infer_fn(unchanged_shape)
            .tensor_desc_infer_fn(noop_shape)
            .data_type_infer_fn(unchanged_data_type)
            .sbp_fn(noop_sbp)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("set twice"));
    }

    #[test]
    fn build_rejects_mixed_shape_forms() {
        let err = OpDefBuilder::new("mixed")
            .output("out")
            .tensor_desc_infer_fn(noop_shape)
            .logical_tensor_desc_infer_fn(noop_shape)
            .data_type_infer_fn(unchanged_data_type)
            .sbp_fn(default_broadcast_to_broadcast)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("both set"));
    }

    #[test]
    fn complete_declaration_builds() {
        let def = OpDefBuilder::new("identity")
            .input("in")
            .output("out")
            .attr_with_default("scale", 1.0f32)
            .tensor_desc_infer_fn(unchanged_shape)
            .data_type_infer_fn(unchanged_data_type)
            .sbp_fn(default_broadcast_to_broadcast)
            .cpu_only()
            .build()
            .unwrap();
        assert_eq!(def.op_type(), "identity");
        assert!(!def.is_source());
        assert!(def.supports_device(DeviceType::Cpu));
        assert!(!def.supports_device(DeviceType::Gpu));
        assert_eq!(def.attr("scale").unwrap().attr_type, AttrType::Float);
    }
}

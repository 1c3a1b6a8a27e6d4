//! Drives shape and data-type inference for one operator instance.
//!
//! Logical inference runs on whole-tensor headers; physical inference runs on the
//! per-worker headers implied by a chosen signature. Both validate the instance
//! against its descriptor first and are pure functions of their inputs, so running
//! them again on their own results reproduces the same headers.

use std::collections::BTreeMap;

use thiserror::Error;

use super::arg::OpArg;
use super::attr::AttrMap;
use super::conf::OperatorConf;
use super::def::{OpDef, TensorDescInferFn};
use super::infer_ctx::InferContext;
use crate::error::ConfigError;
use crate::sbp::{physical_shape, ParallelContext, SbpParallel, SbpSignature};
use crate::tensor::TensorDesc;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferError {
    #[error("op `{op}`: {message}")]
    Check { op: String, message: String },

    #[error("op `{op}`: no header for input `{arg}`")]
    MissingInput { op: String, arg: String },

    #[error("op `{op}`: output `{arg}` is not declared")]
    UnknownOutput { op: String, arg: String },

    #[error("op `{op}`: {what} of output `{arg}` was not inferred")]
    OutputNotInferred {
        op: String,
        arg: String,
        what: &'static str,
    },

    #[error("op `{op}`: no sbp assignment for `{arg}`")]
    MissingSbp { op: String, arg: String },

    #[error("op `{op}`: `{arg}` cannot be split on axis {axis} of a rank-{num_axes} tensor")]
    InvalidSplitAxis {
        op: String,
        arg: String,
        axis: usize,
        num_axes: usize,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Headers of both sides of an operator after physical inference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalDescs {
    pub inputs: BTreeMap<OpArg, TensorDesc>,
    pub outputs: BTreeMap<OpArg, TensorDesc>,
}

/// Checks `conf` against `def` and returns its attributes with defaults filled in.
pub fn validate_conf(def: &OpDef, conf: &OperatorConf) -> Result<AttrMap, ConfigError> {
    let op = conf.name.as_str();
    match conf.op_type() {
        None => return Err(ConfigError::OpTypeUnset { op: op.to_string() }),
        Some(op_type) if op_type != def.op_type() => {
            return Err(ConfigError::InvalidDef {
                op_type: def.op_type().to_string(),
                reason: format!("op `{op}` is configured as `{op_type}`"),
            })
        }
        Some(_) => {}
    }

    let sides = [
        (def.inputs(), &conf.inputs),
        (def.outputs(), &conf.outputs),
    ];
    for (declared, bound) in sides {
        for arg in declared {
            let count = bound.get(&arg.name).map_or(0, Vec::len);
            if arg.accepts(count) {
                continue;
            }
            if count == 0 {
                return Err(ConfigError::MissingBinding {
                    op: op.to_string(),
                    arg: arg.name.clone(),
                });
            }
            return Err(ConfigError::ArityMismatch {
                op: op.to_string(),
                arg: arg.name.clone(),
                expected: arg.describe_arity(),
                actual: count,
            });
        }
        if let Some(extra) = bound
            .keys()
            .find(|name| !declared.iter().any(|arg| &arg.name == *name))
        {
            return Err(ConfigError::UndeclaredArg {
                op: op.to_string(),
                op_type: def.op_type().to_string(),
                arg: extra.clone(),
            });
        }
    }

    let mut attrs = conf.attrs.clone();
    for attr in def.attrs() {
        match conf.attrs.value(&attr.name) {
            Some(value) if value.attr_type() != attr.attr_type => {
                return Err(ConfigError::AttrType {
                    op: op.to_string(),
                    name: attr.name.clone(),
                    expected: attr.attr_type,
                    actual: value.attr_type(),
                });
            }
            Some(_) => {}
            None => match &attr.default {
                Some(default) => attrs.set(attr.name.clone(), default.clone()),
                None => {
                    return Err(ConfigError::MissingAttr {
                        op: op.to_string(),
                        name: attr.name.clone(),
                    })
                }
            },
        }
    }
    if let Some((name, _)) = conf.attrs.iter().find(|(name, _)| def.attr(name).is_none()) {
        return Err(ConfigError::UndeclaredAttr {
            op: op.to_string(),
            name: name.to_string(),
        });
    }
    Ok(attrs)
}

fn bound_inputs(
    conf: &OperatorConf,
    provided: &BTreeMap<OpArg, TensorDesc>,
) -> Result<BTreeMap<OpArg, TensorDesc>, InferError> {
    conf.input_args()
        .into_iter()
        .map(|arg| match provided.get(&arg) {
            Some(desc) => Ok((arg, desc.clone())),
            None => Err(InferError::MissingInput {
                op: conf.name.clone(),
                arg: arg.bn(),
            }),
        })
        .collect()
}

fn run(
    def: &OpDef,
    conf: &OperatorConf,
    attrs: &AttrMap,
    inputs: &BTreeMap<OpArg, TensorDesc>,
    shape_fn: TensorDescInferFn,
    parallel_ctx: ParallelContext,
    sbp_signature: Option<&SbpSignature>,
) -> Result<BTreeMap<OpArg, TensorDesc>, InferError> {
    let mut ctx = InferContext::new(
        &conf.name,
        attrs,
        inputs,
        def.input_args(conf),
        def.output_args(conf),
        parallel_ctx,
        sbp_signature,
    );
    shape_fn(&mut ctx)?;
    (def.data_type_infer())(&mut ctx)?;

    let mut outputs = BTreeMap::new();
    for (arg, slot) in ctx.into_outputs() {
        let missing = if !slot.shape_set {
            Some("shape")
        } else if !slot.data_type_set {
            Some("data type")
        } else {
            None
        };
        if let Some(what) = missing {
            return Err(InferError::OutputNotInferred {
                op: conf.name.clone(),
                arg: arg.bn(),
                what,
            });
        }
        outputs.insert(arg, slot.desc);
    }
    Ok(outputs)
}

/// Infers logical output headers from logical input headers.
pub fn infer_logical(
    def: &OpDef,
    conf: &OperatorConf,
    inputs: &BTreeMap<OpArg, TensorDesc>,
) -> Result<BTreeMap<OpArg, TensorDesc>, InferError> {
    let attrs = validate_conf(def, conf)?;
    let inputs = bound_inputs(conf, inputs)?;
    run(
        def,
        conf,
        &attrs,
        &inputs,
        def.shape_infer().logical(),
        ParallelContext::single(),
        None,
    )
}

/// Infers per-worker output headers from per-worker input headers.
///
/// This is the form the kernel runtime uses: its input buffers already hold physical
/// headers.
pub fn infer_physical_outputs(
    def: &OpDef,
    conf: &OperatorConf,
    physical_inputs: &BTreeMap<OpArg, TensorDesc>,
    parallel_ctx: ParallelContext,
    sbp_signature: Option<&SbpSignature>,
) -> Result<BTreeMap<OpArg, TensorDesc>, InferError> {
    let attrs = validate_conf(def, conf)?;
    let inputs = bound_inputs(conf, physical_inputs)?;
    run(
        def,
        conf,
        &attrs,
        &inputs,
        def.shape_infer().physical(),
        parallel_ctx,
        sbp_signature,
    )
}

/// Slices every logical input by its assignment in `sbp_signature`, then infers the
/// physical outputs for worker `parallel_ctx.parallel_id()`.
///
/// A signature is only optional for a single worker, where physical equals logical.
pub fn infer_physical(
    def: &OpDef,
    conf: &OperatorConf,
    logical_inputs: &BTreeMap<OpArg, TensorDesc>,
    parallel_ctx: ParallelContext,
    sbp_signature: Option<&SbpSignature>,
) -> Result<PhysicalDescs, InferError> {
    let logical = bound_inputs(conf, logical_inputs)?;
    let mut inputs = BTreeMap::new();
    for (arg, desc) in logical {
        let sbp = match sbp_signature.and_then(|sig| sig.get(&arg)) {
            Some(sbp) => sbp,
            None if parallel_ctx.parallel_num() == 1 => SbpParallel::Broadcast,
            None => {
                return Err(InferError::MissingSbp {
                    op: conf.name.clone(),
                    arg: arg.bn(),
                })
            }
        };
        let shape = physical_shape(&desc.shape, sbp, &parallel_ctx).ok_or_else(|| {
            InferError::InvalidSplitAxis {
                op: conf.name.clone(),
                arg: arg.bn(),
                axis: sbp.split_axis().unwrap_or_default(),
                num_axes: desc.shape.num_axes(),
            }
        })?;
        inputs.insert(
            arg,
            TensorDesc {
                shape,
                ..desc
            },
        );
    }
    let outputs = infer_physical_outputs(def, conf, &inputs, parallel_ctx, sbp_signature)?;
    Ok(PhysicalDescs { inputs, outputs })
}

fn first_input(ctx: &InferContext<'_>) -> Result<OpArg, InferError> {
    ctx.inputs()
        .into_iter()
        .next()
        .ok_or_else(|| InferError::Check {
            op: ctx.op_name().to_string(),
            message: "unchanged inference needs at least one input".to_string(),
        })
}

/// Every output takes the shape and dynamic flag of the first declared input.
pub fn unchanged_shape(ctx: &mut InferContext<'_>) -> Result<(), InferError> {
    let first = first_input(ctx)?;
    let desc = ctx.input_desc(first.name(), first.index())?.clone();
    for out in ctx.outputs() {
        ctx.set_output_shape(out.name(), out.index(), desc.shape.clone())?;
        ctx.set_output_is_dynamic(out.name(), out.index(), desc.is_dynamic)?;
    }
    Ok(())
}

/// Every output takes the data type of the first declared input.
pub fn unchanged_data_type(ctx: &mut InferContext<'_>) -> Result<(), InferError> {
    let first = first_input(ctx)?;
    let data_type = ctx.input_data_type(first.name(), first.index())?;
    for out in ctx.outputs() {
        ctx.set_output_data_type(out.name(), out.index(), data_type)?;
    }
    Ok(())
}

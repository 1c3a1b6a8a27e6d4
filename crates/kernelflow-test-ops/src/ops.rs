//! Operator descriptors of the reference library.

use kernelflow::error::ConfigError;
use kernelflow::infer_ensure;
use kernelflow::op::{
    register_op, unchanged_data_type, unchanged_shape, ArgModifiers, InferContext, InferError,
    InputArgModifier, OpDefBuilder, OperatorConf, OutputArgModifier,
};
use kernelflow::sbp::{
    default_broadcast_to_broadcast, split_all_on_axis0, BalancedSplitter, DeviceType, SbpContext,
    SbpError, SbpParallel,
};
use kernelflow::tensor::{DataType, Shape};

fn ccrelu_shape(ctx: &mut InferContext<'_>) -> Result<(), InferError> {
    let in_shape = ctx.input_shape("in", 0)?.clone();
    ctx.set_output_shape("out", 0, in_shape)
}

fn ccrelu_grad_shape(ctx: &mut InferContext<'_>) -> Result<(), InferError> {
    let y_shape = ctx.input_shape("y", 0)?.clone();
    let dy_shape = ctx.input_shape("dy", 0)?;
    infer_ensure!(
        ctx,
        *dy_shape == y_shape,
        "dy shape {} does not match y shape {}",
        dy_shape,
        y_shape
    );
    ctx.set_output_shape("dx", 0, y_shape)
}

fn ccrelu_grad_data_type(ctx: &mut InferContext<'_>) -> Result<(), InferError> {
    let data_type = ctx.input_data_type("y", 0)?;
    ctx.set_output_data_type("dx", 0, data_type)
}

fn ccrelu_grad_sbp(ctx: &mut SbpContext<'_>) -> Result<(), SbpError> {
    let signature = ctx.new_builder().split(&ctx.all_args(), 0).build()?;
    ctx.add_signature(signature);
    Ok(())
}

fn test_reshape_shape(ctx: &mut InferContext<'_>) -> Result<(), InferError> {
    let in_shape = ctx.input_shape("in", 0)?.clone();
    let conf_shape: Shape = ctx.attr("shape")?;
    infer_ensure!(
        ctx,
        in_shape.num_axes() == conf_shape.num_axes(),
        "input {} and target {} differ in axis count",
        in_shape,
        conf_shape
    );
    ctx.set_output_shape("out", 0, conf_shape)
}

fn float_output(ctx: &mut InferContext<'_>) -> Result<(), InferError> {
    ctx.set_output_data_type("out", 0, DataType::Float)
}

fn test_source_shape(ctx: &mut InferContext<'_>) -> Result<(), InferError> {
    ctx.set_output_shape("out", 0, Shape::new([5]))
}

fn split_outputs_on_axis0(ctx: &mut SbpContext<'_>) -> Result<(), SbpError> {
    let signature = ctx.new_builder().split(ctx.outputs(), 0).build()?;
    ctx.add_signature(signature);
    Ok(())
}

fn multi_output_order_shape(ctx: &mut InferContext<'_>) -> Result<(), InferError> {
    let in_shape = ctx.input_shape("in", 0)?.clone();
    infer_ensure!(ctx, in_shape.num_axes() > 0, "input must have at least one axis");
    let last_axis = in_shape.num_axes() - 1;
    let Some(doubled) = in_shape.dims()[last_axis].checked_mul(2) else {
        return Err(InferError::Check {
            op: ctx.op_name().to_string(),
            message: format!("last axis of {in_shape} overflows when doubled"),
        });
    };
    let mut out2 = in_shape.clone();
    out2.set_dim(last_axis, doubled);
    ctx.set_output_shape("out1", 0, in_shape)?;
    ctx.set_output_shape("out2", 0, out2)
}

fn out_num(ctx: &InferContext<'_>) -> Result<usize, InferError> {
    let out_num: i64 = ctx.attr("out_num")?;
    usize::try_from(out_num).map_err(|_| InferError::Check {
        op: ctx.op_name().to_string(),
        message: format!("out_num must be non-negative, got {out_num}"),
    })
}

fn fixed_out_num_logical(ctx: &mut InferContext<'_>) -> Result<(), InferError> {
    let out_num = out_num(ctx)?;
    ctx.set_output_shape("out", 0, Shape::new([out_num]))
}

fn fixed_out_num_physical(ctx: &mut InferContext<'_>) -> Result<(), InferError> {
    let out_num = out_num(ctx)?;
    let parallel_ctx = *ctx.parallel_ctx();
    let splitter = BalancedSplitter::new(out_num, parallel_ctx.parallel_num()).ok_or_else(|| {
        InferError::Check {
            op: ctx.op_name().to_string(),
            message: "parallel_num must be at least 1".to_string(),
        }
    })?;
    let len = splitter.at(parallel_ctx.parallel_id()).len();
    ctx.set_output_shape("out", 0, Shape::new([len]))?;
    if parallel_ctx.parallel_num() > 1 {
        let out_sbp = ctx.sbp_parallel("out", 0)?;
        infer_ensure!(
            ctx,
            out_sbp == SbpParallel::Split(0),
            "output must be split on axis 0, got {}",
            out_sbp
        );
    }
    Ok(())
}

fn fixed_out_num_sbp(ctx: &mut SbpContext<'_>) -> Result<(), SbpError> {
    if ctx.device_type() == DeviceType::Cpu && ctx.parallel_num() > 1 {
        split_outputs_on_axis0(ctx)?;
    }
    Ok(())
}

fn multi_input_shape(ctx: &mut InferContext<'_>) -> Result<(), InferError> {
    let x1 = ctx.input_shape("x1", 0)?.clone();
    let x2 = ctx.input_shape("x2", 0)?;
    infer_ensure!(ctx, *x2 == x1, "x1 shape {} does not match x2 shape {}", x1, x2);
    ctx.set_output_shape("y", 0, x1)
}

fn multi_input_data_type(ctx: &mut InferContext<'_>) -> Result<(), InferError> {
    let data_type = ctx.input_data_type("x1", 0)?;
    ctx.set_output_data_type("y", 0, data_type)
}

/// One candidate per axis of `x1`, splitting every argument along it.
fn split_every_axis_of_x1(ctx: &mut SbpContext<'_>) -> Result<(), SbpError> {
    let num_axes = ctx.logical_input_desc("x1", 0)?.shape.num_axes();
    for axis in 0..num_axes {
        let signature = ctx
            .new_builder()
            .split(ctx.inputs(), axis)
            .split(ctx.outputs(), axis)
            .build()?;
        ctx.add_signature(signature);
    }
    Ok(())
}

fn multi_input_grad_shape(ctx: &mut InferContext<'_>) -> Result<(), InferError> {
    let x1 = ctx.input_shape("x1", 0)?.clone();
    let x2 = ctx.input_shape("x2", 0)?.clone();
    ctx.set_output_shape("x1_diff", 0, x1)?;
    ctx.set_output_shape("x2_diff", 0, x2)
}

fn multi_input_grad_data_type(ctx: &mut InferContext<'_>) -> Result<(), InferError> {
    let x1 = ctx.input_data_type("x1", 0)?;
    let x2 = ctx.input_data_type("x2", 0)?;
    ctx.set_output_data_type("x1_diff", 0, x1)?;
    ctx.set_output_data_type("x2_diff", 0, x2)
}

fn dynamic_source_shape(ctx: &mut InferContext<'_>) -> Result<(), InferError> {
    ctx.set_output_shape("out", 0, Shape::new([5]))?;
    ctx.set_output_is_dynamic("out", 0, true)
}

fn dynamic_source_modify(modifiers: &mut ArgModifiers<OutputArgModifier>, _conf: &OperatorConf) {
    if let Some(out) = modifiers.get("out", 0) {
        out.header_inferred_before_compute = false;
    }
}

/// The input is relu'd in place, so its producer must hand it over writable.
fn inplace_relu_modify(modifiers: &mut ArgModifiers<InputArgModifier>, _conf: &OperatorConf) {
    if let Some(input) = modifiers.get("in", 0) {
        input.is_mutable = true;
    }
}

fn data_type_attr(ctx: &mut InferContext<'_>) -> Result<(), InferError> {
    let data_type: DataType = ctx.attr("output_type")?;
    ctx.set_output_data_type("out", 0, data_type)
}

fn list_attr_shape(ctx: &mut InferContext<'_>) -> Result<(), InferError> {
    let out_shapes: Vec<Shape> = ctx.attr("out_shapes")?;
    let string_list: Vec<String> = ctx.attr("string_list")?;
    let outputs = ctx.output_size("out");
    infer_ensure!(
        ctx,
        out_shapes.len() >= outputs,
        "out_shapes has {} entries for {} outputs",
        out_shapes.len(),
        outputs
    );
    for (index, shape) in out_shapes.into_iter().take(outputs).enumerate() {
        ctx.set_output_shape("out", index, shape)?;
    }
    infer_ensure!(ctx, !string_list.is_empty(), "string_list must not be empty");
    Ok(())
}

fn list_attr_data_type(ctx: &mut InferContext<'_>) -> Result<(), InferError> {
    let out_types: Vec<DataType> = ctx.attr("out_types")?;
    let outputs = ctx.output_size("out");
    infer_ensure!(
        ctx,
        out_types.len() >= outputs,
        "out_types has {} entries for {} outputs",
        out_types.len(),
        outputs
    );
    for (index, data_type) in out_types.into_iter().take(outputs).enumerate() {
        ctx.set_output_data_type("out", index, data_type)?;
    }
    Ok(())
}

fn split_and_broadcast(ctx: &mut SbpContext<'_>) -> Result<(), SbpError> {
    split_all_on_axis0(ctx)?;
    default_broadcast_to_broadcast(ctx)
}

pub(crate) fn register_ops() -> Result<(), ConfigError> {
    register_op(
        OpDefBuilder::new("ccrelu")
            .input("in")
            .output("out")
            .tensor_desc_infer_fn(ccrelu_shape)
            .data_type_infer_fn(unchanged_data_type)
            .sbp_fn(split_all_on_axis0)
            .build()?,
    )?;
    register_op(
        OpDefBuilder::new("ccrelu_grad")
            .input("y")
            .input("dy")
            .output("dx")
            .tensor_desc_infer_fn(ccrelu_grad_shape)
            .data_type_infer_fn(ccrelu_grad_data_type)
            .sbp_fn(ccrelu_grad_sbp)
            .build()?,
    )?;
    register_op(
        OpDefBuilder::new("TestReshape")
            .input("in")
            .output("out")
            .attr::<Shape>("shape")
            .tensor_desc_infer_fn(test_reshape_shape)
            .data_type_infer_fn(unchanged_data_type)
            .sbp_fn(default_broadcast_to_broadcast)
            .build()?,
    )?;
    register_op(
        OpDefBuilder::new("TestSource")
            .output("out")
            .tensor_desc_infer_fn(test_source_shape)
            .data_type_infer_fn(float_output)
            .sbp_fn(split_outputs_on_axis0)
            .build()?,
    )?;
    register_op(
        OpDefBuilder::new("TestMultiOutputOrder")
            .input("in")
            .output("out1")
            .output("out2")
            .tensor_desc_infer_fn(multi_output_order_shape)
            .data_type_infer_fn(unchanged_data_type)
            .sbp_fn(split_all_on_axis0)
            .build()?,
    )?;
    register_op(
        OpDefBuilder::new("TestSourceMultiGpuFixedOutNum")
            .output("out")
            .attr::<i64>("out_num")
            .logical_tensor_desc_infer_fn(fixed_out_num_logical)
            .physical_tensor_desc_infer_fn(fixed_out_num_physical)
            .data_type_infer_fn(float_output)
            .sbp_fn(fixed_out_num_sbp)
            .build()?,
    )?;
    register_op(
        OpDefBuilder::new("TestMultiInput")
            .input("x1")
            .input("x2")
            .output("y")
            .tensor_desc_infer_fn(multi_input_shape)
            .data_type_infer_fn(multi_input_data_type)
            .sbp_fn(split_every_axis_of_x1)
            .build()?,
    )?;
    register_op(
        OpDefBuilder::new("TestMultiInputGrad")
            .input("x1")
            .input("x2")
            .input("y_diff")
            .output("x1_diff")
            .output("x2_diff")
            .tensor_desc_infer_fn(multi_input_grad_shape)
            .data_type_infer_fn(multi_input_grad_data_type)
            .sbp_fn(split_every_axis_of_x1)
            .build()?,
    )?;
    register_op(
        OpDefBuilder::new("TestDynamicSource")
            .output("out")
            .tensor_desc_infer_fn(dynamic_source_shape)
            .data_type_infer_fn(float_output)
            .sbp_fn(split_outputs_on_axis0)
            .output_arg_modify_fn(dynamic_source_modify)
            .build()?,
    )?;
    register_op(
        OpDefBuilder::new("TestRandomSource")
            .output("out")
            .attr::<i64>("seed")
            .tensor_desc_infer_fn(test_source_shape)
            .data_type_infer_fn(float_output)
            .sbp_fn(default_broadcast_to_broadcast)
            .build()?,
    )?;
    register_op(
        OpDefBuilder::new("TestDataTypeAttr")
            .input("in")
            .output("out")
            .attr::<DataType>("output_type")
            .tensor_desc_infer_fn(ccrelu_shape)
            .data_type_infer_fn(data_type_attr)
            .sbp_fn(default_broadcast_to_broadcast)
            .build()?,
    )?;
    register_op(
        OpDefBuilder::new("TestListDataTypeAndListShapeAndListStringAttr")
            .input("in")
            .output_with_num("out", 3)
            .attr::<Vec<Shape>>("out_shapes")
            .attr::<Vec<DataType>>("out_types")
            .attr::<Vec<String>>("string_list")
            .tensor_desc_infer_fn(list_attr_shape)
            .data_type_infer_fn(list_attr_data_type)
            .sbp_fn(default_broadcast_to_broadcast)
            .build()?,
    )?;
    register_op(
        OpDefBuilder::new("test_user_op_attr_auto_type")
            .input("in")
            .output("out")
            .attr::<i32>("int1")
            .attr::<i32>("int2")
            .tensor_desc_infer_fn(unchanged_shape)
            .data_type_infer_fn(unchanged_data_type)
            .sbp_fn(default_broadcast_to_broadcast)
            .build()?,
    )?;
    register_op(
        OpDefBuilder::new("cpu_only_relu_test")
            .input("in")
            .output("out")
            .tensor_desc_infer_fn(unchanged_shape)
            .data_type_infer_fn(unchanged_data_type)
            .sbp_fn(split_all_on_axis0)
            .cpu_only()
            .build()?,
    )?;
    register_op(
        OpDefBuilder::new("TestInplaceRelu")
            .input("in")
            .output("out")
            .tensor_desc_infer_fn(unchanged_shape)
            .data_type_infer_fn(unchanged_data_type)
            .sbp_fn(split_all_on_axis0)
            .input_arg_modify_fn(inplace_relu_modify)
            .build()?,
    )?;
    register_op(
        OpDefBuilder::new("model_diff_acc")
            .input("model_diff")
            .output("model_diff_acc")
            .attr_with_default("model_diff_num", 1i32)
            .tensor_desc_infer_fn(unchanged_shape)
            .data_type_infer_fn(unchanged_data_type)
            .sbp_fn(split_and_broadcast)
            .build()?,
    )?;
    Ok(())
}

use kernelflow::error::ConfigError;
use kernelflow::grad::{register_grad, GradError, UserOpWrapper};
use kernelflow::op::OperatorConf;

fn ccrelu_backward(
    op: &mut UserOpWrapper<'_>,
    add_op: &mut dyn FnMut(OperatorConf),
) -> Result<(), GradError> {
    if !op.need_gen_grad_tensor_for_op_input("in", 0) {
        return Ok(());
    }
    let grad_op = OperatorConf::builder(format!("{}_grad", op.op_name()))
        .op("ccrelu_grad")
        .input("y", op.output("out", 0)?.clone())
        .input("dy", op.grad_tensor_with_op_output("out", 0)?)
        .output("dx")
        .build();
    let dx = grad_op
        .output("dx", 0)
        .cloned()
        .ok_or_else(|| GradError::UnknownArg {
            op: grad_op.name.clone(),
            arg: "dx_0".to_string(),
        })?;
    op.bind_grad_tensor_with_op_input(dx, "in", 0)?;
    add_op(grad_op);
    Ok(())
}

fn multi_input_backward(
    op: &mut UserOpWrapper<'_>,
    add_op: &mut dyn FnMut(OperatorConf),
) -> Result<(), GradError> {
    if !op.need_gen_grad_tensor_for_op_input("x1", 0) && !op.need_gen_grad_tensor_for_op_input("x2", 0) {
        return Ok(());
    }
    let grad_op = OperatorConf::builder(format!("{}_grad", op.op_name()))
        .op("TestMultiInputGrad")
        .input("x1", op.input("x1", 0)?.clone())
        .input("x2", op.input("x2", 0)?.clone())
        .input("y_diff", op.grad_tensor_with_op_output("y", 0)?)
        .output("x1_diff")
        .output("x2_diff")
        .build();
    for (input, diff) in [("x1", "x1_diff"), ("x2", "x2_diff")] {
        let lbi = grad_op
            .output(diff, 0)
            .cloned()
            .ok_or_else(|| GradError::UnknownArg {
                op: grad_op.name.clone(),
                arg: format!("{diff}_0"),
            })?;
        op.bind_grad_tensor_with_op_input(lbi, input, 0)?;
    }
    add_op(grad_op);
    Ok(())
}

pub(crate) fn register_grads() -> Result<(), ConfigError> {
    register_grad("ccrelu", ccrelu_backward)?;
    register_grad("TestMultiInput", multi_input_backward)?;
    Ok(())
}

use std::collections::BTreeMap;

use kernelflow::grad::{generate_backward_ops, GradError, OpExprGrad, UserOpExprGrad};
use kernelflow::op::{LogicalBlobId, OpArg, OperatorConf};
use kernelflow::tensor::{DataType, Shape, TensorDesc};

fn setup() {
    kernelflow::logging::init_test_logging();
    kernelflow_test_ops::register().expect("test ops register");
}

fn relu_conf() -> OperatorConf {
    OperatorConf::builder("relu")
        .op("ccrelu")
        .input("in", LogicalBlobId::new("src", "out_0"))
        .output("out")
        .build()
}

fn add_conf() -> OperatorConf {
    OperatorConf::builder("add")
        .op("TestMultiInput")
        .input("x1", LogicalBlobId::new("a", "out_0"))
        .input("x2", LogicalBlobId::new("b", "out_0"))
        .output("y")
        .build()
}

fn loss_grad(arg: &str, index: usize) -> Option<LogicalBlobId> {
    Some(LogicalBlobId::new("loss_grad", format!("{arg}_{index}")))
}

fn float(dims: impl Into<Shape>) -> TensorDesc {
    TensorDesc::new(dims, DataType::Float)
}

#[test]
fn ccrelu_backward_emits_one_grad_op() {
    setup();
    let forward = relu_conf();
    let expansion = generate_backward_ops(&forward, &|_, _| true, &loss_grad).expect("expand");

    assert_eq!(expansion.ops.len(), 1);
    let grad = &expansion.ops[0];
    assert_eq!(grad.op_type(), Some("ccrelu_grad"));
    assert_eq!(grad.input("y", 0), forward.output("out", 0));
    assert_eq!(grad.input("dy", 0), loss_grad("out", 0).as_ref());
    assert_eq!(expansion.input_grad("in", 0), grad.output("dx", 0));
}

#[test]
fn no_gradient_needed_means_no_ops() {
    setup();
    let expansion = generate_backward_ops(&relu_conf(), &|_, _| false, &loss_grad).expect("expand");
    assert!(expansion.is_empty());
}

#[test]
fn only_requested_input_grads_are_bound() {
    setup();
    let needs_x1 = |arg: &str, _: usize| arg == "x1";
    let expansion = generate_backward_ops(&add_conf(), &needs_x1, &loss_grad).expect("expand");
    assert_eq!(expansion.ops.len(), 1);
    assert_eq!(expansion.ops[0].op_type(), Some("TestMultiInputGrad"));
    assert!(expansion.input_grad("x1", 0).is_some());
    assert!(expansion.input_grad("x2", 0).is_none());
}

#[test]
fn expansion_is_deterministic() {
    setup();
    let first = generate_backward_ops(&add_conf(), &|_, _| true, &loss_grad).expect("expand");
    let second = generate_backward_ops(&add_conf(), &|_, _| true, &loss_grad).expect("expand");
    assert_eq!(first, second);
}

#[test]
fn missing_output_grad_is_reported() {
    setup();
    let err = generate_backward_ops(&relu_conf(), &|_, _| true, &|_, _| None)
        .expect_err("no output gradient");
    assert!(matches!(err, GradError::MissingOutputGrad { .. }));
}

#[test]
fn op_without_generator_fails_only_when_grads_are_needed() {
    setup();
    let reshape = OperatorConf::builder("reshape")
        .op("TestReshape")
        .input("in", LogicalBlobId::new("src", "out_0"))
        .output("out")
        .attr("shape", Shape::new([4]))
        .build();
    let err = generate_backward_ops(&reshape, &|_, _| true, &loss_grad).expect_err("no generator");
    assert!(matches!(err, GradError::NotRegistered { .. }));
    assert!(generate_backward_ops(&reshape, &|_, _| false, &loss_grad)
        .expect("nothing to do")
        .is_empty());
}

#[test]
fn op_expr_grad_maps_output_grads_to_input_grads() {
    setup();
    let mut grad = UserOpExprGrad::new(add_conf()).expect("build op expr grad");
    assert_eq!(grad.fragment().ops.len(), 1);

    let y = OpArg::new("y", 0);
    let out_grads = BTreeMap::from([(y.clone(), float([2, 5]))]);
    let err = grad.do_backward(&out_grads).expect_err("not captured yet");
    assert!(matches!(err, GradError::NotCaptured { .. }));

    let inputs = BTreeMap::from([
        (OpArg::new("x1", 0), float([2, 5])),
        (OpArg::new("x2", 0), float([2, 5])),
    ]);
    let outputs = BTreeMap::from([(y, float([2, 5]))]);
    grad.capture(&inputs, &outputs).expect("capture");
    let in_grads = grad.do_backward(&out_grads).expect("backward");
    assert_eq!(in_grads, inputs);
}

#[test]
fn op_expr_grad_propagates_header_checks() {
    setup();
    let mut grad = UserOpExprGrad::new(relu_conf()).expect("build op expr grad");
    let inputs = BTreeMap::from([(OpArg::new("in", 0), float([4, 8]))]);
    let outputs = BTreeMap::from([(OpArg::new("out", 0), float([4, 8]))]);
    grad.capture(&inputs, &outputs).expect("capture");

    let good = BTreeMap::from([(OpArg::new("out", 0), float([4, 8]))]);
    assert_eq!(grad.do_backward(&good).expect("backward"), inputs);

    let bad = BTreeMap::from([(OpArg::new("out", 0), float([4, 7]))]);
    let err = grad.do_backward(&bad).expect_err("dy does not match y");
    assert!(matches!(err, GradError::Infer(_)));
}

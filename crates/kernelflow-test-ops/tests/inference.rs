use std::collections::BTreeMap;

use kernelflow::op::{infer_logical, infer_physical, op_def, InferError, LogicalBlobId, OpArg, OperatorConf};
use kernelflow::sbp::{physical_shape, ParallelContext, SbpParallel, SbpSignature};
use kernelflow::tensor::{DataType, Shape, TensorDesc};

fn setup() {
    kernelflow::logging::init_test_logging();
    kernelflow_test_ops::register().expect("test ops register");
}

fn lbi(op: &str) -> LogicalBlobId {
    LogicalBlobId::new(op, "out_0")
}

fn float(dims: impl Into<Shape>) -> TensorDesc {
    TensorDesc::new(dims, DataType::Float)
}

fn inputs(entries: &[(&str, TensorDesc)]) -> BTreeMap<OpArg, TensorDesc> {
    entries
        .iter()
        .map(|(name, desc)| (OpArg::new(*name, 0), desc.clone()))
        .collect()
}

fn output(outputs: &BTreeMap<OpArg, TensorDesc>, name: &str) -> TensorDesc {
    outputs
        .get(&OpArg::new(name, 0))
        .cloned()
        .unwrap_or_else(|| panic!("output {name} not inferred"))
}

#[test]
fn ccrelu_output_matches_input() {
    setup();
    let def = op_def("ccrelu").expect("ccrelu registered");
    let conf = OperatorConf::builder("relu")
        .op("ccrelu")
        .input("in", lbi("src"))
        .output("out")
        .build();
    let outputs = infer_logical(&def, &conf, &inputs(&[("in", float([4, 8]))])).expect("infer");
    assert_eq!(output(&outputs, "out"), float([4, 8]));
}

#[test]
fn ccrelu_grad_rejects_mismatched_dy() {
    setup();
    let def = op_def("ccrelu_grad").expect("ccrelu_grad registered");
    let conf = OperatorConf::builder("relu_grad")
        .op("ccrelu_grad")
        .input("y", lbi("relu"))
        .input("dy", lbi("loss"))
        .output("dx")
        .build();
    let ok = infer_logical(
        &def,
        &conf,
        &inputs(&[("y", float([4, 8])), ("dy", float([4, 8]))]),
    )
    .expect("matching shapes infer");
    assert_eq!(output(&ok, "dx"), float([4, 8]));

    let err = infer_logical(
        &def,
        &conf,
        &inputs(&[("y", float([4, 8])), ("dy", float([4, 7]))]),
    )
    .expect_err("mismatched dy");
    assert!(matches!(err, InferError::Check { .. }));
}

#[test]
fn reshape_takes_target_shape_and_checks_rank() {
    setup();
    let def = op_def("TestReshape").expect("TestReshape registered");
    let conf = |dims: Vec<usize>| {
        OperatorConf::builder("reshape")
            .op("TestReshape")
            .input("in", lbi("src"))
            .output("out")
            .attr("shape", Shape::new(dims))
            .build()
    };
    let outputs = infer_logical(&def, &conf(vec![3, 2]), &inputs(&[("in", float([2, 3]))]))
        .expect("same rank reshapes");
    assert_eq!(output(&outputs, "out"), float([3, 2]));

    let err = infer_logical(&def, &conf(vec![6]), &inputs(&[("in", float([2, 3]))]))
        .expect_err("rank mismatch");
    assert!(matches!(err, InferError::Check { .. }));
}

#[test]
fn identity_shape_inference_is_a_fixed_point() {
    setup();
    let def = op_def("test_user_op_attr_auto_type").expect("registered");
    let conf = OperatorConf::builder("auto")
        .op("test_user_op_attr_auto_type")
        .input("in", lbi("src"))
        .output("out")
        .attr("int1", 1i32)
        .attr("int2", 2i32)
        .build();
    let desc = TensorDesc::new([3, 1, 4], DataType::Int32).dynamic(true);
    let first = output(
        &infer_logical(&def, &conf, &inputs(&[("in", desc.clone())])).expect("infer"),
        "out",
    );
    let second = output(
        &infer_logical(&def, &conf, &inputs(&[("in", first.clone())])).expect("infer"),
        "out",
    );
    assert_eq!(first, desc);
    assert_eq!(second, first);
}

#[test]
fn data_type_attr_drives_output_type() {
    setup();
    let def = op_def("TestDataTypeAttr").expect("registered");
    let conf = OperatorConf::builder("cast")
        .op("TestDataTypeAttr")
        .input("in", lbi("src"))
        .output("out")
        .attr("output_type", DataType::Double)
        .build();
    let outputs = infer_logical(&def, &conf, &inputs(&[("in", float([2, 2]))])).expect("infer");
    assert_eq!(output(&outputs, "out"), TensorDesc::new([2, 2], DataType::Double));
}

#[test]
fn list_attrs_describe_every_output() {
    setup();
    let def = op_def("TestListDataTypeAndListShapeAndListStringAttr").expect("registered");
    let build = |strings: Vec<String>| {
        OperatorConf::builder("lists")
            .op("TestListDataTypeAndListShapeAndListStringAttr")
            .input("in", lbi("src"))
            .output_num("out", 3)
            .attr(
                "out_shapes",
                vec![Shape::new([1]), Shape::new([2, 2]), Shape::new([3])],
            )
            .attr(
                "out_types",
                vec![DataType::Float, DataType::Int32, DataType::Double],
            )
            .attr("string_list", strings)
            .build()
    };
    let outputs = infer_logical(
        &def,
        &build(vec!["a".to_string()]),
        &inputs(&[("in", float([1]))]),
    )
    .expect("infer");
    assert_eq!(outputs.len(), 3);
    assert_eq!(
        outputs.get(&OpArg::new("out", 1)),
        Some(&TensorDesc::new([2, 2], DataType::Int32))
    );
    assert_eq!(
        outputs.get(&OpArg::new("out", 2)),
        Some(&TensorDesc::new([3], DataType::Double))
    );

    let err = infer_logical(&def, &build(Vec::new()), &inputs(&[("in", float([1]))]))
        .expect_err("empty string list");
    assert!(matches!(err, InferError::Check { .. }));
}

#[test]
fn multi_output_order_doubles_last_axis_of_second_output() {
    setup();
    let def = op_def("TestMultiOutputOrder").expect("registered");
    let conf = OperatorConf::builder("order")
        .op("TestMultiOutputOrder")
        .input("in", lbi("src"))
        .output("out1")
        .output("out2")
        .build();
    let outputs = infer_logical(&def, &conf, &inputs(&[("in", float([2, 3]))])).expect("infer");
    assert_eq!(output(&outputs, "out1"), float([2, 3]));
    assert_eq!(output(&outputs, "out2"), float([2, 6]));

    let err = infer_logical(&def, &conf, &inputs(&[("in", float([1, usize::MAX]))]))
        .expect_err("doubling overflows");
    assert!(matches!(err, InferError::Check { .. }));
}

#[test]
fn split_physical_shapes_sum_to_logical() {
    let logical = Shape::new([10, 3]);
    for parallel_num in 1..=4 {
        let mut total = 0;
        for ctx in ParallelContext::all(parallel_num) {
            let shape = physical_shape(&logical, SbpParallel::Split(0), &ctx).expect("axis 0 exists");
            assert_eq!(shape.dims()[1], 3);
            total += shape.dims()[0];
        }
        assert_eq!(total, 10);
    }
}

#[test]
fn fixed_out_num_source_is_balanced_across_workers() {
    setup();
    let def = op_def("TestSourceMultiGpuFixedOutNum").expect("registered");
    let conf = OperatorConf::builder("fixed")
        .op("TestSourceMultiGpuFixedOutNum")
        .output("out")
        .attr("out_num", 10i64)
        .build();
    let logical = infer_logical(&def, &conf, &BTreeMap::new()).expect("logical infer");
    assert_eq!(output(&logical, "out"), float([10]));

    let out_arg = OpArg::new("out", 0);
    let signature = SbpSignature::uniform([&out_arg], SbpParallel::Split(0));
    let lens: Vec<usize> = ParallelContext::all(4)
        .map(|ctx| {
            let physical = infer_physical(&def, &conf, &BTreeMap::new(), ctx, Some(&signature))
                .expect("physical infer");
            output(&physical.outputs, "out").shape.dims()[0]
        })
        .collect();
    assert_eq!(lens, [3, 3, 2, 2]);

    let broadcast = SbpSignature::uniform([&out_arg], SbpParallel::Broadcast);
    let ctx = ParallelContext::new(4, 0).expect("valid context");
    let err = infer_physical(&def, &conf, &BTreeMap::new(), ctx, Some(&broadcast))
        .expect_err("output must be split");
    assert!(matches!(err, InferError::Check { .. }));
}

#[test]
fn physical_inputs_follow_the_signature() {
    setup();
    let def = op_def("ccrelu").expect("registered");
    let conf = OperatorConf::builder("relu")
        .op("ccrelu")
        .input("in", lbi("src"))
        .output("out")
        .build();
    let args = [OpArg::new("in", 0), OpArg::new("out", 0)];
    let signature = SbpSignature::uniform(&args, SbpParallel::Split(0));
    let ctx = ParallelContext::new(3, 2).expect("valid context");
    let physical = infer_physical(&def, &conf, &inputs(&[("in", float([8, 2]))]), ctx, Some(&signature))
        .expect("physical infer");
    assert_eq!(physical.inputs.get(&args[0]), Some(&float([2, 2])));
    assert_eq!(output(&physical.outputs, "out"), float([2, 2]));

    let err = infer_physical(&def, &conf, &inputs(&[("in", float([8, 2]))]), ctx, None)
        .expect_err("several workers need a signature");
    assert!(matches!(err, InferError::MissingSbp { .. }));
}

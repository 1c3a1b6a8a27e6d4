use std::collections::BTreeMap;
use std::sync::Arc;

use kernelflow::kernel::{construct_kernel, KernelConf, LaunchContext};
use kernelflow::op::{op_def, LogicalBlobId, OpArg, OperatorConf};
use kernelflow::sbp::{
    candidate_signatures, reconstruct, select_signature, shard, HostShard, ParallelContext,
    ParallelDesc, SbpError, SbpParallel, SbpSignature,
};
use kernelflow::tensor::{BlobHandle, BlobMap, DataType, Shape, TensorDesc};
use kernelflow::session::SessionError;
use kernelflow::{DeviceType, JobConfig, SessionConfig, SessionContext};

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

fn unary(name: &str, op_type: &str) -> OperatorConf {
    OperatorConf::builder(name)
        .op(op_type)
        .input("in", lbi("src"))
        .output("out")
        .build()
}

fn source(name: &str, op_type: &str) -> OperatorConf {
    OperatorConf::builder(name).op(op_type).output("out").build()
}

fn candidates(
    conf: &OperatorConf,
    inputs: &BTreeMap<OpArg, TensorDesc>,
    placement: ParallelDesc,
) -> Result<Vec<SbpSignature>, SbpError> {
    let def = op_def(conf.op_type().expect("op type set")).expect("op registered");
    candidate_signatures(&def, conf, inputs, placement)
}

fn single_input(desc: TensorDesc) -> BTreeMap<OpArg, TensorDesc> {
    BTreeMap::from([(OpArg::new("in", 0), desc)])
}

#[test]
fn cpu_only_op_has_no_gpu_candidates() {
    setup();
    let conf = unary("relu", "cpu_only_relu_test");
    let inputs = single_input(float([8, 4]));

    let single = candidates(&conf, &inputs, ParallelDesc::cpu(1)).expect("cpu x1");
    assert_eq!(single.len(), 1);
    assert!(single[0].iter().all(|(_, sbp)| sbp == SbpParallel::Broadcast));

    let gpu = candidates(&conf, &inputs, ParallelDesc::gpu(4)).expect("gpu x4");
    assert!(gpu.is_empty());

    let cpu = candidates(&conf, &inputs, ParallelDesc::cpu(4)).expect("cpu x4");
    assert_eq!(cpu.len(), 1);
    assert_eq!(cpu[0].get(&OpArg::new("in", 0)), Some(SbpParallel::Split(0)));
}

#[test]
fn session_devices_drive_cpu_only_placement() {
    setup();
    let mut session = SessionContext::new();
    session
        .try_init(&SessionConfig {
            process_num: 4,
            ..SessionConfig::default()
        })
        .expect("session init");
    let conf = unary("relu", "cpu_only_relu_test");
    let inputs = single_input(float([8, 4]));

    let placement = session.parallel_desc(DeviceType::Cpu).expect("cpu placement");
    let found = candidates(&conf, &inputs, placement).expect("candidates");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get(&OpArg::new("out", 0)), Some(SbpParallel::Split(0)));
    assert!(matches!(
        session.parallel_desc(DeviceType::Gpu),
        Err(SessionError::NoDevices { .. })
    ));
}

#[test]
fn zero_workers_is_an_invalid_placement() {
    setup();
    let err = candidates(
        &unary("relu", "ccrelu"),
        &single_input(float([8])),
        ParallelDesc::cpu(0),
    )
    .expect_err("zero workers");
    assert!(matches!(err, SbpError::InvalidPlacement { .. }));
}

#[test]
fn scalar_input_has_no_split_candidates() {
    setup();
    let conf = unary("relu", "ccrelu");
    let scalar = single_input(float(Vec::<usize>::new()));

    let found = candidates(&conf, &scalar, ParallelDesc::cpu(4)).expect("scalar x4");
    assert!(found.is_empty());
    assert_eq!(candidates(&conf, &scalar, ParallelDesc::cpu(1)).expect("scalar x1").len(), 1);
}

#[test]
fn multi_input_proposes_one_signature_per_axis() {
    setup();
    let conf = OperatorConf::builder("add")
        .op("TestMultiInput")
        .input("x1", lbi("a"))
        .input("x2", lbi("b"))
        .output("y")
        .build();
    let inputs = BTreeMap::from([
        (OpArg::new("x1", 0), float([4, 6])),
        (OpArg::new("x2", 0), float([4, 6])),
    ]);
    let found = candidates(&conf, &inputs, ParallelDesc::cpu(2)).expect("candidates");
    let axes: Vec<Option<usize>> = found
        .iter()
        .map(|sig| sig.get(&OpArg::new("y", 0)).and_then(SbpParallel::split_axis))
        .collect();
    assert_eq!(axes, [Some(0), Some(1)]);

    let producers = BTreeMap::from([(OpArg::new("x2", 0), SbpParallel::Split(1))]);
    let chosen = select_signature(&found, &producers).expect("axis 1 matches");
    assert_eq!(chosen.get(&OpArg::new("x1", 0)), Some(SbpParallel::Split(1)));
}

#[test]
fn source_splits_must_cover_every_worker() {
    setup();
    let none = BTreeMap::new();
    let fixed = source("src", "TestSource");
    assert_eq!(candidates(&fixed, &none, ParallelDesc::cpu(4)).expect("x4").len(), 1);
    assert!(candidates(&fixed, &none, ParallelDesc::cpu(8)).expect("x8").is_empty());

    let dynamic = source("dyn", "TestDynamicSource");
    assert_eq!(candidates(&dynamic, &none, ParallelDesc::cpu(8)).expect("x8").len(), 1);
}

#[test]
fn fixed_out_num_source_only_splits_on_cpu() {
    setup();
    let conf = OperatorConf::builder("fixed")
        .op("TestSourceMultiGpuFixedOutNum")
        .output("out")
        .attr("out_num", 10i64)
        .build();
    let none = BTreeMap::new();
    assert_eq!(candidates(&conf, &none, ParallelDesc::cpu(2)).expect("cpu").len(), 1);
    assert!(candidates(&conf, &none, ParallelDesc::gpu(2)).expect("gpu").is_empty());
}

#[test]
fn model_diff_acc_offers_split_then_broadcast() {
    setup();
    let conf = OperatorConf::builder("acc")
        .op("model_diff_acc")
        .input("model_diff", lbi("diff"))
        .output("model_diff_acc")
        .build();
    let inputs = BTreeMap::from([(OpArg::new("model_diff", 0), float([6]))]);
    let found = candidates(&conf, &inputs, ParallelDesc::cpu(3)).expect("candidates");
    let out = OpArg::new("model_diff_acc", 0);
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].get(&out), Some(SbpParallel::Split(0)));
    assert_eq!(found[1].get(&out), Some(SbpParallel::Broadcast));
}

fn run_ccrelu(conf: &KernelConf, input: &HostShard) -> HostShard {
    let job = Arc::new(JobConfig::default());
    let mut kernel = construct_kernel(job, conf.clone()).expect("construct ccrelu");
    let blobs = BlobMap::new()
        .with(BlobHandle::from_values("in_0", input.shape().clone(), input.values()).expect("input"))
        .with(BlobHandle::new("out_0", float(input.shape().clone())));
    let launched = kernel.launch(&LaunchContext::cpu(0), blobs).expect("launch");
    let out = launched.blobs.get("out_0").expect("out blob");
    HostShard::new(out.shape().clone(), out.read::<f32>().expect("read")).expect("shard")
}

#[test]
fn split_ccrelu_reconstructs_single_worker_result() {
    setup();
    let op_conf = unary("relu", "ccrelu");
    let logical = HostShard::new(
        Shape::new([7, 3]),
        (0..21).map(|v| v as f32 - 10.0).collect(),
    )
    .expect("logical input");
    let expected = run_ccrelu(
        &KernelConf::new(op_conf.clone()).with_need_do_shape(true),
        &logical,
    );

    let parallel_num = 3;
    let found = candidates(
        &op_conf,
        &single_input(float(logical.shape().clone())),
        ParallelDesc::cpu(parallel_num),
    )
    .expect("candidates");
    let signature = found.first().expect("ccrelu splits").clone();
    let in_sbp = signature.get(&OpArg::new("in", 0)).expect("input assigned");
    let out_sbp = signature.get(&OpArg::new("out", 0)).expect("output assigned");

    let shards = shard(&logical, in_sbp, parallel_num).expect("shard input");
    let outputs: Vec<HostShard> = ParallelContext::all(parallel_num)
        .zip(&shards)
        .map(|(ctx, input)| {
            let conf = KernelConf::new(op_conf.clone())
                .with_need_do_shape(true)
                .with_parallel(ctx, signature.clone());
            run_ccrelu(&conf, input)
        })
        .collect();
    let rebuilt = reconstruct(&outputs, out_sbp).expect("reconstruct output");
    assert_eq!(rebuilt, expected);
}

//! Enumerates, validates and selects sharding signatures for one operator instance.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, warn};

use super::context::SbpContext;
use super::parallel::{ParallelDesc, SbpParallel, SbpSignature};
use crate::error::ConfigError;
use crate::op::{infer_logical, validate_conf, InferError, OpArg, OpDef, OperatorConf};
use crate::tensor::TensorDesc;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SbpError {
    #[error("op `{op}`: malformed signature {signature}: {reason}")]
    Malformed {
        op: String,
        signature: String,
        reason: String,
    },

    #[error("`{arg}` assigned both {first} and {second} in one signature")]
    Conflict {
        arg: String,
        first: SbpParallel,
        second: SbpParallel,
    },

    #[error("op `{op}`: invalid placement: {reason}")]
    InvalidPlacement { op: String, reason: String },

    #[error(transparent)]
    Infer(#[from] InferError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn check_complete(op: &str, signature: &SbpSignature, args: &[OpArg]) -> Result<(), SbpError> {
    let malformed = |reason: String| SbpError::Malformed {
        op: op.to_string(),
        signature: signature.to_string(),
        reason,
    };
    if let Some(missing) = args.iter().find(|arg| signature.get(arg).is_none()) {
        return Err(malformed(format!("`{missing}` is not assigned")));
    }
    if let Some((extra, _)) = signature.iter().find(|(arg, _)| !args.contains(arg)) {
        return Err(malformed(format!("`{extra}` is not an argument of the op")));
    }
    Ok(())
}

/// First argument split on an axis its logical tensor does not have.
fn split_beyond_rank<'a>(
    signature: &'a SbpSignature,
    ranks: &BTreeMap<OpArg, usize>,
) -> Option<(&'a OpArg, usize, usize)> {
    signature.iter().find_map(|(arg, sbp)| {
        let axis = sbp.split_axis()?;
        let rank = ranks.get(arg).copied().unwrap_or_default();
        (axis >= rank).then_some((arg, axis, rank))
    })
}

/// A source op's split output must leave no worker without data, unless the output
/// is dynamic and its logical extent is only an upper bound.
fn coverable_by_workers(
    signature: &SbpSignature,
    outputs: &BTreeMap<OpArg, TensorDesc>,
    parallel_num: usize,
) -> bool {
    outputs.iter().all(|(arg, desc)| match signature.get(arg) {
        Some(SbpParallel::Split(axis)) => {
            desc.is_dynamic || desc.shape.dim(axis).is_some_and(|extent| extent >= parallel_num)
        }
        _ => true,
    })
}

/// Admissible signatures for `conf` placed on `parallel_desc`, in first-proposed order.
///
/// An op restricted to another device yields no candidates, and a single worker
/// always yields exactly the all-broadcast signature. An empty result is not an
/// error: the caller rejects the placement.
pub fn candidate_signatures(
    def: &OpDef,
    conf: &OperatorConf,
    logical_inputs: &BTreeMap<OpArg, TensorDesc>,
    parallel_desc: ParallelDesc,
) -> Result<Vec<SbpSignature>, SbpError> {
    let attrs = validate_conf(def, conf)?;
    if parallel_desc.parallel_num == 0 {
        return Err(SbpError::InvalidPlacement {
            op: conf.name.clone(),
            reason: "parallel_num must be at least 1".to_string(),
        });
    }
    if !def.supports_device(parallel_desc.device_type) {
        debug!(op = %conf.name, device = %parallel_desc.device_type, "op not supported on device");
        return Ok(Vec::new());
    }

    let inputs = def.input_args(conf);
    let outputs = def.output_args(conf);
    if parallel_desc.parallel_num == 1 {
        return Ok(vec![SbpSignature::uniform(
            inputs.iter().chain(outputs.iter()),
            SbpParallel::Broadcast,
        )]);
    }

    let logical_outputs = infer_logical(def, conf, logical_inputs)?;
    let mut ranks: BTreeMap<OpArg, usize> = logical_outputs
        .iter()
        .map(|(arg, desc)| (arg.clone(), desc.shape.num_axes()))
        .collect();
    for arg in &inputs {
        if let Some(desc) = logical_inputs.get(arg) {
            ranks.insert(arg.clone(), desc.shape.num_axes());
        }
    }

    let mut ctx = SbpContext::new(
        &conf.name,
        &attrs,
        inputs.clone(),
        outputs.clone(),
        logical_inputs,
        parallel_desc,
    );
    (def.sbp_fn())(&mut ctx)?;
    let proposed = ctx.into_candidates();

    let args: Vec<OpArg> = inputs.into_iter().chain(outputs).collect();
    let mut candidates: Vec<SbpSignature> = Vec::with_capacity(proposed.len());
    for signature in proposed {
        check_complete(&conf.name, &signature, &args)?;
        if let Some((arg, axis, rank)) = split_beyond_rank(&signature, &ranks) {
            debug!(
                op = %conf.name,
                %signature,
                %arg,
                axis,
                rank,
                "dropping signature that splits a missing axis"
            );
            continue;
        }
        if def.is_source()
            && !coverable_by_workers(&signature, &logical_outputs, parallel_desc.parallel_num)
        {
            warn!(
                op = %conf.name,
                %signature,
                parallel_num = parallel_desc.parallel_num,
                "dropping split signature that leaves workers without data"
            );
            continue;
        }
        if !candidates.contains(&signature) {
            candidates.push(signature);
        }
    }
    debug!(op = %conf.name, count = candidates.len(), "inferred sbp candidates");
    Ok(candidates)
}

/// First candidate whose assignments agree with every producer's output assignment.
///
/// `None` means no candidate is compatible with its neighbours and the placement
/// must be rejected; no fallback signature is invented.
pub fn select_signature<'a>(
    candidates: &'a [SbpSignature],
    producer_sbps: &BTreeMap<OpArg, SbpParallel>,
) -> Option<&'a SbpSignature> {
    candidates.iter().find(|signature| {
        producer_sbps
            .iter()
            .all(|(arg, sbp)| signature.get(arg) == Some(*sbp))
    })
}

/// Every argument broadcast.
pub fn default_broadcast_to_broadcast(ctx: &mut SbpContext<'_>) -> Result<(), SbpError> {
    let signature = ctx
        .new_builder()
        .broadcast(ctx.inputs())
        .broadcast(ctx.outputs())
        .build()?;
    ctx.add_signature(signature);
    Ok(())
}

/// Every argument split on axis 0.
pub fn split_all_on_axis0(ctx: &mut SbpContext<'_>) -> Result<(), SbpError> {
    let signature = ctx
        .new_builder()
        .split(ctx.inputs(), 0)
        .split(ctx.outputs(), 0)
        .build()?;
    ctx.add_signature(signature);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{unchanged_data_type, unchanged_shape, LogicalBlobId, OpDefBuilder};
    use crate::tensor::{DataType, Shape};

    fn split_and_broadcast(ctx: &mut SbpContext<'_>) -> Result<(), SbpError> {
        split_all_on_axis0(ctx)?;
        default_broadcast_to_broadcast(ctx)?;
        split_all_on_axis0(ctx)
    }

    fn out_of_rank(ctx: &mut SbpContext<'_>) -> Result<(), SbpError> {
        let signature = ctx
            .new_builder()
            .split(ctx.inputs(), 5)
            .split(ctx.outputs(), 5)
            .build()?;
        ctx.add_signature(signature);
        Ok(())
    }

    fn incomplete(ctx: &mut SbpContext<'_>) -> Result<(), SbpError> {
        let signature = ctx.new_builder().broadcast(ctx.inputs()).build()?;
        ctx.add_signature(signature);
        Ok(())
    }

    fn identity(sbp_fn: crate::op::SbpFn) -> OpDef {
        OpDefBuilder::new("sbp_test_identity")
            .input("in")
            .output("out")
            .tensor_desc_infer_fn(unchanged_shape)
            .data_type_infer_fn(unchanged_data_type)
            .sbp_fn(sbp_fn)
            .build()
            .unwrap()
    }

    fn conf() -> OperatorConf {
        OperatorConf::builder("id")
            .op("sbp_test_identity")
            .input("in", LogicalBlobId::new("src", "out_0"))
            .output("out")
            .build()
    }

    fn inputs() -> BTreeMap<OpArg, TensorDesc> {
        BTreeMap::from([(
            OpArg::new("in", 0),
            TensorDesc::new(Shape::new([8, 4]), DataType::Float),
        )])
    }

    #[test]
    fn duplicates_are_removed_in_order() {
        let def = identity(split_and_broadcast);
        let candidates =
            candidate_signatures(&def, &conf(), &inputs(), ParallelDesc::cpu(2)).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(
            candidates[0].get(&OpArg::new("out", 0)),
            Some(SbpParallel::Split(0))
        );
        assert_eq!(
            candidates[1].get(&OpArg::new("in", 0)),
            Some(SbpParallel::Broadcast)
        );
    }

    #[test]
    fn single_worker_collapses_to_broadcast() {
        let def = identity(split_and_broadcast);
        let candidates =
            candidate_signatures(&def, &conf(), &inputs(), ParallelDesc::gpu(1)).unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0]
            .iter()
            .all(|(_, sbp)| sbp == SbpParallel::Broadcast));
    }

    #[test]
    fn out_of_rank_splits_are_dropped() {
        let candidates =
            candidate_signatures(&identity(out_of_rank), &conf(), &inputs(), ParallelDesc::cpu(2))
                .unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn malformed_candidates_are_errors() {
        let err = candidate_signatures(&identity(incomplete), &conf(), &inputs(), ParallelDesc::cpu(2))
            .unwrap_err();
        assert!(err.to_string().contains("`out_0` is not assigned"));
    }

    #[test]
    fn selection_follows_producers() {
        let def = identity(split_and_broadcast);
        let candidates =
            candidate_signatures(&def, &conf(), &inputs(), ParallelDesc::cpu(2)).unwrap();

        let producers = BTreeMap::from([(OpArg::new("in", 0), SbpParallel::Broadcast)]);
        let chosen = select_signature(&candidates, &producers).unwrap();
        assert_eq!(chosen, &candidates[1]);

        let producers = BTreeMap::from([(OpArg::new("in", 0), SbpParallel::PartialSum)]);
        assert!(select_signature(&candidates, &producers).is_none());
    }
}

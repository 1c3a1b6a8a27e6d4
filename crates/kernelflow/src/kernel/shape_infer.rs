use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::conf::KernelConf;
use super::error::KernelError;
use crate::op::{infer_physical_outputs, OpArg, OpDef, OperatorConf};
use crate::sbp::{ParallelContext, SbpSignature};
use crate::tensor::{BlobMap, TensorDesc};

/// Re-runs physical header inference at launch time and writes the results into the
/// output blobs through their active checkers.
///
/// The result for the most recent input headers is kept, so repeated launches with
/// unchanged inputs skip the callbacks.
#[derive(Debug)]
pub struct RuntimeShapeInferHelper {
    op_def: Arc<OpDef>,
    op_conf: OperatorConf,
    parallel_ctx: ParallelContext,
    sbp_signature: Option<SbpSignature>,
    last: Option<(Vec<TensorDesc>, BTreeMap<OpArg, TensorDesc>)>,
}

impl RuntimeShapeInferHelper {
    pub fn new(op_def: Arc<OpDef>, conf: &KernelConf) -> Self {
        RuntimeShapeInferHelper {
            op_def,
            op_conf: conf.op_conf.clone(),
            parallel_ctx: conf.parallel_ctx,
            sbp_signature: conf.sbp_signature.clone(),
            last: None,
        }
    }

    fn op(&self) -> String {
        self.op_conf.name.clone()
    }

    pub fn infer_shape(&mut self, blobs: &mut BlobMap) -> Result<(), KernelError> {
        let mut inputs = BTreeMap::new();
        for arg in self.op_conf.input_args() {
            let bn = arg.bn();
            let blob = blobs.get(&bn).ok_or_else(|| KernelError::MissingBlob {
                op: self.op(),
                bn: bn.clone(),
            })?;
            inputs.insert(arg, blob.desc().clone());
        }

        let key: Vec<TensorDesc> = inputs.values().cloned().collect();
        let outputs = match &self.last {
            Some((cached, outputs)) if *cached == key => outputs.clone(),
            _ => {
                let outputs = infer_physical_outputs(
                    &self.op_def,
                    &self.op_conf,
                    &inputs,
                    self.parallel_ctx,
                    self.sbp_signature.as_ref(),
                )
                .map_err(|source| KernelError::Infer {
                    op: self.op(),
                    source,
                })?;
                debug!(op = %self.op_conf.name, "refreshed runtime header inference");
                self.last = Some((key, outputs.clone()));
                outputs
            }
        };

        for (arg, desc) in outputs {
            let bn = arg.bn();
            let blob = blobs.get_mut(&bn).ok_or_else(|| KernelError::MissingBlob {
                op: self.op(),
                bn: bn.clone(),
            })?;
            if blob.data_type() != desc.data_type {
                return Err(KernelError::HeaderMismatch {
                    op: self.op(),
                    bn,
                    allocated: blob.data_type(),
                    inferred: desc.data_type,
                });
            }
            let op = self.op();
            blob.set_shape(desc.shape)
                .map_err(|source| KernelError::Blob { op: op.clone(), source })?;
            if blob.desc().is_dynamic != desc.is_dynamic {
                blob.set_dynamic(desc.is_dynamic)
                    .map_err(|source| KernelError::Blob { op, source })?;
            }
        }
        Ok(())
    }
}

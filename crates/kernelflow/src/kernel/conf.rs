use std::collections::BTreeMap;

use crate::error::ConfigError;
use crate::op::{op_def, LogicalBlobId, OpArg, OpDef, OperatorConf};
use crate::sbp::{ParallelContext, SbpSignature};

/// Per-node kernel configuration produced by the graph compiler.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelConf {
    pub op_conf: OperatorConf,
    pub parallel_ctx: ParallelContext,
    pub sbp_signature: Option<SbpSignature>,
    /// Run header inference before compute on every launch.
    pub need_do_shape: bool,
    /// Stateless kernels skip compute when every output is empty.
    pub is_stateless: bool,
    /// Output blob name to whether its header is final before compute. Missing
    /// entries default to `true`.
    pub header_inferred_before_compute: BTreeMap<String, bool>,
    /// Output blob names a downstream consumer declared mutable.
    pub mutable_by_consumer: BTreeMap<String, bool>,
}

impl KernelConf {
    pub fn new(op_conf: OperatorConf) -> Self {
        KernelConf {
            op_conf,
            parallel_ctx: ParallelContext::single(),
            sbp_signature: None,
            need_do_shape: false,
            is_stateless: true,
            header_inferred_before_compute: BTreeMap::new(),
            mutable_by_consumer: BTreeMap::new(),
        }
    }

    pub fn with_need_do_shape(mut self, need_do_shape: bool) -> Self {
        self.need_do_shape = need_do_shape;
        self
    }

    pub fn with_stateless(mut self, is_stateless: bool) -> Self {
        self.is_stateless = is_stateless;
        self
    }

    pub fn with_parallel(mut self, parallel_ctx: ParallelContext, signature: SbpSignature) -> Self {
        self.parallel_ctx = parallel_ctx;
        self.sbp_signature = Some(signature);
        self
    }

    pub fn with_header_inferred_before_compute(mut self, obn: impl Into<String>, value: bool) -> Self {
        self.header_inferred_before_compute.insert(obn.into(), value);
        self
    }

    pub fn with_consumer_mutable(mut self, obn: impl Into<String>) -> Self {
        self.mutable_by_consumer.insert(obn.into(), true);
        self
    }

    /// Marks every output that one of `consumers` declares as a mutable input.
    pub fn with_consumers(mut self, consumers: &[OperatorConf]) -> Result<Self, ConfigError> {
        for consumer in consumers {
            let op_type = consumer.op_type().ok_or_else(|| ConfigError::OpTypeUnset {
                op: consumer.name.clone(),
            })?;
            let def = op_def(op_type)?;
            let modifiers = def.input_arg_modifiers(consumer);
            for (name, index, modifier) in modifiers.iter() {
                if !modifier.is_mutable {
                    continue;
                }
                let Some(lbi) = consumer.input(name, index) else {
                    continue;
                };
                if let Some(obn) = self.output_bn_of(lbi) {
                    self.mutable_by_consumer.insert(obn, true);
                }
            }
        }
        Ok(self)
    }

    fn output_bn_of(&self, lbi: &LogicalBlobId) -> Option<String> {
        self.op_conf.outputs.iter().find_map(|(name, lbis)| {
            lbis.iter()
                .position(|candidate| candidate == lbi)
                .map(|index| OpArg::new(name.clone(), index).bn())
        })
    }

    pub fn op_name(&self) -> &str {
        &self.op_conf.name
    }

    pub fn input_bns(&self) -> Vec<String> {
        self.op_conf.input_args().iter().map(|arg| arg.bn()).collect()
    }

    pub fn output_bns(&self) -> Vec<String> {
        self.op_conf.output_args().iter().map(|arg| arg.bn()).collect()
    }

    pub fn is_header_inferred_before_compute(&self, obn: &str) -> bool {
        self.header_inferred_before_compute
            .get(obn)
            .copied()
            .unwrap_or(true)
    }

    pub fn is_mutable_by_consumer(&self, obn: &str) -> bool {
        self.mutable_by_consumer.get(obn).copied().unwrap_or(false)
    }

    /// Fills header flags the compiler left unset from the op's output-arg modifier.
    pub(crate) fn apply_output_modifiers(&mut self, def: &OpDef) {
        let modifiers = def.output_arg_modifiers(&self.op_conf);
        for (name, index, modifier) in modifiers.iter() {
            self.header_inferred_before_compute
                .entry(format!("{name}_{index}"))
                .or_insert(modifier.header_inferred_before_compute);
        }
    }
}

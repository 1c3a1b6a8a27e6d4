//! The per-node phase engine.
//!
//! One launch walks `Launched -> ForwardHeader -> ForwardDataContent -> Done`,
//! switching the checker on every output at each boundary:
//!
//! | boundary                 | checker installed on outputs                   |
//! |--------------------------|------------------------------------------------|
//! | before header inference  | `producer_infer`                               |
//! | before compute           | `producer_compute(header_inferred_before)`     |
//! | after compute            | `consumer(mutable_by_consumer)`                |

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::conf::KernelConf;
use super::error::KernelError;
use super::shape_infer::RuntimeShapeInferHelper;
use crate::config::JobConfig;
use crate::op::{validate_conf, AttrKind, AttrMap, OpDef, OperatorConf};
use crate::sbp::{DeviceType, ParallelContext};
use crate::tensor::{AccessChecker, BlobHandle, BlobMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelPhase {
    Uninit,
    Initialized,
    Launched,
    ForwardHeader,
    ForwardDataContent,
    Done,
}

impl fmt::Display for KernelPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KernelPhase::Uninit => "uninit",
            KernelPhase::Initialized => "initialized",
            KernelPhase::Launched => "launched",
            KernelPhase::ForwardHeader => "forward_header",
            KernelPhase::ForwardDataContent => "forward_data_content",
            KernelPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Phases one launch entered, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseTrace {
    phases: Vec<KernelPhase>,
    header_inferred: bool,
    compute_skipped: bool,
}

impl PhaseTrace {
    fn enter(&mut self, phase: KernelPhase) {
        debug_assert!(!self.phases.contains(&phase), "phase {phase} entered twice");
        self.phases.push(phase);
    }

    pub fn phases(&self) -> &[KernelPhase] {
        &self.phases
    }

    /// Whether header inference ran during `ForwardHeader`.
    pub fn header_inferred(&self) -> bool {
        self.header_inferred
    }

    /// Whether compute was skipped because every output was empty.
    pub fn compute_skipped(&self) -> bool {
        self.compute_skipped
    }

    pub fn completed(&self) -> bool {
        self.phases.last() == Some(&KernelPhase::Done)
    }
}

/// Invocation-scoped information passed to `launch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchContext {
    pub device_type: DeviceType,
    pub piece_id: u64,
}

impl LaunchContext {
    pub fn cpu(piece_id: u64) -> Self {
        LaunchContext {
            device_type: DeviceType::Cpu,
            piece_id,
        }
    }
}

/// What a compute body can see besides its blobs.
pub struct ComputeContext<'a> {
    op_name: &'a str,
    attrs: &'a AttrMap,
    job: &'a JobConfig,
    parallel_ctx: ParallelContext,
    launch: LaunchContext,
}

impl<'a> ComputeContext<'a> {
    pub fn op_name(&self) -> &str {
        self.op_name
    }

    pub fn attr<T: AttrKind>(&self, name: &str) -> anyhow::Result<T> {
        Ok(self.attrs.get(self.op_name, name)?)
    }

    pub fn job(&self) -> &JobConfig {
        self.job
    }

    pub fn parallel_ctx(&self) -> &ParallelContext {
        &self.parallel_ctx
    }

    pub fn device_type(&self) -> DeviceType {
        self.launch.device_type
    }

    pub fn piece_id(&self) -> u64 {
        self.launch.piece_id
    }
}

/// The externally supplied compute body of a kernel.
pub trait KernelCompute: Send {
    /// Called once from the first `init`.
    fn virtual_init(&mut self, _conf: &KernelConf) -> anyhow::Result<()> {
        Ok(())
    }

    fn forward_data_content(&mut self, ctx: &ComputeContext<'_>, blobs: &mut BlobMap) -> anyhow::Result<()>;
}

/// Successful launch: the blobs handed back plus the phase trace.
#[derive(Debug)]
pub struct Launched {
    pub blobs: BlobMap,
    pub trace: PhaseTrace,
}

/// Failed launch. The blobs are handed back so the caller keeps ownership.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct LaunchFailure {
    #[source]
    pub error: KernelError,
    pub blobs: BlobMap,
    pub trace: PhaseTrace,
}

/// Comparable view of a kernel's bound state.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelSnapshot {
    pub phase: KernelPhase,
    pub job: Option<JobConfig>,
    pub conf: Option<KernelConf>,
    pub attrs: AttrMap,
}

struct Bound {
    job: Arc<JobConfig>,
    conf: KernelConf,
    attrs: AttrMap,
    shape_infer: RuntimeShapeInferHelper,
}

/// Kernel bound to one graph node.
pub struct Kernel {
    op_def: Arc<OpDef>,
    compute: Box<dyn KernelCompute>,
    bound: Option<Bound>,
}

impl Kernel {
    pub fn new(op_def: Arc<OpDef>, compute: Box<dyn KernelCompute>) -> Self {
        Kernel {
            op_def,
            compute,
            bound: None,
        }
    }

    pub fn phase(&self) -> KernelPhase {
        if self.bound.is_some() {
            KernelPhase::Initialized
        } else {
            KernelPhase::Uninit
        }
    }

    pub fn op_def(&self) -> &OpDef {
        &self.op_def
    }

    pub fn conf(&self) -> Option<&KernelConf> {
        self.bound.as_ref().map(|bound| &bound.conf)
    }

    pub fn op_conf(&self) -> Option<&OperatorConf> {
        self.conf().map(|conf| &conf.op_conf)
    }

    pub fn snapshot(&self) -> KernelSnapshot {
        KernelSnapshot {
            phase: self.phase(),
            job: self.bound.as_ref().map(|bound| bound.job.as_ref().clone()),
            conf: self.conf().cloned(),
            attrs: self
                .bound
                .as_ref()
                .map(|bound| bound.attrs.clone())
                .unwrap_or_default(),
        }
    }

    /// Binds configuration and builds the shape-inference helper. Later calls are no-ops.
    pub fn init(&mut self, job: Arc<JobConfig>, conf: KernelConf) -> Result<(), KernelError> {
        if self.bound.is_some() {
            debug!(op = %conf.op_conf.name, "kernel already initialized");
            return Ok(());
        }
        let attrs = validate_conf(&self.op_def, &conf.op_conf)?;
        self.compute
            .virtual_init(&conf)
            .map_err(|source| KernelError::Compute {
                op: conf.op_conf.name.clone(),
                source,
            })?;
        let shape_infer = RuntimeShapeInferHelper::new(Arc::clone(&self.op_def), &conf);
        debug!(op = %conf.op_conf.name, op_type = %self.op_def.op_type(), "kernel initialized");
        self.bound = Some(Bound {
            job,
            conf,
            attrs,
            shape_infer,
        });
        Ok(())
    }

    /// Runs one invocation over `blobs` and hands them back with the phase trace.
    pub fn launch(&mut self, ctx: &LaunchContext, mut blobs: BlobMap) -> Result<Launched, LaunchFailure> {
        let mut trace = PhaseTrace::default();
        match self.forward(ctx, &mut blobs, &mut trace) {
            Ok(()) => Ok(Launched { blobs, trace }),
            Err(error) => Err(LaunchFailure {
                error,
                blobs,
                trace,
            }),
        }
    }

    fn forward(&mut self, ctx: &LaunchContext, blobs: &mut BlobMap, trace: &mut PhaseTrace) -> Result<(), KernelError> {
        let Some(bound) = self.bound.as_mut() else {
            return Err(KernelError::NotInitialized {
                op: self.op_def.op_type().to_string(),
            });
        };
        let op = bound.conf.op_conf.name.clone();
        let output_bns = bound.conf.output_bns();
        trace.enter(KernelPhase::Launched);

        for bn in &output_bns {
            let blob = output(blobs, &op, bn)?;
            if bound.job.access_log {
                blob.enable_access_log();
            }
            blob.set_checker(AccessChecker::producer_infer());
        }

        trace.enter(KernelPhase::ForwardHeader);
        if bound.conf.need_do_shape {
            bound.shape_infer.infer_shape(blobs)?;
            trace.header_inferred = true;
        }

        let all_empty = output_bns
            .iter()
            .all(|bn| blobs.get(bn).is_some_and(BlobHandle::is_empty));
        if all_empty && bound.conf.is_stateless {
            debug!(%op, "all outputs empty, skipping compute");
            trace.compute_skipped = true;
        } else {
            for bn in &output_bns {
                let checker =
                    AccessChecker::producer_compute(bound.conf.is_header_inferred_before_compute(bn));
                output(blobs, &op, bn)?.set_checker(checker);
            }
            trace.enter(KernelPhase::ForwardDataContent);
            let compute_ctx = ComputeContext {
                op_name: &op,
                attrs: &bound.attrs,
                job: &bound.job,
                parallel_ctx: bound.conf.parallel_ctx,
                launch: *ctx,
            };
            self.compute
                .forward_data_content(&compute_ctx, blobs)
                .map_err(|source| KernelError::Compute {
                    op: op.clone(),
                    source,
                })?;
        }

        for bn in &output_bns {
            let checker = AccessChecker::consumer(bound.conf.is_mutable_by_consumer(bn));
            output(blobs, &op, bn)?.set_checker(checker);
        }
        trace.enter(KernelPhase::Done);
        debug!(%op, piece_id = ctx.piece_id, "kernel launch done");
        Ok(())
    }
}

fn output<'b>(blobs: &'b mut BlobMap, op: &str, bn: &str) -> Result<&'b mut BlobHandle, KernelError> {
    blobs.get_mut(bn).ok_or_else(|| KernelError::MissingBlob {
        op: op.to_string(),
        bn: bn.to_string(),
    })
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("op_type", &self.op_def.op_type())
            .field("phase", &self.phase())
            .finish()
    }
}

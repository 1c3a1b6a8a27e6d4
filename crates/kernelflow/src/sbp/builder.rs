use super::infer::SbpError;
use super::parallel::{SbpParallel, SbpSignature};
use crate::op::OpArg;

/// Assembles one candidate signature from split/broadcast/partial-sum primitives.
///
/// Assigning the same argument twice with different parallels is reported by `build`.
#[derive(Debug, Clone, Default)]
pub struct SbpSignatureBuilder {
    signature: SbpSignature,
    conflict: Option<(OpArg, SbpParallel, SbpParallel)>,
}

impl SbpSignatureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn assign(mut self, args: &[OpArg], sbp: SbpParallel) -> Self {
        for arg in args {
            if let Some(previous) = self.signature.insert(arg.clone(), sbp) {
                if previous != sbp && self.conflict.is_none() {
                    self.conflict = Some((arg.clone(), previous, sbp));
                }
            }
        }
        self
    }

    /// Every argument in `args` is split along the same `axis`.
    pub fn split(self, args: &[OpArg], axis: usize) -> Self {
        self.assign(args, SbpParallel::Split(axis))
    }

    pub fn broadcast(self, args: &[OpArg]) -> Self {
        self.assign(args, SbpParallel::Broadcast)
    }

    /// Only valid for arguments whose contribution is summed elementwise.
    pub fn partial_sum(self, args: &[OpArg]) -> Self {
        self.assign(args, SbpParallel::PartialSum)
    }

    pub fn build(self) -> Result<SbpSignature, SbpError> {
        match self.conflict {
            Some((arg, first, second)) => Err(SbpError::Conflict {
                arg: arg.bn(),
                first,
                second,
            }),
            None => Ok(self.signature),
        }
    }
}

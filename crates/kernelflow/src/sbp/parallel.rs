use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::op::OpArg;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    #[default]
    Cpu,
    Gpu,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Cpu => f.write_str("cpu"),
            DeviceType::Gpu => f.write_str("gpu"),
        }
    }
}

/// How one argument is distributed across workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SbpParallel {
    /// Each worker holds a balanced slice along the axis.
    Split(usize),
    /// Each worker holds the whole tensor.
    Broadcast,
    /// Each worker holds a partial value; the logical tensor is the elementwise sum.
    PartialSum,
}

impl SbpParallel {
    pub fn split_axis(self) -> Option<usize> {
        match self {
            SbpParallel::Split(axis) => Some(axis),
            _ => None,
        }
    }

    pub fn is_split(self) -> bool {
        matches!(self, SbpParallel::Split(_))
    }
}

impl fmt::Display for SbpParallel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SbpParallel::Split(axis) => write!(f, "S({axis})"),
            SbpParallel::Broadcast => f.write_str("B"),
            SbpParallel::PartialSum => f.write_str("P"),
        }
    }
}

/// One assignment per input and output argument of an operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SbpSignature {
    assignments: BTreeMap<OpArg, SbpParallel>,
}

impl SbpSignature {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns every argument in `args` the same parallel.
    pub fn uniform<'a>(args: impl IntoIterator<Item = &'a OpArg>, sbp: SbpParallel) -> Self {
        SbpSignature {
            assignments: args.into_iter().map(|arg| (arg.clone(), sbp)).collect(),
        }
    }

    pub fn get(&self, arg: &OpArg) -> Option<SbpParallel> {
        self.assignments.get(arg).copied()
    }

    pub(crate) fn insert(&mut self, arg: OpArg, sbp: SbpParallel) -> Option<SbpParallel> {
        self.assignments.insert(arg, sbp)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OpArg, SbpParallel)> {
        self.assignments.iter().map(|(arg, sbp)| (arg, *sbp))
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

impl fmt::Display for SbpSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (arg, sbp)) in self.assignments.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}: {sbp}")?;
        }
        f.write_str("}")
    }
}

/// Placement of an operator: device kind and worker count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParallelDesc {
    pub device_type: DeviceType,
    pub parallel_num: usize,
}

impl ParallelDesc {
    pub fn new(device_type: DeviceType, parallel_num: usize) -> Self {
        ParallelDesc {
            device_type,
            parallel_num,
        }
    }

    pub fn cpu(parallel_num: usize) -> Self {
        Self::new(DeviceType::Cpu, parallel_num)
    }

    pub fn gpu(parallel_num: usize) -> Self {
        Self::new(DeviceType::Gpu, parallel_num)
    }
}

/// Rank of one worker within a placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParallelContext {
    parallel_num: usize,
    parallel_id: usize,
}

impl ParallelContext {
    /// `None` unless `parallel_id < parallel_num`.
    pub fn new(parallel_num: usize, parallel_id: usize) -> Option<Self> {
        (parallel_id < parallel_num).then_some(ParallelContext {
            parallel_num,
            parallel_id,
        })
    }

    pub fn single() -> Self {
        ParallelContext {
            parallel_num: 1,
            parallel_id: 0,
        }
    }

    pub fn parallel_num(&self) -> usize {
        self.parallel_num
    }

    pub fn parallel_id(&self) -> usize {
        self.parallel_id
    }

    /// Every rank of a placement of `parallel_num` workers.
    pub fn all(parallel_num: usize) -> impl Iterator<Item = ParallelContext> {
        (0..parallel_num).map(move |parallel_id| ParallelContext {
            parallel_num,
            parallel_id,
        })
    }
}

impl Default for ParallelContext {
    fn default() -> Self {
        Self::single()
    }
}

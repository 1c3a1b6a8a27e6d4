//! Split/broadcast/partial-sum sharding: parallel descriptions, physical shapes,
//! candidate enumeration and host-side boxing.

pub mod boxing;
pub mod builder;
pub mod context;
pub mod infer;
pub mod parallel;
pub mod splitter;

pub use boxing::{reconstruct, shard, HostShard};
pub use builder::SbpSignatureBuilder;
pub use context::SbpContext;
pub use infer::{
    candidate_signatures, default_broadcast_to_broadcast, select_signature, split_all_on_axis0,
    SbpError,
};
pub use parallel::{DeviceType, ParallelContext, ParallelDesc, SbpParallel, SbpSignature};
pub use splitter::{physical_shape, BalancedSplitter};

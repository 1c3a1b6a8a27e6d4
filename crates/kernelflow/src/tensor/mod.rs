//! Tensor headers, buffers, and the access checkers that guard them.
//!
//! Buffers are owned by the graph runtime. Kernels only see them through a
//! [`BlobMap`], where every [`BlobHandle`] carries the [`AccessChecker`] that the
//! producing kernel installed for the current phase.

mod buffer;
pub mod checker;
mod desc;
pub mod dtype;
pub mod shape;
pub mod storage;

pub use buffer::{AccessRecord, AccessViolation, BlobError, BlobHandle, BlobMap, TensorBuffer};
pub use checker::{Access, AccessChecker};
pub use desc::TensorDesc;
pub use dtype::DataType;
pub use shape::Shape;
pub use storage::StorageElement;

//! Access capabilities attached to tensor buffers for the current execution phase.
//!
//! A checker is a plain value. The kernel swaps the checker on each output at the
//! phase boundaries of a launch; every header or content access on a
//! [`BlobHandle`](super::BlobHandle) consults the active checker first.

use std::fmt;

/// Kind of access attempted on a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Reading the content bytes.
    Read,
    /// Mutating the content bytes.
    Write,
    /// Mutating the header (shape or dynamic flag).
    MutateHeader,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read => f.write_str("read"),
            Access::Write => f.write_str("write"),
            Access::MutateHeader => f.write_str("header mutation"),
        }
    }
}

/// The canonical checker variants.
///
/// | variant | header mutable | content mutable |
/// |---|---|---|
/// | `ProducerInfer` | yes | no |
/// | `ProducerCompute { header_inferred_before_compute: true }` | no | yes |
/// | `ProducerCompute { header_inferred_before_compute: false }` | yes | yes |
/// | `Consumer { mutable: true }` | no | yes |
/// | `Consumer { mutable: false }` | no | no |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessChecker {
    ProducerInfer,
    ProducerCompute { header_inferred_before_compute: bool },
    Consumer { mutable: bool },
}

impl AccessChecker {
    pub const fn producer_infer() -> Self {
        AccessChecker::ProducerInfer
    }

    pub const fn producer_compute(header_inferred_before_compute: bool) -> Self {
        AccessChecker::ProducerCompute {
            header_inferred_before_compute,
        }
    }

    pub const fn consumer(mutable: bool) -> Self {
        AccessChecker::Consumer { mutable }
    }

    pub const fn is_header_mutable(self) -> bool {
        match self {
            AccessChecker::ProducerInfer => true,
            AccessChecker::ProducerCompute {
                header_inferred_before_compute,
            } => !header_inferred_before_compute,
            AccessChecker::Consumer { .. } => false,
        }
    }

    pub const fn is_body_mutable(self) -> bool {
        match self {
            AccessChecker::ProducerInfer => false,
            AccessChecker::ProducerCompute { .. } => true,
            AccessChecker::Consumer { mutable } => mutable,
        }
    }

    /// Content is stale while the header is still open and the body is not yet writable.
    pub const fn is_body_readable(self) -> bool {
        !(self.is_header_mutable() && !self.is_body_mutable())
    }

    pub const fn allows(self, access: Access) -> bool {
        match access {
            Access::Read => self.is_body_readable(),
            Access::Write => self.is_body_mutable(),
            Access::MutateHeader => self.is_header_mutable(),
        }
    }

    /// Phase label used in diagnostics.
    pub fn phase(self) -> &'static str {
        match self {
            AccessChecker::ProducerInfer => "shape inference",
            AccessChecker::ProducerCompute { .. } => "compute",
            AccessChecker::Consumer { .. } => "consumer",
        }
    }
}

impl Default for AccessChecker {
    fn default() -> Self {
        AccessChecker::consumer(false)
    }
}

impl fmt::Display for AccessChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (header {}, content {})",
            self.phase(),
            if self.is_header_mutable() { "mutable" } else { "frozen" },
            if self.is_body_mutable() { "mutable" } else { "frozen" }
        )
    }
}

//! Tensor buffers, the handles that carry their access checker, and the
//! name-keyed ownership map a kernel receives for one launch.

use std::collections::BTreeMap;
use std::sync::Mutex;

use thiserror::Error;
use tracing::error;

use super::checker::{Access, AccessChecker};
use super::storage::StorageElement;
use super::{DataType, Shape, TensorDesc};

/// Raised when the active checker forbids an access. Always fatal for the current launch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("access violation on `{arg}`: {access} is not allowed during {phase} (checker: {checker})")]
pub struct AccessViolation {
    pub arg: String,
    pub phase: &'static str,
    pub access: Access,
    pub checker: AccessChecker,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobError {
    #[error(transparent)]
    Access(#[from] AccessViolation),
    #[error("blob `{arg}`: header {shape} needs {needed} bytes but only {capacity} are allocated")]
    CapacityExceeded {
        arg: String,
        shape: Shape,
        needed: usize,
        capacity: usize,
    },
    #[error("blob `{arg}`: element type {requested} does not match header type {actual}")]
    DataTypeMismatch {
        arg: String,
        requested: DataType,
        actual: DataType,
    },
    #[error("blob `{arg}`: expected {expected} elements, got {actual}")]
    LengthMismatch {
        arg: String,
        expected: usize,
        actual: usize,
    },
}

/// One checked access, recorded when access logging is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRecord {
    pub access: Access,
    pub checker: AccessChecker,
    pub allowed: bool,
}

/// Opaque memory region plus its header.
///
/// The region is allocated once for a maximum header; later header mutations may
/// shrink the live view but never grow it past the allocation.
#[derive(Debug, Clone)]
pub struct TensorBuffer {
    desc: TensorDesc,
    memory: Vec<u8>,
}

impl TensorBuffer {
    pub fn new(desc: TensorDesc) -> Self {
        let memory = vec![0u8; desc.byte_len()];
        TensorBuffer { desc, memory }
    }

    pub fn desc(&self) -> &TensorDesc {
        &self.desc
    }

    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    fn live_len(&self) -> usize {
        self.desc.byte_len().min(self.memory.len())
    }
}

/// A buffer bound to an argument name, carrying its active checker as metadata.
#[derive(Debug)]
pub struct BlobHandle {
    name: String,
    buffer: TensorBuffer,
    checker: AccessChecker,
    log: Option<Mutex<Vec<AccessRecord>>>,
}

impl BlobHandle {
    /// Allocates a zeroed buffer sized for `desc`. Handles start with the read-only
    /// consumer checker; the producing kernel installs its own on launch.
    pub fn new(name: impl Into<String>, desc: TensorDesc) -> Self {
        BlobHandle {
            name: name.into(),
            buffer: TensorBuffer::new(desc),
            checker: AccessChecker::default(),
            log: crate::env::access_log_enabled().then(|| Mutex::new(Vec::new())),
        }
    }

    /// Builds a handle whose content is initialised from `values`.
    pub fn from_values<T: StorageElement>(
        name: impl Into<String>,
        shape: impl Into<Shape>,
        values: &[T],
    ) -> Result<Self, BlobError> {
        let name = name.into();
        let shape = shape.into();
        if shape.elem_cnt() != values.len() {
            return Err(BlobError::LengthMismatch {
                arg: name,
                expected: shape.elem_cnt(),
                actual: values.len(),
            });
        }
        let mut handle = BlobHandle::new(name, TensorDesc::new(shape, T::DATA_TYPE));
        let width = T::DATA_TYPE.size_in_bytes();
        for (value, out) in values.iter().zip(handle.buffer.memory.chunks_exact_mut(width)) {
            value.write_le(out);
        }
        Ok(handle)
    }

    /// Enables or disables the access log regardless of the environment default.
    pub fn with_access_log(mut self, enabled: bool) -> Self {
        self.log = enabled.then(|| Mutex::new(Vec::new()));
        self
    }

    /// Turns on access logging if it is not already recording.
    pub fn enable_access_log(&mut self) {
        if self.log.is_none() {
            self.log = Some(Mutex::new(Vec::new()));
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn checker(&self) -> AccessChecker {
        self.checker
    }

    pub fn set_checker(&mut self, checker: AccessChecker) {
        self.checker = checker;
    }

    /// Header reads are never gated.
    pub fn desc(&self) -> &TensorDesc {
        self.buffer.desc()
    }

    pub fn shape(&self) -> &Shape {
        &self.buffer.desc.shape
    }

    pub fn data_type(&self) -> DataType {
        self.buffer.desc.data_type
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.desc.shape.is_empty()
    }

    /// Recorded accesses, oldest first. Empty when logging is disabled.
    pub fn access_log(&self) -> Vec<AccessRecord> {
        self.log
            .as_ref()
            .map(|log| log.lock().expect("access log poisoned").clone())
            .unwrap_or_default()
    }

    pub fn has_violation(&self) -> bool {
        self.access_log().iter().any(|record| !record.allowed)
    }

    fn check(&self, access: Access) -> Result<(), AccessViolation> {
        let allowed = self.checker.allows(access);
        if let Some(log) = &self.log {
            log.lock().expect("access log poisoned").push(AccessRecord {
                access,
                checker: self.checker,
                allowed,
            });
        }
        if allowed {
            return Ok(());
        }
        let violation = AccessViolation {
            arg: self.name.clone(),
            phase: self.checker.phase(),
            access,
            checker: self.checker,
        };
        error!(blob = %self.name, %access, checker = %self.checker, "blob access violation");
        Err(violation)
    }

    pub fn check_read(&self) -> Result<(), AccessViolation> {
        self.check(Access::Read)
    }

    pub fn check_write(&self) -> Result<(), AccessViolation> {
        self.check(Access::Write)
    }

    pub fn check_header_mutation(&self) -> Result<(), AccessViolation> {
        self.check(Access::MutateHeader)
    }

    /// Rewrites the shape. The new header must fit in the allocated region.
    pub fn set_shape(&mut self, shape: Shape) -> Result<(), BlobError> {
        self.check_header_mutation()?;
        let needed = shape
            .checked_elem_cnt()
            .and_then(|cnt| cnt.checked_mul(self.data_type().size_in_bytes()))
            .unwrap_or(usize::MAX);
        if needed > self.buffer.capacity() {
            return Err(BlobError::CapacityExceeded {
                arg: self.name.clone(),
                shape,
                needed,
                capacity: self.buffer.capacity(),
            });
        }
        self.buffer.desc.shape = shape;
        Ok(())
    }

    pub fn set_dynamic(&mut self, is_dynamic: bool) -> Result<(), BlobError> {
        self.check_header_mutation()?;
        self.buffer.desc.is_dynamic = is_dynamic;
        Ok(())
    }

    pub fn body(&self) -> Result<&[u8], AccessViolation> {
        self.check_read()?;
        let len = self.buffer.live_len();
        Ok(&self.buffer.memory[..len])
    }

    pub fn body_mut(&mut self) -> Result<&mut [u8], AccessViolation> {
        self.check_write()?;
        let len = self.buffer.live_len();
        Ok(&mut self.buffer.memory[..len])
    }

    fn ensure_element<T: StorageElement>(&self) -> Result<(), BlobError> {
        if T::DATA_TYPE != self.data_type() {
            return Err(BlobError::DataTypeMismatch {
                arg: self.name.clone(),
                requested: T::DATA_TYPE,
                actual: self.data_type(),
            });
        }
        Ok(())
    }

    /// Decodes the live content as `T`.
    pub fn read<T: StorageElement>(&self) -> Result<Vec<T>, BlobError> {
        self.ensure_element::<T>()?;
        let width = T::DATA_TYPE.size_in_bytes();
        Ok(self.body()?.chunks_exact(width).map(T::read_le).collect())
    }

    /// Encodes `values` into the live content. Length must equal the header element count.
    pub fn write<T: StorageElement>(&mut self, values: &[T]) -> Result<(), BlobError> {
        self.ensure_element::<T>()?;
        let expected = self.shape().elem_cnt();
        if values.len() != expected {
            return Err(BlobError::LengthMismatch {
                arg: self.name.clone(),
                expected,
                actual: values.len(),
            });
        }
        let width = T::DATA_TYPE.size_in_bytes();
        let body = self.body_mut()?;
        for (value, out) in values.iter().zip(body.chunks_exact_mut(width)) {
            value.write_le(out);
        }
        Ok(())
    }
}

/// Ownership map from argument name (`in_0`, `out_0`, ...) to blob handle.
///
/// A launch takes the map by value and hands it back, so the only way to reach a
/// buffer during a phase is through this map and the checker on its handle.
#[derive(Debug, Default)]
pub struct BlobMap {
    blobs: BTreeMap<String, BlobHandle>,
}

impl BlobMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `handle` under its own name, returning any handle it replaced.
    pub fn insert(&mut self, handle: BlobHandle) -> Option<BlobHandle> {
        self.blobs.insert(handle.name().to_string(), handle)
    }

    pub fn with(mut self, handle: BlobHandle) -> Self {
        self.insert(handle);
        self
    }

    pub fn get(&self, name: &str) -> Option<&BlobHandle> {
        self.blobs.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut BlobHandle> {
        self.blobs.get_mut(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<BlobHandle> {
        self.blobs.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blobs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlobHandle> {
        self.blobs.values()
    }
}

impl FromIterator<BlobHandle> for BlobMap {
    fn from_iter<I: IntoIterator<Item = BlobHandle>>(iter: I) -> Self {
        let mut map = BlobMap::new();
        for handle in iter {
            map.insert(handle);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float_blob(name: &str, dims: [usize; 2]) -> BlobHandle {
        BlobHandle::new(name, TensorDesc::new(dims, DataType::Float)).with_access_log(true)
    }

    #[test]
    fn write_gated_by_body_facet() {
        let mut blob = float_blob("out_0", [2, 2]);
        blob.set_checker(AccessChecker::producer_infer());
        let err = blob.write(&[1.0f32; 4]).unwrap_err();
        assert!(matches!(err, BlobError::Access(ref v) if v.access == Access::Write));
        assert!(blob.has_violation());

        let mut blob = float_blob("out_0", [2, 2]);
        blob.set_checker(AccessChecker::producer_compute(true));
        blob.write(&[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        assert!(!blob.has_violation());
        assert_eq!(blob.read::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn header_mutation_respects_capacity() {
        let mut blob = float_blob("out_0", [2, 3]);
        blob.set_checker(AccessChecker::producer_infer());
        blob.set_shape(Shape::from([3, 2])).unwrap();
        blob.set_shape(Shape::from([1, 0])).unwrap();
        assert!(blob.is_empty());
        let err = blob.set_shape(Shape::from([4, 4])).unwrap_err();
        assert!(matches!(err, BlobError::CapacityExceeded { needed: 64, capacity: 24, .. }));

        let err = blob.set_shape(Shape::from([usize::MAX, 2])).unwrap_err();
        assert!(matches!(err, BlobError::CapacityExceeded { needed: usize::MAX, .. }));
    }

    #[test]
    fn violation_names_argument_and_phase() {
        let mut blob = float_blob("y_0", [1, 1]);
        blob.set_checker(AccessChecker::consumer(false));
        let err = blob.set_shape(Shape::from([1])).unwrap_err();
        let BlobError::Access(violation) = err else {
            panic!("expected access violation");
        };
        assert_eq!(violation.arg, "y_0");
        assert_eq!(violation.phase, "consumer");
        assert!(violation.to_string().contains("header mutation"));
    }

    #[test]
    fn typed_access_checks_dtype() {
        let blob = BlobHandle::from_values("in_0", [3], &[1i32, 2, 3]).unwrap();
        assert!(matches!(
            blob.read::<f32>(),
            Err(BlobError::DataTypeMismatch { .. })
        ));
        assert_eq!(blob.read::<i32>().unwrap(), vec![1, 2, 3]);
    }
}

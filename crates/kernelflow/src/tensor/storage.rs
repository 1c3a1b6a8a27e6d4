//! Scalar element trait used to view buffer content as typed values.

use super::dtype::DataType;

/// Element types that can be decoded from and encoded into raw buffer bytes.
///
/// Buffers store little-endian bytes; the trait ties each Rust scalar to the
/// [`DataType`] tag a header must carry before typed access is allowed.
pub trait StorageElement: Copy + Default + Send + Sync {
    /// Header dtype matching this element.
    const DATA_TYPE: DataType;

    fn read_le(bytes: &[u8]) -> Self;

    fn write_le(self, out: &mut [u8]);
}

macro_rules! impl_storage_element {
    ($ty:ty, $dtype:expr) => {
        impl StorageElement for $ty {
            const DATA_TYPE: DataType = $dtype;

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_le_bytes(raw)
            }

            fn write_le(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_le_bytes());
            }
        }
    };
}

impl_storage_element!(f32, DataType::Float);
impl_storage_element!(f64, DataType::Double);
impl_storage_element!(i8, DataType::Int8);
impl_storage_element!(i32, DataType::Int32);
impl_storage_element!(i64, DataType::Int64);
impl_storage_element!(u8, DataType::UInt8);

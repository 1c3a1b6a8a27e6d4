use serde::{Deserialize, Serialize};

use super::{DataType, Shape};

/// Header of a tensor: everything inference reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorDesc {
    pub shape: Shape,
    pub data_type: DataType,
    #[serde(default)]
    pub is_dynamic: bool,
}

impl TensorDesc {
    pub fn new(shape: impl Into<Shape>, data_type: DataType) -> Self {
        TensorDesc {
            shape: shape.into(),
            data_type,
            is_dynamic: false,
        }
    }

    pub fn dynamic(mut self, is_dynamic: bool) -> Self {
        self.is_dynamic = is_dynamic;
        self
    }

    /// Content size in bytes implied by the header.
    pub fn byte_len(&self) -> usize {
        self.shape.elem_cnt() * self.data_type.size_in_bytes()
    }
}

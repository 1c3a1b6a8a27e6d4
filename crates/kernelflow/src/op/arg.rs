use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One concrete argument slot of an operator: a declared name plus an index for
/// repeated arguments. Rendered as the blob name `in_0`, `out_2`, ...
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpArg {
    name: String,
    index: usize,
}

impl OpArg {
    pub fn new(name: impl Into<String>, index: usize) -> Self {
        OpArg {
            name: name.into(),
            index,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Blob name used as the key of the kernel's blob map.
    pub fn bn(&self) -> String {
        format!("{}_{}", self.name, self.index)
    }
}

impl fmt::Display for OpArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.name, self.index)
    }
}

/// Identifies a tensor produced in the graph: `producer_op/blob_name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LogicalBlobId {
    pub op_name: String,
    pub blob_name: String,
}

impl LogicalBlobId {
    pub fn new(op_name: impl Into<String>, blob_name: impl Into<String>) -> Self {
        LogicalBlobId {
            op_name: op_name.into(),
            blob_name: blob_name.into(),
        }
    }
}

impl fmt::Display for LogicalBlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.op_name, self.blob_name)
    }
}

impl FromStr for LogicalBlobId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((op, blob)) if !op.is_empty() && !blob.is_empty() => {
                Ok(LogicalBlobId::new(op, blob))
            }
            _ => Err(format!("invalid logical blob id `{s}`, expected `op/blob`")),
        }
    }
}

impl TryFrom<String> for LogicalBlobId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LogicalBlobId> for String {
    fn from(value: LogicalBlobId) -> Self {
        value.to_string()
    }
}

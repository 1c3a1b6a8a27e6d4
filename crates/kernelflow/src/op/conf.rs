//! Per-node operator configuration: the descriptor a graph node carries into
//! inference, kernel construction and backward expansion.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::arg::{LogicalBlobId, OpArg};
use super::attr::{AttrMap, AttrValue};
use crate::sbp::DeviceType;

/// Configuration of one operator instance.
///
/// Inputs bind argument names to the logical blobs they consume; outputs list the
/// logical blobs the op produces, one per repeated index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorConf {
    pub name: String,
    #[serde(default)]
    pub op_type: Option<String>,
    #[serde(default)]
    pub device_type: DeviceType,
    #[serde(default)]
    pub attrs: AttrMap,
    #[serde(default)]
    pub inputs: BTreeMap<String, Vec<LogicalBlobId>>,
    #[serde(default)]
    pub outputs: BTreeMap<String, Vec<LogicalBlobId>>,
}

impl OperatorConf {
    pub fn builder(name: impl Into<String>) -> OperatorConfBuilder {
        OperatorConfBuilder::new(name)
    }

    pub fn op_type(&self) -> Option<&str> {
        self.op_type.as_deref()
    }

    pub fn input(&self, arg: &str, index: usize) -> Option<&LogicalBlobId> {
        self.inputs.get(arg).and_then(|lbis| lbis.get(index))
    }

    pub fn output(&self, arg: &str, index: usize) -> Option<&LogicalBlobId> {
        self.outputs.get(arg).and_then(|lbis| lbis.get(index))
    }

    pub fn input_size(&self, arg: &str) -> usize {
        self.inputs.get(arg).map_or(0, Vec::len)
    }

    pub fn output_size(&self, arg: &str) -> usize {
        self.outputs.get(arg).map_or(0, Vec::len)
    }

    /// Bound input arguments in name order, then index order.
    pub fn input_args(&self) -> Vec<OpArg> {
        expand_args(&self.inputs)
    }

    pub fn output_args(&self) -> Vec<OpArg> {
        expand_args(&self.outputs)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("failed to parse operator conf")
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read operator conf {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("in {}", path.display()))
    }
}

fn expand_args(bindings: &BTreeMap<String, Vec<LogicalBlobId>>) -> Vec<OpArg> {
    bindings
        .iter()
        .flat_map(|(name, lbis)| (0..lbis.len()).map(move |index| OpArg::new(name.clone(), index)))
        .collect()
}

/// Fluent construction of an [`OperatorConf`], mainly for graph compilers and tests.
#[derive(Debug, Clone)]
pub struct OperatorConfBuilder {
    conf: OperatorConf,
}

impl OperatorConfBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        OperatorConfBuilder {
            conf: OperatorConf {
                name: name.into(),
                op_type: None,
                device_type: DeviceType::Cpu,
                attrs: AttrMap::new(),
                inputs: BTreeMap::new(),
                outputs: BTreeMap::new(),
            },
        }
    }

    pub fn op(mut self, op_type: impl Into<String>) -> Self {
        self.conf.op_type = Some(op_type.into());
        self
    }

    pub fn device(mut self, device_type: DeviceType) -> Self {
        self.conf.device_type = device_type;
        self
    }

    /// Appends one binding to the repeated input `arg`.
    pub fn input(mut self, arg: impl Into<String>, lbi: LogicalBlobId) -> Self {
        self.conf.inputs.entry(arg.into()).or_default().push(lbi);
        self
    }

    /// Declares a single output `arg`, producing `{name}/{arg}_0`.
    pub fn output(self, arg: impl Into<String>) -> Self {
        self.output_num(arg, 1)
    }

    /// Declares `num` outputs for `arg`, producing `{name}/{arg}_{i}`.
    pub fn output_num(mut self, arg: impl Into<String>, num: usize) -> Self {
        let arg = arg.into();
        let lbis = (0..num)
            .map(|index| LogicalBlobId::new(self.conf.name.clone(), OpArg::new(arg.clone(), index).bn()))
            .collect();
        self.conf.outputs.insert(arg, lbis);
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.conf.attrs.set(name, value);
        self
    }

    pub fn build(self) -> OperatorConf {
        self.conf
    }
}

//! Reference CPU compute bodies.

use anyhow::{ensure, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use kernelflow::error::ConfigError;
use kernelflow::kernel::{register_kernel, ComputeContext, KernelCompute, KernelConf};
use kernelflow::sbp::DeviceType;
use kernelflow::tensor::{BlobHandle, BlobMap, Shape};

fn blob<'b>(blobs: &'b BlobMap, bn: &str) -> Result<&'b BlobHandle> {
    blobs.get(bn).with_context(|| format!("missing blob `{bn}`"))
}

fn blob_mut<'b>(blobs: &'b mut BlobMap, bn: &str) -> Result<&'b mut BlobHandle> {
    blobs.get_mut(bn).with_context(|| format!("missing blob `{bn}`"))
}

fn read_f32(blobs: &BlobMap, bn: &str) -> Result<Vec<f32>> {
    Ok(blob(blobs, bn)?.read::<f32>()?)
}

fn write_f32(blobs: &mut BlobMap, bn: &str, values: &[f32]) -> Result<()> {
    blob_mut(blobs, bn)?.write(values)?;
    Ok(())
}

struct CcReluKernel;

impl KernelCompute for CcReluKernel {
    fn forward_data_content(&mut self, _ctx: &ComputeContext<'_>, blobs: &mut BlobMap) -> Result<()> {
        let out: Vec<f32> = read_f32(blobs, "in_0")?
            .into_iter()
            .map(|x| x.max(0.0))
            .collect();
        write_f32(blobs, "out_0", &out)
    }
}

struct CcReluGradKernel;

impl KernelCompute for CcReluGradKernel {
    fn forward_data_content(&mut self, _ctx: &ComputeContext<'_>, blobs: &mut BlobMap) -> Result<()> {
        let y = read_f32(blobs, "y_0")?;
        let dy = read_f32(blobs, "dy_0")?;
        ensure!(y.len() == dy.len(), "y and dy differ in length");
        let dx: Vec<f32> = y
            .iter()
            .zip(&dy)
            .map(|(&y, &dy)| if y > 0.0 { dy } else { 0.0 })
            .collect();
        write_f32(blobs, "dx_0", &dx)
    }
}

/// Clamps the input in place, then copies it to the output.
struct InplaceReluKernel;

impl KernelCompute for InplaceReluKernel {
    fn forward_data_content(&mut self, _ctx: &ComputeContext<'_>, blobs: &mut BlobMap) -> Result<()> {
        let input = blob_mut(blobs, "in_0")?;
        let clamped: Vec<f32> = input.read::<f32>()?.into_iter().map(|x| x.max(0.0)).collect();
        input.write(&clamped)?;
        write_f32(blobs, "out_0", &clamped)
    }
}

struct CopyKernel;

impl KernelCompute for CopyKernel {
    fn forward_data_content(&mut self, _ctx: &ComputeContext<'_>, blobs: &mut BlobMap) -> Result<()> {
        let content = blob(blobs, "in_0")?.body()?.to_vec();
        let out = blob_mut(blobs, "out_0")?.body_mut()?;
        ensure!(
            out.len() == content.len(),
            "output holds {} bytes, input {}",
            out.len(),
            content.len()
        );
        out.copy_from_slice(&content);
        Ok(())
    }
}

/// Fills the output with `0, 1, 2, ...`.
struct IotaKernel;

impl KernelCompute for IotaKernel {
    fn forward_data_content(&mut self, _ctx: &ComputeContext<'_>, blobs: &mut BlobMap) -> Result<()> {
        let len = blob(blobs, "out_0")?.shape().elem_cnt();
        let values: Vec<f32> = (0..len).map(|v| v as f32).collect();
        write_f32(blobs, "out_0", &values)
    }
}

/// `out1` copies the input; `out2` repeats each last-axis row twice.
struct MultiOutputOrderKernel;

impl KernelCompute for MultiOutputOrderKernel {
    fn forward_data_content(&mut self, _ctx: &ComputeContext<'_>, blobs: &mut BlobMap) -> Result<()> {
        let input = blob(blobs, "in_0")?;
        let last = input.shape().dims().last().copied().unwrap_or(1).max(1);
        let values = input.read::<f32>()?;
        let doubled: Vec<f32> = values
            .chunks(last)
            .flat_map(|row| row.iter().chain(row.iter()).copied())
            .collect();
        write_f32(blobs, "out1_0", &values)?;
        write_f32(blobs, "out2_0", &doubled)
    }
}

struct MultiInputKernel;

impl KernelCompute for MultiInputKernel {
    fn forward_data_content(&mut self, _ctx: &ComputeContext<'_>, blobs: &mut BlobMap) -> Result<()> {
        let x1 = read_f32(blobs, "x1_0")?;
        let x2 = read_f32(blobs, "x2_0")?;
        let y: Vec<f32> = x1.iter().zip(&x2).map(|(a, b)| a + b).collect();
        write_f32(blobs, "y_0", &y)
    }
}

struct MultiInputGradKernel;

impl KernelCompute for MultiInputGradKernel {
    fn forward_data_content(&mut self, _ctx: &ComputeContext<'_>, blobs: &mut BlobMap) -> Result<()> {
        let y_diff = read_f32(blobs, "y_diff_0")?;
        write_f32(blobs, "x1_diff_0", &y_diff)?;
        write_f32(blobs, "x2_diff_0", &y_diff)
    }
}

/// Emits a data-dependent number of elements: piece `k` produces `k % 5 + 1` of them.
/// The header is only final once compute has run.
struct DynamicSourceKernel;

impl KernelCompute for DynamicSourceKernel {
    fn forward_data_content(&mut self, ctx: &ComputeContext<'_>, blobs: &mut BlobMap) -> Result<()> {
        let len = (ctx.piece_id() % 5) as usize + 1;
        let out = blob_mut(blobs, "out_0")?;
        out.set_shape(Shape::new([len]))?;
        let values: Vec<f32> = (0..len).map(|v| v as f32).collect();
        out.write(&values)?;
        Ok(())
    }
}

/// Uniform `[0, 1)` samples from a generator seeded once per kernel, so successive
/// launches continue the same stream.
struct RandomSourceKernel {
    rng: StdRng,
}

impl KernelCompute for RandomSourceKernel {
    fn virtual_init(&mut self, conf: &KernelConf) -> Result<()> {
        let seed: i64 = conf
            .op_conf
            .attrs
            .get(&conf.op_conf.name, "seed")
            .context("random source needs a seed")?;
        self.rng = StdRng::seed_from_u64(seed as u64);
        debug!(op = %conf.op_conf.name, seed, "seeded random source");
        Ok(())
    }

    fn forward_data_content(&mut self, _ctx: &ComputeContext<'_>, blobs: &mut BlobMap) -> Result<()> {
        let len = blob(blobs, "out_0")?.shape().elem_cnt();
        let values: Vec<f32> = (0..len).map(|_| self.rng.gen::<f32>()).collect();
        write_f32(blobs, "out_0", &values)
    }
}

/// Sums `model_diff_num` successive diffs. The output holds the running sum of the
/// current window; the window restarts after it is complete.
struct ModelDiffAccKernel {
    model_diff_num: usize,
    seen: usize,
    acc: Vec<f32>,
}

impl KernelCompute for ModelDiffAccKernel {
    fn virtual_init(&mut self, conf: &KernelConf) -> Result<()> {
        let num = match conf.op_conf.attrs.value("model_diff_num") {
            Some(_) => conf
                .op_conf
                .attrs
                .get::<i32>(&conf.op_conf.name, "model_diff_num")?,
            None => 1,
        };
        ensure!(num > 0, "model_diff_num must be positive, got {num}");
        self.model_diff_num = num as usize;
        Ok(())
    }

    fn forward_data_content(&mut self, _ctx: &ComputeContext<'_>, blobs: &mut BlobMap) -> Result<()> {
        let diff = read_f32(blobs, "model_diff_0")?;
        if self.seen == 0 || self.acc.len() != diff.len() {
            self.acc = vec![0.0; diff.len()];
        }
        for (acc, d) in self.acc.iter_mut().zip(&diff) {
            *acc += d;
        }
        write_f32(blobs, "model_diff_acc_0", &self.acc)?;
        self.seen += 1;
        if self.seen == self.model_diff_num {
            self.seen = 0;
        }
        Ok(())
    }
}

fn ccrelu(_: &KernelConf) -> Box<dyn KernelCompute> {
    Box::new(CcReluKernel)
}

fn ccrelu_grad(_: &KernelConf) -> Box<dyn KernelCompute> {
    Box::new(CcReluGradKernel)
}

fn inplace_relu(_: &KernelConf) -> Box<dyn KernelCompute> {
    Box::new(InplaceReluKernel)
}

fn copy(_: &KernelConf) -> Box<dyn KernelCompute> {
    Box::new(CopyKernel)
}

fn iota(_: &KernelConf) -> Box<dyn KernelCompute> {
    Box::new(IotaKernel)
}

fn multi_output_order(_: &KernelConf) -> Box<dyn KernelCompute> {
    Box::new(MultiOutputOrderKernel)
}

fn multi_input(_: &KernelConf) -> Box<dyn KernelCompute> {
    Box::new(MultiInputKernel)
}

fn multi_input_grad(_: &KernelConf) -> Box<dyn KernelCompute> {
    Box::new(MultiInputGradKernel)
}

fn dynamic_source(_: &KernelConf) -> Box<dyn KernelCompute> {
    Box::new(DynamicSourceKernel)
}

fn random_source(_: &KernelConf) -> Box<dyn KernelCompute> {
    Box::new(RandomSourceKernel {
        rng: StdRng::seed_from_u64(0),
    })
}

fn model_diff_acc(_: &KernelConf) -> Box<dyn KernelCompute> {
    Box::new(ModelDiffAccKernel {
        model_diff_num: 1,
        seen: 0,
        acc: Vec::new(),
    })
}

pub(crate) fn register_kernels() -> Result<(), ConfigError> {
    let cpu = DeviceType::Cpu;
    register_kernel("ccrelu", cpu, ccrelu)?;
    register_kernel("ccrelu_grad", cpu, ccrelu_grad)?;
    register_kernel("TestReshape", cpu, copy)?;
    register_kernel("TestSource", cpu, iota)?;
    register_kernel("TestSourceMultiGpuFixedOutNum", cpu, iota)?;
    register_kernel("TestMultiOutputOrder", cpu, multi_output_order)?;
    register_kernel("TestMultiInput", cpu, multi_input)?;
    register_kernel("TestMultiInputGrad", cpu, multi_input_grad)?;
    register_kernel("TestDynamicSource", cpu, dynamic_source)?;
    register_kernel("TestRandomSource", cpu, random_source)?;
    register_kernel("cpu_only_relu_test", cpu, ccrelu)?;
    register_kernel("TestInplaceRelu", cpu, inplace_relu)?;
    register_kernel("model_diff_acc", cpu, model_diff_acc)?;
    Ok(())
}

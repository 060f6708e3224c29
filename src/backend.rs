//! Inference Backend (C7) — interface only.
//!
//! A narrow capability over named tensors: `input_names`, `output_names`,
//! `run`. The pipeline treats [`Tensor`] as an opaque value and never
//! builds a reference-counted tensor graph; each backend owns its own
//! session and returns value-type tensors by name. Three tagged variants
//! are provided per the spec's redesign guidance — prefer a trait object
//! over an inheritance hierarchy:
//!
//! - [`MockEncoder`] / [`MockErbDecoder`] / [`MockDfDecoder`]: deterministic,
//!   required for testing.
//! - [`NativeBackend`]: a pure-Rust `tract-onnx` session, grounded on the
//!   teacher's `InferenceEngine` (`inference.rs`).
//! - [`GpuStub`]: reports unavailability; the GPU acceleration experiments
//!   themselves are out of scope (spec.md §1), but the capability surface
//!   for them is kept narrow as instructed.

use crate::error::{EnhanceError, EnhanceResult};
use std::collections::HashMap;
use std::path::Path;

/// A named, shaped tensor. `product(shape) == data.len()` is enforced at
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Vec<i64>,
    pub data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<i64>, data: Vec<f32>) -> EnhanceResult<Self> {
        let product: i64 = shape.iter().product();
        if product < 0 || product as usize != data.len() {
            return Err(EnhanceError::ShapeMismatch {
                expected: format!("{shape:?} (product {product})"),
                got: format!("{} elements", data.len()),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn filled(shape: Vec<i64>, value: f32) -> Self {
        let len: i64 = shape.iter().product();
        Self { shape, data: vec![value; len.max(0) as usize] }
    }
}

/// Opaque model-inference service with named tensor inputs/outputs.
pub trait InferenceBackend: Send + Sync {
    fn input_names(&self) -> Vec<String>;
    fn output_names(&self) -> Vec<String>;
    fn run(&self, inputs: &HashMap<String, Tensor>) -> EnhanceResult<HashMap<String, Tensor>>;
}

/// The seven required state-bundle keys produced by the encoder and
/// consumed by both decoders.
pub const STATE_KEYS: [&str; 7] = ["e0", "e1", "e2", "e3", "emb", "c0", "lsnr"];

fn frames_from_erb_feat(inputs: &HashMap<String, Tensor>) -> EnhanceResult<usize> {
    let erb = inputs.get("erb_feat").ok_or_else(|| EnhanceError::MissingOutput {
        name: "erb_feat".into(),
    })?;
    // shape [1, 1, T, B_erb]
    erb.shape
        .get(2)
        .map(|&t| t.max(0) as usize)
        .ok_or_else(|| EnhanceError::ShapeMismatch {
            expected: "[1,1,T,B_erb]".into(),
            got: format!("{:?}", erb.shape),
        })
}

/// Deterministic mock encoder: fills all seven state tensors with a fixed
/// value, shaped `[1, T, hidden]`.
pub struct MockEncoder {
    fill: f32,
    hidden: i64,
}

impl MockEncoder {
    pub fn new(fill: f32) -> Self {
        Self { fill, hidden: 8 }
    }
}

impl InferenceBackend for MockEncoder {
    fn input_names(&self) -> Vec<String> {
        vec!["erb_feat".into(), "spec_feat".into()]
    }

    fn output_names(&self) -> Vec<String> {
        STATE_KEYS.iter().map(|s| s.to_string()).collect()
    }

    fn run(&self, inputs: &HashMap<String, Tensor>) -> EnhanceResult<HashMap<String, Tensor>> {
        let t = frames_from_erb_feat(inputs)? as i64;
        let mut out = HashMap::new();
        for key in STATE_KEYS {
            out.insert(key.to_string(), Tensor::filled(vec![1, t.max(1), self.hidden], self.fill));
        }
        Ok(out)
    }
}

/// Deterministic mock ERB decoder: fills `m` with a fixed gain, shape
/// `[1, 1, T, K]`.
pub struct MockErbDecoder {
    fill: f32,
    bins: usize,
}

impl MockErbDecoder {
    pub fn new(fill: f32, bins: usize) -> Self {
        Self { fill, bins }
    }
}

impl InferenceBackend for MockErbDecoder {
    fn input_names(&self) -> Vec<String> {
        STATE_KEYS.iter().map(|s| s.to_string()).collect()
    }

    fn output_names(&self) -> Vec<String> {
        vec!["m".into()]
    }

    fn run(&self, inputs: &HashMap<String, Tensor>) -> EnhanceResult<HashMap<String, Tensor>> {
        let e0 = inputs.get("e0").ok_or_else(|| EnhanceError::MissingOutput { name: "e0".into() })?;
        let t = *e0.shape.get(1).unwrap_or(&1);
        let mut out = HashMap::new();
        out.insert(
            "m".to_string(),
            Tensor::filled(vec![1, 1, t, self.bins as i64], self.fill),
        );
        Ok(out)
    }
}

/// Deterministic mock DF decoder. With `identity = true` it ignores `fill`
/// and emits a center-tap identity filter (1 at the center tap, 0
/// elsewhere) — used by the pass-through / mask-attenuation seed scenarios.
pub struct MockDfDecoder {
    fill: f32,
    identity: bool,
    df_bands: usize,
    df_order: usize,
}

impl MockDfDecoder {
    pub fn new(fill: f32, df_bands: usize, df_order: usize) -> Self {
        Self { fill, identity: false, df_bands, df_order }
    }

    pub fn identity(df_bands: usize, df_order: usize) -> Self {
        Self { fill: 0.0, identity: true, df_bands, df_order }
    }
}

impl InferenceBackend for MockDfDecoder {
    fn input_names(&self) -> Vec<String> {
        STATE_KEYS.iter().map(|s| s.to_string()).collect()
    }

    fn output_names(&self) -> Vec<String> {
        vec!["coefs".into()]
    }

    fn run(&self, inputs: &HashMap<String, Tensor>) -> EnhanceResult<HashMap<String, Tensor>> {
        let e0 = inputs.get("e0").ok_or_else(|| EnhanceError::MissingOutput { name: "e0".into() })?;
        let t = (*e0.shape.get(1).unwrap_or(&1)).max(0) as usize;

        let mut data = vec![self.fill; t * self.df_bands * self.df_order];
        if self.identity {
            let center = self.df_order / 2;
            data.fill(0.0);
            for ti in 0..t {
                for b in 0..self.df_bands {
                    data[ti * self.df_bands * self.df_order + b * self.df_order + center] = 1.0;
                }
            }
        }

        let mut out = HashMap::new();
        out.insert(
            "coefs".to_string(),
            Tensor {
                shape: vec![t as i64, self.df_bands as i64, self.df_order as i64],
                data,
            },
        );
        Ok(out)
    }
}

/// A `tract-onnx` backed session. Input/output name order is fixed at
/// construction (tract does not expose named I/O introspection — the
/// teacher's `InferenceEngine::input_shapes`/`output_shapes` note this same
/// limitation), and `run` maps the named input map to positional tensors in
/// that order, then zips tract's positional outputs back to names.
pub struct NativeBackend {
    input_names: Vec<String>,
    output_names: Vec<String>,
    model: tract_onnx::prelude::SimplePlan<
        tract_onnx::prelude::TypedFact,
        Box<dyn tract_onnx::prelude::TypedOp>,
        tract_onnx::prelude::Graph<tract_onnx::prelude::TypedFact, Box<dyn tract_onnx::prelude::TypedOp>>,
    >,
}

impl NativeBackend {
    pub fn load(
        path: &Path,
        input_names: Vec<String>,
        output_names: Vec<String>,
    ) -> EnhanceResult<Self> {
        use tract_onnx::prelude::*;

        let model = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(|e| EnhanceError::ModelLoadFailed { reason: e.to_string() })?
            .into_optimized()
            .map_err(|e| EnhanceError::ModelLoadFailed { reason: e.to_string() })?
            .into_runnable()
            .map_err(|e| EnhanceError::ModelLoadFailed { reason: e.to_string() })?;

        log::info!(target: "ml", "loaded native model {}", path.display());

        Ok(Self { input_names, output_names, model })
    }
}

impl InferenceBackend for NativeBackend {
    fn input_names(&self) -> Vec<String> {
        self.input_names.clone()
    }

    fn output_names(&self) -> Vec<String> {
        self.output_names.clone()
    }

    fn run(&self, inputs: &HashMap<String, Tensor>) -> EnhanceResult<HashMap<String, Tensor>> {
        use tract_onnx::prelude::*;

        let mut ordered = Vec::with_capacity(self.input_names.len());
        for name in &self.input_names {
            let tensor = inputs
                .get(name)
                .ok_or_else(|| EnhanceError::MissingOutput { name: name.clone() })?;
            let shape: Vec<usize> = tensor.shape.iter().map(|&d| d.max(0) as usize).collect();
            let arr = ndarray::ArrayD::from_shape_vec(shape, tensor.data.clone())
                .map_err(|e| EnhanceError::ShapeMismatch {
                    expected: format!("{:?}", tensor.shape),
                    got: e.to_string(),
                })?;
            let tract_tensor: tract_onnx::prelude::Tensor = arr.into();
            ordered.push(tract_tensor.into());
        }

        let outputs = self
            .model
            .run(ordered.into())
            .map_err(|e| EnhanceError::ProcessingFailed(format!("inference failed: {e}")))?;

        let mut result = HashMap::new();
        for (name, value) in self.output_names.iter().zip(outputs.iter()) {
            let view = value
                .to_array_view::<f32>()
                .map_err(|e| EnhanceError::ProcessingFailed(e.to_string()))?;
            let shape: Vec<i64> = view.shape().iter().map(|&d| d as i64).collect();
            let data: Vec<f32> = view.iter().copied().collect();
            result.insert(name.clone(), Tensor { shape, data });
        }

        Ok(result)
    }
}

/// A stub GPU backend: reports unavailability and always fails if invoked.
/// Narrow capability surface only — actual GPU kernels are out of scope.
pub struct GpuStub;

impl InferenceBackend for GpuStub {
    fn input_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn output_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn run(&self, _inputs: &HashMap<String, Tensor>) -> EnhanceResult<HashMap<String, Tensor>> {
        Err(EnhanceError::ModelLoadFailed {
            reason: "GPU execution provider is not available in this build".into(),
        })
    }
}

//! ONNX loading strategies backed by tract.

use std::collections::HashMap;
use std::path::Path;

use ndarray::{ArrayD, IxDyn};
use serde::Deserialize;
use tract_onnx::prelude::*;

use super::LoadStrategy;
use crate::error::{Error, Result};
use crate::model::{GraphOutput, Infer, ModelHandle, Signature, SignatureFn, SignatureGraph};

/// Manifest file that marks a directory as a signature bundle.
pub const SIGNATURE_MANIFEST: &str = "signatures.json";

type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

fn backend(err: TractError) -> Error {
    Error::Backend(format!("{:#}", err))
}

/// Count parameters held as constants in a typed graph.
fn count_parameters(model: &TypedModel) -> u64 {
    model
        .nodes()
        .iter()
        .flat_map(|node| node.outputs.iter())
        .filter_map(|outlet| outlet.fact.konst.as_ref())
        .map(|tensor| tensor.len() as u64)
        .sum()
}

fn to_tensor(input: &ArrayD<f32>) -> Result<Tensor> {
    let contiguous = input.as_standard_layout();
    let data = contiguous
        .as_slice()
        .ok_or_else(|| Error::Runtime("input buffer is not contiguous".into()))?;
    Tensor::from_shape(input.shape(), data).map_err(backend)
}

fn from_tensor(tensor: &Tensor) -> Result<ArrayD<f32>> {
    let data = tensor.as_slice::<f32>().map_err(backend)?.to_vec();
    ArrayD::from_shape_vec(IxDyn(tensor.shape()), data).map_err(|e| Error::Runtime(e.to_string()))
}

fn ensure_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(Error::Backend(format!("{} is not an ONNX file", path.display())))
    }
}

/// Runnable ONNX plan with a single input.
struct OnnxModel {
    plan: OnnxPlan,
    parameters: u64,
}

impl OnnxModel {
    fn from_typed(model: TypedModel) -> Result<Self> {
        let parameters = count_parameters(&model);
        let plan = model.into_runnable().map_err(backend)?;
        Ok(Self { plan, parameters })
    }

    fn run_all(&self, inputs: TVec<TValue>) -> Result<TVec<TValue>> {
        self.plan.run(inputs).map_err(backend)
    }
}

impl Infer for OnnxModel {
    fn infer(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let outputs = self.run_all(tvec!(to_tensor(input)?.into()))?;
        let first = outputs
            .first()
            .ok_or_else(|| Error::Runtime("model returned no outputs".into()))?;
        from_tensor(first)
    }

    fn parameter_count(&self) -> Option<u64> {
        Some(self.parameters)
    }
}

/// Decode, type and optimize a single ONNX file.
pub struct OnnxOptimized;

impl LoadStrategy for OnnxOptimized {
    fn name(&self) -> &str {
        "onnx-optimized"
    }

    fn load(&self, path: &Path) -> Result<ModelHandle> {
        ensure_file(path)?;
        let typed = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|m| m.into_optimized())
            .map_err(backend)?;
        Ok(ModelHandle::callable(OnnxModel::from_typed(typed)?))
    }
}

/// Decode and type a single ONNX file without the optimization pass.
pub struct OnnxPlain;

impl LoadStrategy for OnnxPlain {
    fn name(&self) -> &str {
        "onnx-plain"
    }

    fn load(&self, path: &Path) -> Result<ModelHandle> {
        ensure_file(path)?;
        let typed = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|m| m.into_typed())
            .map_err(backend)?;
        Ok(ModelHandle::callable(OnnxModel::from_typed(typed)?))
    }
}

#[derive(Debug, Deserialize)]
struct BundleManifest {
    signatures: Vec<SignatureEntry>,
}

#[derive(Debug, Deserialize)]
struct SignatureEntry {
    name: String,
    file: String,
    inputs: Vec<String>,
    #[serde(default)]
    outputs: Vec<String>,
}

/// One signature's plan, called with named inputs.
struct OnnxSignature {
    model: OnnxModel,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl SignatureFn for OnnxSignature {
    fn call(&self, inputs: &HashMap<String, ArrayD<f32>>) -> Result<GraphOutput> {
        if let Some(unknown) = inputs.keys().find(|k| !self.inputs.contains(k)) {
            return Err(Error::Backend(format!(
                "unknown input '{}', expected one of {:?}",
                unknown, self.inputs
            )));
        }

        let ordered = self
            .inputs
            .iter()
            .map(|name| {
                let array = inputs
                    .get(name)
                    .ok_or_else(|| Error::Backend(format!("missing input '{}'", name)))?;
                Ok(to_tensor(array)?.into())
            })
            .collect::<Result<TVec<TValue>>>()?;

        let outputs = self.model.run_all(ordered)?;
        let named = outputs
            .iter()
            .enumerate()
            .map(|(i, tensor)| {
                let name = self
                    .outputs
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("output_{}", i));
                Ok((name, from_tensor(tensor)?))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(GraphOutput::Named(named))
    }
}

/// Directory of per-signature ONNX files described by `signatures.json`.
pub struct SignatureBundle;

impl LoadStrategy for SignatureBundle {
    fn name(&self) -> &str {
        "signature-bundle"
    }

    fn load(&self, path: &Path) -> Result<ModelHandle> {
        let manifest_path = path.join(SIGNATURE_MANIFEST);
        if !manifest_path.is_file() {
            return Err(Error::Backend(format!(
                "{} has no {}",
                path.display(),
                SIGNATURE_MANIFEST
            )));
        }

        let manifest: BundleManifest =
            serde_json::from_str(&std::fs::read_to_string(&manifest_path)?)?;
        if manifest.signatures.is_empty() {
            return Err(Error::Backend(format!(
                "{} declares no signatures",
                manifest_path.display()
            )));
        }

        let mut parameters = 0;
        let mut signatures = Vec::with_capacity(manifest.signatures.len());
        for entry in manifest.signatures {
            let typed = tract_onnx::onnx()
                .model_for_path(path.join(&entry.file))
                .and_then(|m| m.into_typed())
                .map_err(backend)?;
            let model = OnnxModel::from_typed(typed)?;
            parameters = u64::max(parameters, model.parameters);

            let inputs = entry.inputs.clone();
            signatures.push(Signature::new(
                entry.name,
                inputs.clone(),
                OnnxSignature {
                    model,
                    inputs,
                    outputs: entry.outputs,
                },
            ));
        }

        Ok(ModelHandle::graph(SignatureGraph::new(signatures, Some(parameters))))
    }
}

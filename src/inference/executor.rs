//! Prediction executor.
//!
//! Runs one forward pass on a resident handle and normalizes the raw output
//! into a `[1, num_classes]` score matrix.

use std::collections::HashMap;

use ndarray::{Array2, ArrayD, Ix2, IxDyn};

use crate::error::{Error, Result};
use crate::model::{GraphOutput, ModelHandle, Signature, SignatureGraph};

/// Entry point used when a graph declares one.
pub const DEFAULT_SIGNATURE: &str = "serving_default";

/// Input names tried, in order, before reading the declared signature.
pub const CONVENTIONAL_INPUT_NAMES: [&str; 3] = ["input_1", "inputs", "x"];

/// Run `input` through `handle`.
pub fn run(handle: &ModelHandle, input: &ArrayD<f32>) -> Result<Array2<f32>> {
    let raw = match handle {
        ModelHandle::Callable(model) => model.infer(input)?,
        ModelHandle::Graph(graph) => run_graph(graph, input)?,
    };
    normalize_output(raw)
}

/// Run a dummy zero tensor of `input_shape` and require a non-empty score row.
pub fn validate(handle: &ModelHandle, input_shape: &[usize]) -> Result<()> {
    let dummy = ArrayD::<f32>::zeros(IxDyn(input_shape));
    let scores = run(handle, &dummy).map_err(|e| Error::Validation(e.to_string()))?;
    if scores.is_empty() {
        return Err(Error::Validation("forward pass produced no scores".into()));
    }
    Ok(())
}

fn run_graph(graph: &SignatureGraph, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
    let signature = graph
        .signature(DEFAULT_SIGNATURE)
        .or_else(|| graph.first_signature())
        .ok_or_else(|| Error::Runtime("model graph exposes no signatures".into()))?;

    for name in CONVENTIONAL_INPUT_NAMES {
        match call_with(signature, name, input) {
            Ok(output) => return Ok(output),
            Err(e) => log::debug!(
                "Signature '{}' rejected input name '{}': {}",
                signature.name,
                name,
                e
            ),
        }
    }

    let declared = signature.inputs.first().ok_or_else(|| {
        Error::Runtime(format!(
            "signature '{}' declares no inputs",
            signature.name
        ))
    })?;
    log::debug!("Using declared input name '{}'", declared);
    call_with(signature, declared, input).map_err(|e| {
        Error::Runtime(format!(
            "all input names failed for signature '{}': {}",
            signature.name, e
        ))
    })
}

fn call_with(signature: &Signature, input_name: &str, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
    let mut inputs = HashMap::with_capacity(1);
    inputs.insert(input_name.to_string(), input.clone());

    match signature.call(&inputs)? {
        GraphOutput::Tensor(tensor) => Ok(tensor),
        GraphOutput::Named(outputs) => outputs
            .into_iter()
            .next()
            .map(|(_, tensor)| tensor)
            .ok_or_else(|| Error::Runtime("signature returned no outputs".into())),
    }
}

/// Rank 1 gains a batch axis; rank 2 with batch 1 passes through.
pub fn normalize_output(raw: ArrayD<f32>) -> Result<Array2<f32>> {
    let shape = raw.shape().to_vec();
    match shape.as_slice() {
        [n] => raw
            .into_shape((1, *n))
            .map_err(|e| Error::Runtime(e.to_string())),
        [1, _] => raw
            .into_dimensionality::<Ix2>()
            .map_err(|e| Error::Runtime(e.to_string())),
        shape => Err(Error::Runtime(format!(
            "unexpected output shape {:?}",
            shape
        ))),
    }
}

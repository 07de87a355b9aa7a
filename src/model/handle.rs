//! In-memory model handles.
//!
//! A loaded artifact is exposed in one of two shapes:
//! - `Callable`: a single inference entry point taking the input tensor
//! - `Graph`: a set of named signatures, each taking named input tensors

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ndarray::ArrayD;

use crate::error::Result;

/// Direct-callable model.
pub trait Infer: Send + Sync {
    /// Run one forward pass.
    fn infer(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>>;

    /// Number of trainable parameters, when the format exposes it.
    fn parameter_count(&self) -> Option<u64> {
        None
    }
}

/// Output of a signature call.
#[derive(Debug, Clone)]
pub enum GraphOutput {
    Tensor(ArrayD<f32>),
    /// Named outputs in declaration order
    Named(Vec<(String, ArrayD<f32>)>),
}

/// Executable body of a named signature.
pub trait SignatureFn: Send + Sync {
    fn call(&self, inputs: &HashMap<String, ArrayD<f32>>) -> Result<GraphOutput>;
}

impl<F> SignatureFn for F
where
    F: Fn(&HashMap<String, ArrayD<f32>>) -> Result<GraphOutput> + Send + Sync,
{
    fn call(&self, inputs: &HashMap<String, ArrayD<f32>>) -> Result<GraphOutput> {
        self(inputs)
    }
}

/// A named entry point with its declared input names.
pub struct Signature {
    pub name: String,
    pub inputs: Vec<String>,
    function: Box<dyn SignatureFn>,
}

impl Signature {
    pub fn new(name: impl Into<String>, inputs: Vec<String>, function: impl SignatureFn + 'static) -> Self {
        Self {
            name: name.into(),
            inputs,
            function: Box::new(function),
        }
    }

    pub fn call(&self, inputs: &HashMap<String, ArrayD<f32>>) -> Result<GraphOutput> {
        self.function.call(inputs)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signature")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .finish()
    }
}

/// Signature-graph model. Signatures keep their declaration order.
#[derive(Debug)]
pub struct SignatureGraph {
    signatures: Vec<Signature>,
    parameter_count: Option<u64>,
}

impl SignatureGraph {
    pub fn new(signatures: Vec<Signature>, parameter_count: Option<u64>) -> Self {
        Self {
            signatures,
            parameter_count,
        }
    }

    pub fn signature(&self, name: &str) -> Option<&Signature> {
        self.signatures.iter().find(|s| s.name == name)
    }

    pub fn first_signature(&self) -> Option<&Signature> {
        self.signatures.first()
    }

    pub fn signature_names(&self) -> Vec<&str> {
        self.signatures.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn parameter_count(&self) -> Option<u64> {
        self.parameter_count
    }
}

/// A resident, ready-to-execute model. Cloning shares the underlying model.
#[derive(Clone)]
pub enum ModelHandle {
    Callable(Arc<dyn Infer>),
    Graph(Arc<SignatureGraph>),
}

impl ModelHandle {
    pub fn callable(model: impl Infer + 'static) -> Self {
        Self::Callable(Arc::new(model))
    }

    pub fn graph(graph: SignatureGraph) -> Self {
        Self::Graph(Arc::new(graph))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Callable(_) => "callable",
            Self::Graph(_) => "signature-graph",
        }
    }

    pub fn parameter_count(&self) -> Option<u64> {
        match self {
            Self::Callable(model) => model.parameter_count(),
            Self::Graph(graph) => graph.parameter_count(),
        }
    }

    /// Whether both handles point at the same loaded model.
    pub fn same_model(&self, other: &ModelHandle) -> bool {
        match (self, other) {
            (Self::Callable(a), Self::Callable(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            (Self::Graph(a), Self::Graph(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("kind", &self.kind())
            .field("parameter_count", &self.parameter_count())
            .finish()
    }
}

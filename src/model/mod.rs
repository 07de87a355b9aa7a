//! Model descriptors, handles and labels.

pub mod handle;
pub mod labels;
pub mod registry;

pub use handle::{GraphOutput, Infer, ModelHandle, Signature, SignatureFn, SignatureGraph};
pub use labels::LabelTable;
pub use registry::{Architecture, DescriptorRegistry, ModelDescriptor};

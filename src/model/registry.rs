//! Model descriptor registry.
//!
//! Maps short model identifiers to an artifact path and the classifier
//! architecture that decides input resolution and normalization.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::config::DescriptorConfig;
use crate::error::{Error, Result};
use crate::preprocess::Normalization;

const DEFAULT_INPUT_SIZE: (u32, u32) = (224, 224);
const INCEPTION_INPUT_SIZE: (u32, u32) = (299, 299);
/// Legacy exports were traced at 192 rows by 288 columns.
const LEGACY_INPUT_SIZE: (u32, u32) = (288, 192);

/// Classifier family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    ViT,
    BiT,
    Swin,
    ConvLegacy,
    RegNet,
    ConvNeXtSmall,
    ConvNeXtTiny,
    DenseNet121,
    EfficientNetV1,
    EfficientNetV2B0,
    InceptionV3,
    MobileNet,
    MobileNetV2,
    MobileNetV3Large,
    MobileNetV3Small,
    ResNet50,
    ResNet101,
    ResNet50V2,
    ResNet101V2,
}

impl Architecture {
    pub const ALL: [Architecture; 19] = [
        Self::ViT,
        Self::BiT,
        Self::Swin,
        Self::ConvLegacy,
        Self::RegNet,
        Self::ConvNeXtSmall,
        Self::ConvNeXtTiny,
        Self::DenseNet121,
        Self::EfficientNetV1,
        Self::EfficientNetV2B0,
        Self::InceptionV3,
        Self::MobileNet,
        Self::MobileNetV2,
        Self::MobileNetV3Large,
        Self::MobileNetV3Small,
        Self::ResNet50,
        Self::ResNet101,
        Self::ResNet50V2,
        Self::ResNet101V2,
    ];

    /// Canonical name, as used in artifact file names.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ViT => "vit",
            Self::BiT => "bit",
            Self::Swin => "swin",
            Self::ConvLegacy => "conv",
            Self::RegNet => "regnet",
            Self::ConvNeXtSmall => "ConvNeXtSmall",
            Self::ConvNeXtTiny => "ConvNeXtTiny",
            Self::DenseNet121 => "DenseNet121",
            Self::EfficientNetV1 => "EfficientNetV1",
            Self::EfficientNetV2B0 => "EfficientNetV2B0",
            Self::InceptionV3 => "InceptionV3",
            Self::MobileNet => "MobileNet",
            Self::MobileNetV2 => "MobileNetV2",
            Self::MobileNetV3Large => "MobileNetV3Large",
            Self::MobileNetV3Small => "MobileNetV3Small",
            Self::ResNet50 => "ResNet50",
            Self::ResNet101 => "ResNet101",
            Self::ResNet50V2 => "ResNet50V2",
            Self::ResNet101V2 => "ResNet101V2",
        }
    }

    /// Input resolution as (width, height).
    pub fn input_size(&self) -> (u32, u32) {
        match self {
            Self::InceptionV3 => INCEPTION_INPUT_SIZE,
            Self::ViT | Self::BiT | Self::Swin | Self::ConvLegacy | Self::RegNet => {
                LEGACY_INPUT_SIZE
            }
            _ => DEFAULT_INPUT_SIZE,
        }
    }

    /// NHWC input shape with a batch of one.
    pub fn input_shape(&self) -> [usize; 4] {
        let (width, height) = self.input_size();
        [1, height as usize, width as usize, 3]
    }

    /// The one normalization this family was trained with.
    pub fn normalization(&self) -> Normalization {
        match self {
            // Legacy exports embed their own rescaling layer.
            Self::ViT | Self::BiT | Self::Swin | Self::ConvLegacy | Self::RegNet => {
                Normalization::Identity
            }
            Self::EfficientNetV1
            | Self::EfficientNetV2B0
            | Self::MobileNetV3Large
            | Self::MobileNetV3Small
            | Self::ConvNeXtSmall
            | Self::ConvNeXtTiny => Normalization::Identity,
            Self::MobileNet
            | Self::MobileNetV2
            | Self::ResNet50V2
            | Self::ResNet101V2
            | Self::InceptionV3 => Normalization::Symmetric,
            Self::ResNet50 | Self::ResNet101 => Normalization::Caffe,
            Self::DenseNet121 => Normalization::Torch,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Architecture {
    type Err = Error;

    /// Case-insensitive; `_` and `-` are ignored so `mobilenetv3_small`
    /// resolves the same as `MobileNetV3Small`.
    fn from_str(s: &str) -> Result<Self> {
        let wanted = squash(s);
        Self::ALL
            .iter()
            .copied()
            .find(|arch| squash(arch.name()) == wanted)
            .ok_or_else(|| Error::UnknownArchitecture(s.to_string()))
    }
}

impl Serialize for Architecture {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

fn squash(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Immutable description of one servable model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub artifact_path: PathBuf,
    pub architecture: Architecture,
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>, artifact_path: impl Into<PathBuf>, architecture: Architecture) -> Self {
        Self {
            id: id.into(),
            artifact_path: artifact_path.into(),
            architecture,
        }
    }
}

/// Built-in table: (id, artifact file, architecture).
const BUILTIN_MODELS: &[(&str, &str, Architecture)] = &[
    ("vit", "vit_model_plankton", Architecture::ViT),
    ("bit", "bit_model_plankton", Architecture::BiT),
    ("swin", "swin_model_plankton", Architecture::Swin),
    ("conv", "conv_model_plankton", Architecture::ConvLegacy),
    ("regnet", "regnet_model_plankton", Architecture::RegNet),
    ("convnext_small", "ConvNeXtSmall500DataReplicated.onnx", Architecture::ConvNeXtSmall),
    ("convnext_tiny", "ConvNeXtTiny500DataReplicated.onnx", Architecture::ConvNeXtTiny),
    ("densenet121", "DenseNet121500DataReplicated.onnx", Architecture::DenseNet121),
    ("efficientnetv2b0", "EfficientNetV2B0500DataReplicated.onnx", Architecture::EfficientNetV2B0),
    ("inceptionv3", "InceptionV3500DataReplicated.onnx", Architecture::InceptionV3),
    ("mobilenet", "MobileNet500DataReplicated.onnx", Architecture::MobileNet),
    ("mobilenetv2", "MobileNetV2500DataReplicated.onnx", Architecture::MobileNetV2),
    ("mobilenetv3_large", "MobileNetV3Large500DataReplicated.onnx", Architecture::MobileNetV3Large),
    ("mobilenetv3_small", "MobileNetV3Small500DataReplicated.onnx", Architecture::MobileNetV3Small),
    ("resnet50", "ResNet50500DataReplicated.onnx", Architecture::ResNet50),
    ("resnet101", "ResNet101500DataReplicated.onnx", Architecture::ResNet101),
    ("resnet50v2", "ResNet50V2500DataReplicated.onnx", Architecture::ResNet50V2),
    ("resnet101v2", "ResNet101V2500DataReplicated.onnx", Architecture::ResNet101V2),
];

/// Static id -> descriptor mapping. Built once; lookups never mutate.
#[derive(Debug, Clone)]
pub struct DescriptorRegistry {
    descriptors: BTreeMap<String, ModelDescriptor>,
}

impl DescriptorRegistry {
    /// The built-in plankton classifier table rooted at `model_root`.
    pub fn builtin(model_root: &Path) -> Self {
        let descriptors = BUILTIN_MODELS
            .iter()
            .map(|(id, file, arch)| {
                (id.to_string(), ModelDescriptor::new(*id, model_root.join(file), *arch))
            })
            .collect();
        Self { descriptors }
    }

    /// Build from configured entries, failing on unmapped architectures.
    pub fn from_config(model_root: &Path, entries: &[DescriptorConfig]) -> Result<Self> {
        let descriptors = entries
            .iter()
            .map(|entry| {
                let architecture: Architecture = entry.architecture.parse()?;
                let path = if entry.artifact.is_absolute() {
                    entry.artifact.clone()
                } else {
                    model_root.join(&entry.artifact)
                };
                Ok(ModelDescriptor::new(entry.id.clone(), path, architecture))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_descriptors(descriptors)
    }

    /// Build from explicit descriptors. Ids and artifact paths must be unique.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ModelDescriptor>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for descriptor in descriptors {
            if map
                .values()
                .any(|d: &ModelDescriptor| d.artifact_path == descriptor.artifact_path)
            {
                return Err(Error::Config(format!(
                    "Artifact {} is registered more than once",
                    descriptor.artifact_path.display()
                )));
            }
            if map.contains_key(&descriptor.id) {
                return Err(Error::Config(format!(
                    "Model id '{}' is registered more than once",
                    descriptor.id
                )));
            }
            map.insert(descriptor.id.clone(), descriptor);
        }
        Ok(Self { descriptors: map })
    }

    /// Look up a model id.
    pub fn resolve(&self, id: &str) -> Result<&ModelDescriptor> {
        self.descriptors
            .get(id.trim())
            .ok_or_else(|| Error::ModelNotAvailable {
                id: id.to_string(),
                available: self.ids(),
            })
    }

    /// All registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        self.descriptors.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.descriptors.values()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

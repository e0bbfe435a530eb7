use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::application::ports::ModelCatalogPort;
use crate::config::Settings;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::model::ModelId;

/// Maps the configured MODELS entries to ONNX files under the weights directory.
pub struct OnnxModelCatalog {
    variants: Vec<String>,
    weights_dir: PathBuf,
}

impl OnnxModelCatalog {
    pub fn new(variants: Vec<String>, weights_dir: PathBuf) -> Self {
        Self { variants, weights_dir }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.models.clone(), settings.paths.weights.clone())
    }
}

#[async_trait]
impl ModelCatalogPort for OnnxModelCatalog {
    fn variants(&self) -> Vec<String> {
        self.variants.clone()
    }

    fn resolve(&self, variant: &str) -> DomainResult<ModelId> {
        if !self.variants.iter().any(|v| v == variant) {
            return Err(DomainError::InvalidInput(format!(
                "unknown model variant {variant:?} (available: {})",
                self.variants.join(", ")
            )));
        }
        let path = if variant.ends_with(".onnx") {
            PathBuf::from(variant)
        } else {
            self.weights_dir.join(format!("{variant}.onnx"))
        };
        Ok(ModelId { name: variant.to_string(), onnx_path: path.to_string_lossy().into_owned() })
    }

    async fn validate_model(&self, model: &ModelId) -> DomainResult<()> {
        if model.onnx_path.trim().is_empty() {
            return Err(DomainError::InvalidInput("onnx_path empty".into()));
        }
        if !Path::new(&model.onnx_path).is_file() {
            return Err(DomainError::Inference(format!(
                "weights for {} not found at {}",
                model.name, model.onnx_path
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(dir: &Path) -> OnnxModelCatalog {
        OnnxModelCatalog::new(vec!["tiny".into(), "custom/best.onnx".into()], dir.to_path_buf())
    }

    #[test]
    fn variants_resolve_under_the_weights_dir() {
        let c = catalog(Path::new("weights"));
        assert_eq!(c.resolve("tiny").unwrap().onnx_path, Path::new("weights").join("tiny.onnx").to_string_lossy());
        assert_eq!(c.resolve("custom/best.onnx").unwrap().onnx_path, "custom/best.onnx");
        assert!(matches!(c.resolve("huge"), Err(DomainError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn missing_weights_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let c = catalog(dir.path());
        let id = c.resolve("tiny").unwrap();
        assert!(matches!(c.validate_model(&id).await, Err(DomainError::Inference(_))));

        std::fs::write(dir.path().join("tiny.onnx"), b"onnx").unwrap();
        c.validate_model(&id).await.unwrap();
    }
}

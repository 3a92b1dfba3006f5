//! Registry of configured chat models.
//!
//! Selection follows the caller's `(modelKey, modelName)` pair: an exact
//! match wins, a key-only match picks that entry's default model, and no
//! match falls back to the first configured entry.

use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::language_models::ChatModel;

/// Descriptor of one registered model.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub model_key: String,
    pub model_name: String,
    pub provider: String,
    pub is_multimodal: bool,
}

/// Ordered model registry; the first entry is the fallback.
#[derive(Default)]
pub struct ModelRegistry {
    entries: Vec<(ModelInfo, Arc<dyn ChatModel>)>,
}

impl ModelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, info: ModelInfo, model: Arc<dyn ChatModel>) {
        debug!(model_key = %info.model_key, model_name = %info.model_name, "registered model");
        self.entries.push((info, model));
    }

    #[must_use]
    pub fn with_model(mut self, info: ModelInfo, model: Arc<dyn ChatModel>) -> Self {
        self.register(info, model);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pick a model for the caller's request.
    pub fn select(
        &self,
        model_key: Option<&str>,
        model_name: Option<&str>,
    ) -> Result<(ModelInfo, Arc<dyn ChatModel>)> {
        if self.entries.is_empty() {
            return Err(Error::NoModel("registry is empty".into()));
        }

        if let Some(key) = model_key {
            if let Some(name) = model_name {
                if let Some((info, model)) = self
                    .entries
                    .iter()
                    .find(|(info, _)| info.model_key == key && info.model_name == name)
                {
                    return Ok((info.clone(), model.clone()));
                }
            }
            if let Some((info, model)) = self.entries.iter().find(|(info, _)| info.model_key == key)
            {
                return Ok((info.clone(), model.clone()));
            }
        }

        let (info, model) = &self.entries[0];
        Ok((info.clone(), model.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language_models::{AiReply, ChatRequest};
    use async_trait::async_trait;

    struct NamedModel(String);

    #[async_trait]
    impl ChatModel for NamedModel {
        fn model_name(&self) -> &str {
            &self.0
        }

        async fn generate(&self, _request: ChatRequest) -> Result<AiReply> {
            Ok(AiReply::text(self.0.clone()))
        }
    }

    fn registry() -> ModelRegistry {
        ModelRegistry::new()
            .with_model(
                ModelInfo {
                    model_key: "k1".into(),
                    model_name: "alpha".into(),
                    provider: "test".into(),
                    is_multimodal: false,
                },
                Arc::new(NamedModel("alpha".into())),
            )
            .with_model(
                ModelInfo {
                    model_key: "k2".into(),
                    model_name: "beta".into(),
                    provider: "test".into(),
                    is_multimodal: true,
                },
                Arc::new(NamedModel("beta".into())),
            )
    }

    #[test]
    fn exact_match_wins() {
        let (info, _) = registry().select(Some("k2"), Some("beta")).unwrap();
        assert_eq!(info.model_name, "beta");
    }

    #[test]
    fn key_only_match() {
        let (info, _) = registry().select(Some("k2"), None).unwrap();
        assert_eq!(info.model_name, "beta");
    }

    #[test]
    fn unknown_key_falls_back_to_first() {
        let (info, _) = registry().select(Some("nope"), Some("gamma")).unwrap();
        assert_eq!(info.model_name, "alpha");
    }

    #[test]
    fn empty_registry_errors() {
        assert!(ModelRegistry::new().select(None, None).is_err());
    }
}

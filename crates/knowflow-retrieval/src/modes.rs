//! Chat modes and their generation parameters.

use serde::{Deserialize, Serialize};

/// How much work the pipeline does for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    Quick,
    Analysis,
    DeepResearch,
    Creative,
    Precise,
    Standard,
}

impl Default for ChatMode {
    fn default() -> Self {
        ChatMode::Standard
    }
}

/// Mode-specific generation settings.
#[derive(Debug, Clone, Copy)]
pub struct ModeConfig {
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: &'static str,
}

impl ChatMode {
    /// Quick mode skips decomposition and reranking.
    #[must_use]
    pub fn is_quick(&self) -> bool {
        matches!(self, ChatMode::Quick)
    }

    #[must_use]
    pub fn config(&self) -> ModeConfig {
        match self {
            ChatMode::Quick => ModeConfig {
                temperature: 0.1,
                max_tokens: 4096,
                system_prompt: "You are an assistant. Answer queries in a professional, enterprise-appropriate format.",
            },
            ChatMode::Analysis => ModeConfig {
                temperature: 0.3,
                max_tokens: 8192,
                system_prompt: "You are an analytical assistant. Provide detailed analysis with insights and patterns.",
            },
            ChatMode::DeepResearch => ModeConfig {
                temperature: 0.2,
                max_tokens: 16384,
                system_prompt: "You are a research assistant. Provide comprehensive, well-sourced answers with detailed explanations.",
            },
            ChatMode::Creative => ModeConfig {
                temperature: 0.7,
                max_tokens: 16384,
                system_prompt: "You are a creative assistant. Provide innovative and imaginative responses while staying relevant.",
            },
            ChatMode::Precise => ModeConfig {
                temperature: 0.05,
                max_tokens: 16384,
                system_prompt: "You are a precise assistant. Provide accurate, factual answers with high attention to detail.",
            },
            ChatMode::Standard => ModeConfig {
                temperature: 0.2,
                max_tokens: 16384,
                system_prompt: "You are an enterprise question answering expert.",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_deserialize_snake_case() {
        let mode: ChatMode = serde_json::from_value(serde_json::json!("deep_research")).unwrap();
        assert_eq!(mode, ChatMode::DeepResearch);
        assert!(!mode.is_quick());
        assert!(ChatMode::Quick.is_quick());
    }
}

//! Query rewriting: follow-up condensation and decomposition.

use serde_json::Value;
use tracing::{debug, warn};

use crate::citations::extract_json;
use crate::error::Result;
use crate::language_models::{ChatModel, ChatRequest};
use crate::messages::Message;

/// One prior turn, as the API layer hands it over.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Conversation {
    /// `user_query` or `bot_response`.
    pub role: String,
    pub content: String,
}

impl Conversation {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user_query".to_string(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn bot(content: impl Into<String>) -> Self {
        Self {
            role: "bot_response".to_string(),
            content: content.into(),
        }
    }
}

fn format_history(history: &[Conversation]) -> String {
    history
        .iter()
        .map(|turn| {
            let speaker = if turn.role == "user_query" {
                "User"
            } else {
                "Assistant"
            };
            format!("{speaker}: {}", turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Rewrite a follow-up question into a self-contained query.
pub async fn rewrite_followup(
    model: &dyn ChatModel,
    query: &str,
    history: &[Conversation],
) -> Result<String> {
    let prompt = format!(
        "Given the conversation below, rewrite the user's last question so it \
         is fully self-contained: resolve pronouns and implicit references \
         against the conversation. Reply with the rewritten question only.\n\n\
         Conversation:\n{}\n\nQuestion: {query}",
        format_history(history)
    );
    let reply = model
        .generate(ChatRequest::new(vec![Message::human(prompt)]))
        .await?;
    let rewritten = reply.content.trim();
    if rewritten.is_empty() {
        warn!("follow-up transformation returned empty text; keeping original query");
        return Ok(query.to_string());
    }
    debug!(rewritten, "transformed follow-up query");
    Ok(rewritten.to_string())
}

/// Decompose a query into independent sub-queries. Falls back to the
/// original query when the model's output is unusable.
pub async fn decompose_query(model: &dyn ChatModel, query: &str) -> Result<Vec<String>> {
    let prompt = format!(
        "Break the question below into the minimal set of independent search \
         queries needed to answer it. Respond with JSON only, in the form \
         {{\"queries\": [\"...\"]}}. A simple question yields a single query.\n\n\
         Question: {query}"
    );
    let reply = model
        .generate(ChatRequest::new(vec![Message::human(prompt)]))
        .await?;

    let queries = extract_json(&reply.content)
        .and_then(|json| serde_json::from_str::<Value>(json).ok())
        .and_then(|value| {
            value.get("queries").and_then(Value::as_array).map(|items| {
                items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(s.clone()),
                        Value::Object(map) => map
                            .get("query")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        _ => None,
                    })
                    .filter(|s| !s.trim().is_empty())
                    .collect::<Vec<_>>()
            })
        })
        .unwrap_or_default();

    if queries.is_empty() {
        warn!("query decomposition produced nothing usable; using the original query");
        return Ok(vec![query.to_string()]);
    }
    debug!(count = queries.len(), "decomposed query");
    Ok(queries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language_models::AiReply;
    use async_trait::async_trait;

    struct ScriptedModel(String);

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _request: ChatRequest) -> Result<AiReply> {
            Ok(AiReply::text(self.0.clone()))
        }
    }

    #[tokio::test]
    async fn decomposition_parses_json_queries() {
        let model = ScriptedModel(
            r#"{"queries": ["q3 revenue forecast", "q3 revenue actuals"]}"#.to_string(),
        );
        let queries = decompose_query(&model, "compare q3 forecast to actuals").await.unwrap();
        assert_eq!(queries, vec!["q3 revenue forecast", "q3 revenue actuals"]);
    }

    #[tokio::test]
    async fn decomposition_accepts_object_items() {
        let model =
            ScriptedModel(r#"{"queries": [{"query": "alpha"}, {"query": "beta"}]}"#.to_string());
        let queries = decompose_query(&model, "ignored").await.unwrap();
        assert_eq!(queries, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn garbage_decomposition_falls_back_to_original() {
        let model = ScriptedModel("I cannot do that".to_string());
        let queries = decompose_query(&model, "original question").await.unwrap();
        assert_eq!(queries, vec!["original question"]);
    }

    #[tokio::test]
    async fn empty_rewrite_keeps_original() {
        let model = ScriptedModel("   ".to_string());
        let rewritten = rewrite_followup(&model, "what about Q4?", &[Conversation::user("hi")])
            .await
            .unwrap();
        assert_eq!(rewritten, "what about Q4?");
    }
}

//! Model listing via the server's OpenAI-compatible `/v1/models` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use llamad_core::{CatalogError, ModelCatalog, ModelInfo};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Catalog backed by `GET /v1/models` on the running server.
///
/// Different llama-server builds answer with either a bare array or an
/// OpenAI-style `{"data": [...]}` envelope; both are accepted. Entries
/// missing an id are skipped rather than failing the whole list.
pub struct HttpModelCatalog {
    client: reqwest::Client,
    url: String,
}

impl HttpModelCatalog {
    /// Create a catalog for the server at `host:port`.
    pub fn new(host: &str, port: u16) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: format!("http://{host}:{port}/v1/models"),
        }
    }
}

#[async_trait]
impl ModelCatalog for HttpModelCatalog {
    async fn list_models(&self) -> Result<Vec<ModelInfo>, CatalogError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| CatalogError::RequestFailed(err.to_string()))?;
        if !response.status().is_success() {
            return Err(CatalogError::RequestFailed(format!(
                "unexpected status {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|err| CatalogError::InvalidResponse(err.to_string()))?;
        let models = parse_model_list(&body)?;
        debug!(url = %self.url, count = models.len(), "model list fetched");
        Ok(models)
    }
}

fn parse_model_list(body: &Value) -> Result<Vec<ModelInfo>, CatalogError> {
    let entries = body
        .get("data")
        .and_then(Value::as_array)
        .or_else(|| body.as_array())
        .ok_or_else(|| {
            CatalogError::InvalidResponse("expected a model array or a data field".into())
        })?;
    Ok(entries.iter().filter_map(model_from_entry).collect())
}

fn model_from_entry(entry: &Value) -> Option<ModelInfo> {
    let id = entry.get("id").and_then(Value::as_str)?;
    let name = entry
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_else(|| id.rsplit('/').next().unwrap_or(id));
    let size = entry
        .get("size")
        .and_then(Value::as_u64)
        .or_else(|| entry.pointer("/meta/size").and_then(Value::as_u64));
    let model = ModelInfo::new(id, name);
    Some(match size {
        Some(bytes) => model.with_size(bytes),
        None => model,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_openai_style_envelope() {
        let body = json!({
            "object": "list",
            "data": [
                {"id": "models/llama-3.gguf", "object": "model", "meta": {"size": 4096}},
                {"id": "mistral.gguf", "name": "Mistral 7B"}
            ]
        });
        let models = parse_model_list(&body).unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].id, "models/llama-3.gguf");
        assert_eq!(models[0].name, "llama-3.gguf");
        assert_eq!(models[0].size, Some(4096));
        assert_eq!(models[1].name, "Mistral 7B");
        assert_eq!(models[1].size, None);
    }

    #[test]
    fn parses_bare_array() {
        let body = json!([{"id": "llama-3.gguf", "size": 7}]);
        let models = parse_model_list(&body).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].size, Some(7));
    }

    #[test]
    fn entries_without_id_are_skipped() {
        let body = json!({"data": [{"name": "anonymous"}, {"id": "ok.gguf"}]});
        let models = parse_model_list(&body).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "ok.gguf");
    }

    #[test]
    fn non_list_bodies_are_invalid() {
        let err = parse_model_list(&json!({"status": "ok"})).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidResponse(_)));
    }
}

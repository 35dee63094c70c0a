use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::load_state::{LoadedModel, ModelLoadState};
use super::params::{GenerationParams, Passthrough};
use super::{until_cancelled, TextGenerator, USER_AGENT};
use crate::config::TextBackendConfig;
use crate::error::{BridgeError, BridgeResult};

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
    #[serde(flatten)]
    params: &'a GenerationParams,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    results: Vec<GenerateResult>,
}

#[derive(Debug, Deserialize)]
struct GenerateResult {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ModelInfoResponse {
    result: ModelInfo,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    model_name: String,
    #[serde(default)]
    lora_names: Vec<String>,
}

/// Outcome of a control-plane request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    Done,
    AlreadyUnloaded,
    NotUnloaded,
}

pub struct TextBackendClient {
    client: Client,
    base_url: String,
    passthrough: Passthrough,
    poll_interval: Duration,
    load_state: Arc<ModelLoadState>,
    shutdown: CancellationToken,
}

impl TextBackendClient {
    /// Fails when a passthrough parameter has a type the backend cannot take.
    pub fn new(
        config: &TextBackendConfig,
        load_state: Arc<ModelLoadState>,
        shutdown: CancellationToken,
    ) -> BridgeResult<Self> {
        let passthrough = Passthrough::resolve(&config.passthrough)?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            passthrough,
            poll_interval: Duration::from_millis(config.unload_poll_ms),
            load_state,
            shutdown,
        })
    }

    pub fn load_state(&self) -> &Arc<ModelLoadState> {
        &self.load_state
    }

    async fn post_json(&self, endpoint: &str, payload: &Value) -> BridgeResult<String> {
        let url = format!("{}{}", self.base_url, endpoint);
        tracing::debug!("[TextBackend] POST {} {}", url, payload);

        let response = until_cancelled(&self.shutdown, async {
            self.client
                .post(&url)
                .json(payload)
                .send()
                .await
                .map_err(BridgeError::from)
        })
        .await?;

        let status = response.status();
        let body = until_cancelled(&self.shutdown, async {
            response.text().await.map_err(BridgeError::from)
        })
        .await?;
        tracing::debug!("[TextBackend] Response {} {}", status, body);

        if !status.is_success() {
            return Err(BridgeError::BackendStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    fn generate_payload(
        &self,
        prompt: &str,
        negative_prompt: Option<&str>,
        params: &GenerationParams,
    ) -> BridgeResult<Value> {
        let request = GenerateRequest {
            prompt,
            negative_prompt,
            params,
        };
        let mut payload: Map<String, Value> = match serde_json::to_value(&request) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(BridgeError::Malformed("request is not an object".to_string())),
            Err(e) => return Err(BridgeError::Malformed(e.to_string())),
        };
        self.passthrough.merge_into(&mut payload);
        Ok(Value::Object(payload))
    }

    async fn generate_once(&self, payload: &Value) -> BridgeResult<String> {
        let body = self.post_json("/api/v1/generate", payload).await?;
        let response: GenerateResponse =
            serde_json::from_str(&body).map_err(|e| BridgeError::Malformed(e.to_string()))?;

        response
            .results
            .into_iter()
            .next()
            .map(|r| r.text)
            .ok_or_else(|| BridgeError::Malformed("no results in response".to_string()))
    }

    pub async fn identify_loaded_model(&self) -> BridgeResult<LoadedModel> {
        let body = self
            .post_json("/api/v1/model", &json!({ "action": "info" }))
            .await?;
        let info: ModelInfoResponse =
            serde_json::from_str(&body).map_err(|e| BridgeError::Malformed(e.to_string()))?;

        Ok(LoadedModel {
            name: info.result.model_name,
            adapters: info.result.lora_names,
        })
    }

    pub async fn unload(&self) -> BridgeResult<()> {
        self.post_json("/api/v1/model", &json!({ "action": "unload" }))
            .await
            .map(|_| ())
    }

    pub async fn load(&self, model: &LoadedModel) -> BridgeResult<()> {
        let payload = json!({
            "action": "load",
            "model_name": model.name,
            "args": { "lora": model.adapters },
        });
        self.post_json("/api/v1/model", &payload).await.map(|_| ())
    }

    /// Remembers the current model, raises the unload flag, then frees the backend.
    pub async fn unload_model(&self) -> BridgeResult<ControlOutcome> {
        if self.load_state.is_unloaded() {
            return Ok(ControlOutcome::AlreadyUnloaded);
        }

        let model = self.identify_loaded_model().await?;
        if !self.load_state.begin_unload(model.clone()).await {
            return Ok(ControlOutcome::AlreadyUnloaded);
        }

        tracing::info!(
            "[TextBackend] Unloading model '{}' (adapters: {:?})",
            model.name,
            model.adapters
        );
        if let Err(e) = self.unload().await {
            tracing::error!("[TextBackend] Unload failed, keeping model marked loaded: {}", e);
            self.load_state.abort_unload().await;
            return Err(e);
        }
        Ok(ControlOutcome::Done)
    }

    /// Loads the remembered model back and lowers the unload flag.
    pub async fn reload_model(&self) -> BridgeResult<ControlOutcome> {
        let Some(model) = self.load_state.remembered().await else {
            return Ok(ControlOutcome::NotUnloaded);
        };

        tracing::info!(
            "[TextBackend] Reloading model '{}' (adapters: {:?})",
            model.name,
            model.adapters
        );
        self.load(&model).await?;
        self.load_state.finish_reload().await;
        Ok(ControlOutcome::Done)
    }
}

#[async_trait]
impl TextGenerator for TextBackendClient {
    async fn generate(
        &self,
        prompt: &str,
        negative_prompt: Option<&str>,
        params: &GenerationParams,
    ) -> BridgeResult<String> {
        let payload = self.generate_payload(prompt, negative_prompt, params)?;

        loop {
            self.load_state
                .wait_until_loaded(self.poll_interval, &self.shutdown)
                .await?;

            match self.generate_once(&payload).await {
                Err(e) if !e.is_cancelled() && self.load_state.is_unloaded() => {
                    tracing::warn!(
                        "[TextBackend] Generation interrupted by model unload, retrying after reload: {}",
                        e
                    );
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str) -> TextBackendConfig {
        TextBackendConfig {
            url: url.to_string(),
            unload_poll_ms: 20,
            ..Default::default()
        }
    }

    fn client(config: &TextBackendConfig) -> TextBackendClient {
        TextBackendClient::new(
            config,
            Arc::new(ModelLoadState::new()),
            CancellationToken::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_generate_merges_passthrough() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/generate"))
            .and(body_partial_json(json!({
                "prompt": "User: hi\nBot:",
                "max_new_tokens": 1000,
                "truncation_length": 4096,
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"results": [{"text": " Hello!"}]})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut cfg = config(&mock_server.uri());
        cfg.passthrough
            .insert("truncation_length".to_string(), json!(4096));
        let text = client(&cfg)
            .generate("User: hi\nBot:", None, &GenerationParams::default())
            .await
            .unwrap();

        assert_eq!(text, " Hello!");
    }

    #[tokio::test]
    async fn test_generate_sends_negative_prompt() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/generate"))
            .and(body_partial_json(json!({"negative_prompt": "be rude"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"results": [{"text": "ok"}]})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let text = client(&config(&mock_server.uri()))
            .generate("p", Some("be rude"), &GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(text, "ok");
    }

    #[test]
    fn test_unsupported_passthrough_fails_construction() {
        let mut cfg = config("http://127.0.0.1:1");
        let mut table = HashMap::new();
        table.insert("nested".to_string(), json!({"a": 1}));
        cfg.passthrough = table;

        let result = TextBackendClient::new(
            &cfg,
            Arc::new(ModelLoadState::new()),
            CancellationToken::new(),
        );
        assert!(matches!(
            result,
            Err(BridgeError::UnsupportedPassthrough { .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let result = client(&config(&mock_server.uri()))
            .generate("p", None, &GenerationParams::default())
            .await;
        assert!(matches!(result, Err(BridgeError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_unload_and_reload_cycle() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/model"))
            .and(body_partial_json(json!({"action": "info"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {"model_name": "llama-13b", "lora_names": ["storyteller"]}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/model"))
            .and(body_partial_json(json!({"action": "unload"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "ok"})))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/model"))
            .and(body_partial_json(json!({
                "action": "load",
                "model_name": "llama-13b",
                "args": {"lora": ["storyteller"]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "ok"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = client(&config(&mock_server.uri()));
        assert_eq!(client.unload_model().await.unwrap(), ControlOutcome::Done);
        assert!(client.load_state().is_unloaded());
        assert_eq!(
            client.unload_model().await.unwrap(),
            ControlOutcome::AlreadyUnloaded
        );

        assert_eq!(client.reload_model().await.unwrap(), ControlOutcome::Done);
        assert!(!client.load_state().is_unloaded());
        assert_eq!(
            client.reload_model().await.unwrap(),
            ControlOutcome::NotUnloaded
        );
    }

    #[tokio::test]
    async fn test_generate_waits_for_reload() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/generate"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"results": [{"text": "late"}]})),
            )
            .mount(&mock_server)
            .await;

        let client = Arc::new(client(&config(&mock_server.uri())));
        client
            .load_state()
            .begin_unload(LoadedModel {
                name: "m".to_string(),
                adapters: vec![],
            })
            .await;

        let task = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .generate("p", None, &GenerationParams::default())
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!task.is_finished());
        assert!(mock_server.received_requests().await.unwrap().is_empty());

        client.load_state().finish_reload().await;
        let text = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(text, "late");
    }

    #[tokio::test]
    async fn test_generation_failed_by_unload_is_retried_after_reload() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/generate"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_string("model unloaded")
                    .set_delay(Duration::from_millis(150)),
            )
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/generate"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"results": [{"text": "ok"}]})),
            )
            .mount(&mock_server)
            .await;

        let client = Arc::new(client(&config(&mock_server.uri())));
        let task = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .generate("p", None, &GenerationParams::default())
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        client
            .load_state()
            .begin_unload(LoadedModel {
                name: "m".to_string(),
                adapters: vec![],
            })
            .await;

        // The failed request has come back, but the retry waits for the reload.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!task.is_finished());
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);

        client.load_state().finish_reload().await;
        let text = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(text, "ok");
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_generation() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/generate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"results": [{"text": "slow"}]}))
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&mock_server)
            .await;

        let shutdown = CancellationToken::new();
        let client = TextBackendClient::new(
            &config(&mock_server.uri()),
            Arc::new(ModelLoadState::new()),
            shutdown.clone(),
        )
        .unwrap();

        let cancel = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let result = client
            .generate("p", None, &GenerationParams::default())
            .await;
        assert!(matches!(result, Err(BridgeError::Cancelled)));
    }
}

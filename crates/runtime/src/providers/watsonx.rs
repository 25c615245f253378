//! IBM watsonx.ai text-chat backend.

use std::time::{Duration, Instant};

use crate::model::{Backend, Message, ModelError, ModelRequest, ModelResponse, Role, Usage};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

pub const DEFAULT_MODEL: &str = "meta-llama/llama-3-3-70b-instruct";
pub const DEFAULT_IAM_URL: &str = "https://iam.cloud.ibm.com/identity/token";
const CHAT_PATH: &str = "/ml/v1/text/chat";
const API_VERSION: &str = "2024-05-31";
const IAM_GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:apikey";

/// Tokens this close to expiry are refreshed before use.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decoding {
    Greedy,
    Sample,
}

/// Generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub decoding_method: Decoding,
    pub max_new_tokens: u32,
    pub min_new_tokens: u32,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub random_seed: u64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            decoding_method: Decoding::Greedy,
            max_new_tokens: 8192,
            min_new_tokens: 1,
            temperature: 0.5,
            top_k: 50,
            top_p: 1.0,
            repetition_penalty: 1.0,
            random_seed: 42,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model_id: &'a str,
    project_id: &'a str,
    messages: Vec<ApiMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    seed: u64,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct IamToken {
    access_token: String,
    #[serde(default = "default_token_lifetime")]
    expires_in: u64,
}

fn default_token_lifetime() -> u64 {
    3600
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating a watsonx backend.
#[derive(Debug, Clone)]
pub struct WatsonxBackendBuilder {
    url: Option<String>,
    api_key: Option<String>,
    project_id: Option<String>,
    model: String,
    iam_url: String,
    params: GenerationParams,
}

impl Default for WatsonxBackendBuilder {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            project_id: None,
            model: DEFAULT_MODEL.to_string(),
            iam_url: DEFAULT_IAM_URL.to_string(),
            params: GenerationParams::default(),
        }
    }
}

impl WatsonxBackendBuilder {
    /// Regional service URL, e.g. `https://us-south.ml.cloud.ibm.com`.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn iam_url(mut self, iam_url: impl Into<String>) -> Self {
        self.iam_url = iam_url.into();
        self
    }

    pub fn params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn build(self) -> WatsonxBackend {
        WatsonxBackend {
            client: reqwest::Client::new(),
            url: self.url,
            api_key: self.api_key,
            project_id: self.project_id,
            model: self.model,
            iam_url: self.iam_url,
            params: self.params,
            token: Mutex::new(None),
        }
    }
}

/// watsonx.ai chat backend.
///
/// Credentials are optional at construction; a call without them fails with
/// [`ModelError::Config`].
pub struct WatsonxBackend {
    client: reqwest::Client,
    url: Option<String>,
    api_key: Option<String>,
    project_id: Option<String>,
    model: String,
    iam_url: String,
    params: GenerationParams,
    token: Mutex<Option<CachedToken>>,
}

impl WatsonxBackend {
    pub fn builder() -> WatsonxBackendBuilder {
        WatsonxBackendBuilder::default()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn role_to_api(role: Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn build_request<'a>(
        &'a self,
        project_id: &'a str,
        request: &ModelRequest<'a>,
    ) -> ApiRequest<'a> {
        let mut messages: Vec<ApiMessage<'a>> = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = request.system {
            messages.push(ApiMessage {
                role: "system",
                content: system,
            });
        }
        messages.extend(request.messages.iter().map(|m: &'a Message| ApiMessage {
            role: Self::role_to_api(m.role),
            content: &m.content,
        }));

        // Greedy decoding is expressed as zero temperature on the chat endpoint.
        let temperature = match self.params.decoding_method {
            Decoding::Greedy => 0.0,
            Decoding::Sample => self.params.temperature,
        };

        ApiRequest {
            model_id: &self.model,
            project_id,
            messages,
            max_tokens: self.params.max_new_tokens,
            temperature,
            top_p: self.params.top_p,
            seed: self.params.random_seed,
        }
    }

    fn chat_url(base: &str) -> Result<Url, ModelError> {
        let endpoint = format!("{}{CHAT_PATH}", base.trim_end_matches('/'));
        Url::parse_with_params(&endpoint, &[("version", API_VERSION)])
            .map_err(|e| ModelError::Config(format!("invalid IBM_CLOUD_URL {base}: {e}")))
    }

    async fn access_token(&self, api_key: &str) -> Result<String, ModelError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN
        {
            return Ok(token.value.clone());
        }

        debug!(iam_url = %self.iam_url, "Requesting IAM token");
        let response = self
            .client
            .post(&self.iam_url)
            .header("accept", "application/json")
            .form(&[("grant_type", IAM_GRANT_TYPE), ("apikey", api_key)])
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api { status, body });
        }

        let token: IamToken = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(format!("IAM token: {e}")))?;

        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(value)
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ModelError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ModelError::Config(format!("{name} is not set")))
}

impl std::fmt::Display for WatsonxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "watsonx({})", self.model)
    }
}

impl Backend for WatsonxBackend {
    async fn call(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let base = required(&self.url, "IBM_CLOUD_URL")?;
        let api_key = required(&self.api_key, "API_KEY")?;
        let project_id = required(&self.project_id, "PROJECT_ID")?;

        let url = Self::chat_url(base)?;
        let token = self.access_token(api_key).await?;
        let api_request = self.build_request(project_id, &request);

        debug!(model = %self.model, messages = api_request.messages.len(), "Calling watsonx chat");
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .header("content-type", "application/json")
            .header("accept", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api { status, body });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        let text = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ModelError::InvalidResponse("response has no choices".into()))?;

        let usage = api_response
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(ModelResponse { text, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// Answers each incoming HTTP request with the next canned JSON body and
    /// hands back the request bodies it saw.
    async fn stub_server(replies: Vec<Value>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for reply in replies {
                let (stream, _) = listener.accept().await.unwrap();
                let mut stream = BufReader::new(stream);
                let mut request_line = String::new();
                stream.read_line(&mut request_line).await.unwrap();

                let mut content_length = 0;
                loop {
                    let mut header = String::new();
                    stream.read_line(&mut header).await.unwrap();
                    if header.trim().is_empty() {
                        break;
                    }
                    if let Some((name, value)) = header.split_once(':')
                        && name.eq_ignore_ascii_case("content-length")
                    {
                        content_length = value.trim().parse().unwrap();
                    }
                }
                let mut body = vec![0; content_length];
                stream.read_exact(&mut body).await.unwrap();
                seen.push(format!(
                    "{} {}",
                    request_line.trim(),
                    String::from_utf8(body).unwrap()
                ));

                let payload = reply.to_string();
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{payload}",
                    payload.len()
                );
                stream.get_mut().write_all(response.as_bytes()).await.unwrap();
                stream.get_mut().shutdown().await.unwrap();
            }
            seen
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn missing_credentials_fail_the_call() {
        let backend = WatsonxBackend::builder().url("https://example.invalid").build();
        let messages = [Message::user("hi")];
        let err = backend.call(ModelRequest::new(&messages)).await.unwrap_err();
        assert_eq!(err, ModelError::Config("API_KEY is not set".into()));
    }

    #[test]
    fn greedy_requests_use_zero_temperature() {
        let backend = WatsonxBackend::builder().build();
        let messages = [Message::user("What is 2 + 2?")];
        let request = ModelRequest::new(&messages).with_system("Be brief.");
        let body = serde_json::to_value(backend.build_request("proj", &request)).unwrap();

        assert_eq!(body["model_id"], DEFAULT_MODEL);
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["max_tokens"], 8192);
        assert_eq!(body["seed"], 42);
        assert_eq!(body["messages"][0], json!({"role": "system", "content": "Be brief."}));
        assert_eq!(body["messages"][1]["role"], "user");
    }

    #[test]
    fn chat_url_carries_api_version() {
        let url = WatsonxBackend::chat_url("https://us-south.ml.cloud.ibm.com/").unwrap();
        assert_eq!(
            url.as_str(),
            "https://us-south.ml.cloud.ibm.com/ml/v1/text/chat?version=2024-05-31"
        );
    }

    #[tokio::test]
    async fn exchanges_api_key_then_chats() {
        let (base, server) = stub_server(vec![
            json!({"access_token": "tok-123", "expires_in": 3600}),
            json!({
                "choices": [{"message": {"role": "assistant", "content": "Final Answer: 96"}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 4}
            }),
        ])
        .await;

        let backend = WatsonxBackend::builder()
            .url(&base)
            .iam_url(format!("{base}/identity/token"))
            .api_key("secret key")
            .project_id("proj")
            .build();

        let messages = [Message::user("(3 + 5) x 12?")];
        let response = backend.call(ModelRequest::new(&messages)).await.unwrap();
        assert_eq!(response.text, "Final Answer: 96");
        assert_eq!(response.usage.output_tokens, 4);

        let seen = server.await.unwrap();
        assert!(seen[0].starts_with("POST /identity/token"));
        assert!(seen[0].contains("grant_type=urn%3Aibm%3Aparams%3Aoauth%3Agrant-type%3Aapikey"));
        assert!(seen[0].contains("apikey=secret+key"));
        assert!(seen[1].starts_with("POST /ml/v1/text/chat?version=2024-05-31"));
        assert!(seen[1].contains("\"project_id\":\"proj\""));
    }
}

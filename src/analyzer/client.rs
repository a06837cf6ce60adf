use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::AnalyzerConfig;

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("请求超时")]
    Timeout,

    #[error("额度不足或被限流: {0}")]
    Quota(String),

    #[error("API 返回错误 {status}: {body}")]
    Http { status: StatusCode, body: String },

    #[error("网络请求错误: {0}")]
    Network(String),

    #[error("响应格式错误: {0}")]
    Malformed(String),

    #[error("无法从响应中解析出概括: {0}")]
    Unparseable(String),
}

/// 生成式文本接口：发送提示词，返回模型输出
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String, AnalyzerError>;
}

/// OpenAI 兼容的 chat/completions 请求体
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct ChatClient {
    client: reqwest::Client,
    config: AnalyzerConfig,
}

impl ChatClient {
    pub fn new(config: AnalyzerConfig) -> Result<Self, AnalyzerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AnalyzerError::Network(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// 检查 API key 是否已配置
    pub fn is_configured(&self) -> bool {
        !self.config.api_key.trim().is_empty()
    }

    async fn do_request(&self, request: &ChatRequest<'_>) -> Result<String, AnalyzerError> {
        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyzerError::Quota(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyzerError::Http { status, body });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| AnalyzerError::Malformed(e.to_string()))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AnalyzerError::Malformed("响应中没有文本内容".to_string()))
    }
}

fn classify(e: reqwest::Error) -> AnalyzerError {
    if e.is_timeout() {
        AnalyzerError::Timeout
    } else {
        AnalyzerError::Network(e.to_string())
    }
}

#[async_trait]
impl TextGenerator for ChatClient {
    /// 带指数退避的重试
    async fn generate(&self, system: &str, prompt: &str) -> Result<String, AnalyzerError> {
        if !self.is_configured() {
            return Err(AnalyzerError::Http {
                status: StatusCode::UNAUTHORIZED,
                body: "API key 未配置".to_string(),
            });
        }

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.3,
        };

        let attempts = self.config.max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                info!(
                    "API 重试 ({}/{})，等待 {}ms...",
                    attempt + 1,
                    attempts,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            match self.do_request(&request).await {
                Ok(content) => return Ok(content),
                Err(e) => {
                    warn!("API 调用失败 (尝试 {}/{}): {}", attempt + 1, attempts, e);
                    last_error = Some(e);
                }
            }
        }

        let fallback = || AnalyzerError::Malformed("API 调用失败".to_string());
        Err(last_error.unwrap_or_else(fallback))
    }
}

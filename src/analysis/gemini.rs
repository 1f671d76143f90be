// 该文件是 Jianzhi （鉴质） 项目的一部分。
// src/analysis/gemini.rs - Gemini 图像分析服务
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! # Gemini 分析器
//!
//! 通过 `generateContent` REST 接口调用 Gemini 多模态模型。
//!
//! ```text
//! gemini:///gemini-3-flash-preview
//! gemini://generativelanguage.googleapis.com/gemini-3-flash-preview?key=...
//! ```
//!
//! 未在 URL 中给出 `key` 时依次读取 `GEMINI_API_KEY`、`API_KEY` 环境变量。

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

use super::{ANALYSIS_INSTRUCTION, AnalysisError, AnalysisReport, Analyzer, response_schema};
use crate::config::ANALYSIS_TIMEOUT;
use crate::inspection::EncodedImage;
use crate::{FromUrl, FromUrlWithScheme};

const DEFAULT_HOST: &str = "generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";
const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

#[derive(Error, Debug)]
pub enum GeminiAnalyzerError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub struct GeminiAnalyzer {
  client: reqwest::Client,
  endpoint: String,
  model: String,
  api_key: String,
}

impl GeminiAnalyzer {
  pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
    Self {
      client: http_client(),
      endpoint: format!("https://{}", DEFAULT_HOST),
      model: model.into(),
      api_key: api_key.into(),
    }
  }

  /// 覆盖服务地址，例如 `http://127.0.0.1:8080`
  pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
    self.endpoint = endpoint.into().trim_end_matches('/').to_string();
    self
  }

  pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
    self.api_key = api_key.into();
    self
  }

  pub fn model(&self) -> &str {
    &self.model
  }

  fn request_url(&self) -> String {
    format!(
      "{}/v1beta/models/{}:generateContent",
      self.endpoint, self.model
    )
  }

  fn request_body(image: &EncodedImage) -> Value {
    json!({
      "contents": [{
        "parts": [
          { "text": ANALYSIS_INSTRUCTION },
          {
            "inlineData": {
              "mimeType": image.mime_type(),
              "data": image.to_base64(),
            }
          }
        ]
      }],
      "generationConfig": {
        "responseMimeType": "application/json",
        "responseSchema": response_schema(),
      }
    })
  }
}

fn http_client() -> reqwest::Client {
  reqwest::Client::builder()
    .timeout(ANALYSIS_TIMEOUT)
    .build()
    .unwrap_or_else(|e| {
      warn!("无法创建带超时的 HTTP 客户端，使用默认配置: {}", e);
      reqwest::Client::new()
    })
}

impl FromUrlWithScheme for GeminiAnalyzer {
  const SCHEME: &'static str = "gemini";
}

impl FromUrl for GeminiAnalyzer {
  type Error = GeminiAnalyzerError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GeminiAnalyzerError::SchemeMismatch);
    }

    let model = match url.path().trim_matches('/') {
      "" => DEFAULT_MODEL.to_string(),
      model => model.to_string(),
    };

    let api_key = url
      .query_pairs()
      .find(|(k, _)| k == "key")
      .map(|(_, v)| v.into_owned())
      .or_else(|| API_KEY_VARS.iter().find_map(|var| std::env::var(var).ok()))
      .unwrap_or_default();

    let mut analyzer = GeminiAnalyzer::new(model, api_key);
    if let Some(host) = url.host_str().filter(|h| !h.is_empty()) {
      let endpoint = match url.port() {
        Some(port) => format!("https://{}:{}", host, port),
        None => format!("https://{}", host),
      };
      analyzer = analyzer.with_endpoint(endpoint);
    }
    Ok(analyzer)
  }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
  #[serde(default)]
  candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
  content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
  #[serde(default)]
  parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
  text: Option<String>,
}

impl GenerateContentResponse {
  fn text(self) -> Option<String> {
    let text: String = self
      .candidates
      .into_iter()
      .next()?
      .content?
      .parts
      .into_iter()
      .filter_map(|p| p.text)
      .collect();
    (!text.trim().is_empty()).then_some(text)
  }
}

#[async_trait]
impl Analyzer for GeminiAnalyzer {
  async fn analyze(&self, image: &EncodedImage) -> Result<AnalysisReport, AnalysisError> {
    debug!(
      "发送 {}x{} 图像 ({} 字节) 到模型 {}",
      image.width(),
      image.height(),
      image.bytes().len(),
      self.model
    );

    let response = self
      .client
      .post(self.request_url())
      .header("x-goog-api-key", &self.api_key)
      .json(&Self::request_body(image))
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
      return Err(AnalysisError::Api {
        status: status.as_u16(),
        body,
      });
    }

    let text = response
      .json::<GenerateContentResponse>()
      .await?
      .text()
      .ok_or(AnalysisError::EmptyResponse)?;
    debug!("模型响应: {}", text);

    Ok(AnalysisReport::parse(&text)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn url_selects_model_host_and_key() {
    let url = Url::parse("gemini://example.test:8443/gemini-pro-vision?key=secret").unwrap();
    let analyzer = GeminiAnalyzer::from_url(&url).unwrap();
    assert_eq!(analyzer.model(), "gemini-pro-vision");
    assert_eq!(analyzer.api_key, "secret");
    assert_eq!(
      analyzer.request_url(),
      "https://example.test:8443/v1beta/models/gemini-pro-vision:generateContent"
    );
  }

  #[test]
  fn bare_url_uses_defaults() {
    let analyzer = GeminiAnalyzer::from_url(&Url::parse("gemini:///").unwrap()).unwrap();
    assert_eq!(analyzer.model(), DEFAULT_MODEL);
    assert!(analyzer.request_url().starts_with("https://generativelanguage.googleapis.com/"));
  }

  #[test]
  fn body_carries_instruction_image_and_schema() {
    let image = EncodedImage::encode_jpeg(&image::RgbImage::new(2, 2), 80).unwrap();
    let body = GeminiAnalyzer::request_body(&image);
    let parts = &body["contents"][0]["parts"];
    assert_eq!(parts[0]["text"], ANALYSIS_INSTRUCTION);
    assert_eq!(parts[1]["inlineData"]["mimeType"], "image/jpeg");
    assert_eq!(parts[1]["inlineData"]["data"], image.to_base64());
    assert_eq!(
      body["generationConfig"]["responseSchema"]["required"][1],
      "status"
    );
  }

  #[test]
  fn candidate_text_is_concatenated() {
    let response: GenerateContentResponse = serde_json::from_value(json!({
      "candidates": [{ "content": { "parts": [{ "text": "{\"a\":" }, { "text": "1}" }] } }]
    }))
    .unwrap();
    assert_eq!(response.text().as_deref(), Some("{\"a\":1}"));

    let empty: GenerateContentResponse = serde_json::from_value(json!({})).unwrap();
    assert!(empty.text().is_none());
  }
}

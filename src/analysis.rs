// 该文件是 Jianzhi （鉴质） 项目的一部分。
// src/analysis.rs - 远程图像分析
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

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::FromUrl;
use crate::config::ANALYSIS_TIMEOUT;
use crate::inspection::{EncodedImage, ImageRef, InspectionResult, ResultIdGenerator};

mod report;
pub use self::report::{
  ANALYSIS_INSTRUCTION, AnalysisReport, DEFAULT_PRODUCT_LABEL, FALLBACK_PRODUCT_LABEL,
  ReportDefect, ReportStatus, response_schema,
};

#[cfg(feature = "gemini")]
mod gemini;
#[cfg(feature = "gemini")]
pub use self::gemini::{GeminiAnalyzer, GeminiAnalyzerError};

mod replay;
pub use self::replay::{ReplayAnalyzer, ReplayAnalyzerError};

#[derive(Error, Debug)]
pub enum AnalysisError {
  #[cfg(feature = "gemini")]
  #[error("请求分析服务失败: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("分析服务返回错误 ({status}): {body}")]
  Api { status: u16, body: String },
  #[error("分析服务响应为空")]
  EmptyResponse,
  #[error("无法解析分析结果: {0}")]
  Parse(#[from] serde_json::Error),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("分析服务在 {0:?} 内未响应")]
  Timeout(Duration),
}

/// 外部图像分析服务
#[async_trait]
pub trait Analyzer: Send + Sync {
  async fn analyze(&self, image: &EncodedImage) -> Result<AnalysisReport, AnalysisError>;
}

#[async_trait]
impl<A: Analyzer + ?Sized> Analyzer for Arc<A> {
  async fn analyze(&self, image: &EncodedImage) -> Result<AnalysisReport, AnalysisError> {
    (**self).analyze(image).await
  }
}

/// 分析客户端
///
/// 对调用方永不失败：任何传输或解析错误都会被替换为一条
/// `FAIL` 的兜底结果，控制器只需处理成功路径。
pub struct AnalysisClient {
  analyzer: Box<dyn Analyzer>,
  ids: ResultIdGenerator,
  timeout: Duration,
}

impl AnalysisClient {
  pub fn new(analyzer: impl Analyzer + 'static) -> Self {
    Self {
      analyzer: Box::new(analyzer),
      ids: ResultIdGenerator::new(),
      timeout: ANALYSIS_TIMEOUT,
    }
  }

  /// 单次分析的时限，超时按失败处理
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub async fn analyze(&self, image: EncodedImage) -> InspectionResult {
    let captured_at = Utc::now();
    let now = Instant::now();

    let analyzed = tokio::time::timeout(self.timeout, self.analyzer.analyze(&image))
      .await
      .unwrap_or(Err(AnalysisError::Timeout(self.timeout)));
    let report = match analyzed {
      Ok(report) => report,
      Err(e) => {
        warn!("图像分析失败，使用兜底结果: {}", e);
        AnalysisReport::fallback()
      }
    };

    let id = self.ids.next_id(Utc::now());
    let result = report.into_result(id, captured_at, ImageRef::new(image));
    info!(
      "分析完成 {}: {} {} 个缺陷，耗时: {:.2?}",
      result.id,
      result.verdict(),
      result.defects.len(),
      now.elapsed()
    );
    result
  }
}

#[derive(Error, Debug)]
pub enum AnalyzerUrlError {
  #[cfg(feature = "gemini")]
  #[error("Gemini 分析器配置错误: {0}")]
  Gemini(#[from] GeminiAnalyzerError),
  #[error("回放分析器配置错误: {0}")]
  Replay(#[from] ReplayAnalyzerError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 按 URL 方案选择的分析器
pub enum AnalyzerWrapper {
  #[cfg(feature = "gemini")]
  Gemini(GeminiAnalyzer),
  Replay(ReplayAnalyzer),
}

impl FromUrl for AnalyzerWrapper {
  type Error = AnalyzerUrlError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    use crate::FromUrlWithScheme;

    match url.scheme() {
      #[cfg(feature = "gemini")]
      GeminiAnalyzer::SCHEME => Ok(AnalyzerWrapper::Gemini(GeminiAnalyzer::from_url(url)?)),
      ReplayAnalyzer::SCHEME => Ok(AnalyzerWrapper::Replay(ReplayAnalyzer::from_url(url)?)),
      _ => Err(AnalyzerUrlError::SchemeMismatch),
    }
  }
}

impl AnalyzerWrapper {
  /// 使用命令行提供的密钥覆盖 URL 或环境变量中的密钥
  pub fn with_api_key(self, api_key: Option<String>) -> Self {
    match (self, api_key) {
      #[cfg(feature = "gemini")]
      (AnalyzerWrapper::Gemini(analyzer), Some(key)) => {
        AnalyzerWrapper::Gemini(analyzer.with_api_key(key))
      }
      (wrapper, _) => wrapper,
    }
  }
}

#[async_trait]
impl Analyzer for AnalyzerWrapper {
  async fn analyze(&self, image: &EncodedImage) -> Result<AnalysisReport, AnalysisError> {
    match self {
      #[cfg(feature = "gemini")]
      AnalyzerWrapper::Gemini(analyzer) => analyzer.analyze(image).await,
      AnalyzerWrapper::Replay(analyzer) => analyzer.analyze(image).await,
    }
  }
}

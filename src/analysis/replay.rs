// 该文件是 Jianzhi （鉴质） 项目的一部分。
// src/analysis/replay.rs - 回放分析器
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

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use super::{AnalysisError, AnalysisReport, Analyzer};
use crate::inspection::EncodedImage;
use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum ReplayAnalyzerError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("缺少响应文件路径")]
  MissingPath,
}

enum ReplaySource {
  File(PathBuf),
  Inline(String),
}

/// 回放预先录制的分析服务响应，经过与真实响应相同的解析流程
pub struct ReplayAnalyzer {
  source: ReplaySource,
}

impl ReplayAnalyzer {
  pub fn from_file(path: impl Into<PathBuf>) -> Self {
    Self {
      source: ReplaySource::File(path.into()),
    }
  }

  pub fn inline(response: impl Into<String>) -> Self {
    Self {
      source: ReplaySource::Inline(response.into()),
    }
  }
}

impl FromUrlWithScheme for ReplayAnalyzer {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayAnalyzer {
  type Error = ReplayAnalyzerError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ReplayAnalyzerError::SchemeMismatch);
    }

    // replay:///path/to/response.json
    if url.path().is_empty() || url.path() == "/" {
      return Err(ReplayAnalyzerError::MissingPath);
    }
    Ok(Self::from_file(url.path()))
  }
}

#[async_trait]
impl Analyzer for ReplayAnalyzer {
  async fn analyze(&self, image: &EncodedImage) -> Result<AnalysisReport, AnalysisError> {
    debug!("回放分析 {}x{} 图像", image.width(), image.height());
    let text = match &self.source {
      ReplaySource::File(path) => tokio::fs::read_to_string(path).await?,
      ReplaySource::Inline(text) => text.clone(),
    };
    Ok(AnalysisReport::parse(&text)?)
  }
}

// 该文件是 Jianzhi （鉴质） 项目的一部分。
// src/args.rs - 检验控制台参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use thiserror::Error;
use url::Url;

/// Jianzhi 实时检验控制台
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 摄像头设备
  #[arg(long, value_name = "CAMERA", default_value = "v4l2:///dev/video0")]
  pub camera: Url,

  /// 分析服务，例如 gemini:///gemini-3-flash-preview 或 replay:///path/to/response.json
  #[arg(long, value_name = "ANALYZER", default_value = "gemini:///")]
  pub analyzer: Url,

  /// 分析服务密钥
  #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
  pub api_key: Option<String>,

  /// 快照输出目录，例如 folder:///var/lib/jianzhi
  #[arg(long, value_name = "OUTPUT")]
  pub record: Option<Url>,

  /// 自动扫描间隔（秒）
  #[arg(long, value_name = "SECONDS", default_value_t = 4)]
  pub auto_scan_secs: u64,

  /// 叠加层显示尺寸，例如 1280x720；缺省时跟随视频尺寸
  #[arg(long, value_name = "WxH")]
  pub display: Option<DisplaySize>,

  /// 标签字体文件
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 启动后立即打开摄像头
  #[arg(long)]
  pub auto_start: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplaySize {
  pub width: u32,
  pub height: u32,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("无效的显示尺寸 '{0}'，应为 WxH")]
pub struct DisplaySizeError(String);

impl FromStr for DisplaySize {
  type Err = DisplaySizeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || DisplaySizeError(s.to_string());
    let (w, h) = s
      .trim()
      .split_once(['x', 'X'])
      .ok_or_else(invalid)?;
    let width = w.trim().parse().map_err(|_| invalid())?;
    let height = h.trim().parse().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
      return Err(invalid());
    }
    Ok(Self { width, height })
  }
}

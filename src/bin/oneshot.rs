// 该文件是 Jianzhi （鉴质） 项目的一部分。
// src/bin/oneshot.rs - 单张图像检验
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use url::Url;

use jianzhi::FromUrl;
use jianzhi::analysis::{AnalysisClient, AnalyzerWrapper};
use jianzhi::capture::load_from_file;
use jianzhi::config::JPEG_QUALITY;
use jianzhi::output::SnapshotOutput;

/// Jianzhi 单张图像检验
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 待检验的图像文件
  #[arg(long, value_name = "FILE")]
  pub input: PathBuf,
  /// 分析服务
  #[arg(long, value_name = "ANALYZER", default_value = "gemini:///")]
  pub analyzer: Url,
  /// 分析服务密钥
  #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
  pub api_key: Option<String>,
  /// 标注快照输出目录
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,
  /// 以 JSON 打印完整结果
  #[arg(long)]
  pub json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入文件: {}", args.input.display());
  info!("分析服务: {}", args.analyzer);

  let analyzer = AnalyzerWrapper::from_url(&args.analyzer)
    .context("分析服务配置错误")?
    .with_api_key(args.api_key.clone());
  let output = args
    .output
    .as_ref()
    .map(SnapshotOutput::from_url)
    .transpose()
    .context("快照输出配置错误")?;

  let image = load_from_file(&args.input, JPEG_QUALITY).await?;
  info!("图像尺寸 {}x{}", image.width(), image.height());

  let client = AnalysisClient::new(analyzer);
  let now = std::time::Instant::now();
  let result = client.analyze(image).await;
  info!("检验完成，耗时: {:.2?}", now.elapsed());

  if args.json {
    println!("{}", serde_json::to_string_pretty(&result)?);
  } else {
    println!("{} {} {}", result.id, result.product_label, result.verdict());
    for defect in &result.defects {
      println!(
        "  - {} ({}): {}",
        defect.kind,
        defect.severity.as_str(),
        defect.description
      );
    }
  }

  if let Some(output) = output {
    let path = output.save(&result)?;
    info!("标注图像已保存到 {}", path.display());
  }

  Ok(())
}

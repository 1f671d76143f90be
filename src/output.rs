// 该文件是 Jianzhi （鉴质） 项目的一部分。
// src/output.rs - 检验快照输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # 快照输出
//!
//! 将检验结果的缺陷叠加层绘制到采集图像上并保存为 PNG：
//!
//! ```text
//! folder:///var/lib/jianzhi/snapshots
//! folder:///var/lib/jianzhi/snapshots?font=/usr/share/fonts/DejaVuSans.ttf&record
//! ```
//!
//! 文件按 `YYYY/MM/DD/HH-MM-SS-XXXX.png` 组织；带 `record` 参数时
//! 另写一份同名 `.json` 结果记录。

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};

use ab_glyph::FontArc;
use chrono::{DateTime, Datelike, Local};
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::inspection::InspectionResult;
use crate::overlay::{ImageSurface, ImageSurfaceError, OverlayRenderer, load_font};
use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum SnapshotError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("字体错误: {0}")]
  Font(#[from] ImageSurfaceError),
  #[error("图像错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("序列化错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

pub struct SnapshotOutput {
  directory: PathBuf,
  renderer: OverlayRenderer,
  font: Option<FontArc>,
  record: bool,
  counter: AtomicU16,
}

impl FromUrlWithScheme for SnapshotOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for SnapshotOutput {
  type Error = SnapshotError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(SnapshotError::SchemeMismatch);
    }

    let font = url
      .query_pairs()
      .find(|(k, _)| k == "font")
      .map(|(_, v)| load_font(v.into_owned()))
      .transpose()?;
    let record = url.query_pairs().any(|(k, _)| k == "record");

    let mut output = SnapshotOutput::new(url.path());
    output.font = font;
    output.record = record;
    Ok(output)
  }
}

impl SnapshotOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      renderer: OverlayRenderer::default(),
      font: None,
      record: false,
      counter: AtomicU16::new(0),
    }
  }

  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  fn frame_id(&self) -> u16 {
    self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn frame_path(&self, at: DateTime<Local>) -> Result<PathBuf, SnapshotError> {
    let directory = self
      .directory
      .join(at.year().to_string())
      .join(format!("{:02}", at.month()))
      .join(format!("{:02}", at.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      at.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  /// 绘制并保存一条结果，返回 PNG 路径
  pub fn save(&self, result: &InspectionResult) -> Result<PathBuf, SnapshotError> {
    let frame = result.image_ref.image().decode()?;
    let (width, height) = frame.dimensions();

    let mut surface = ImageSurface::new(width, height, self.font.clone());
    self
      .renderer
      .paint(&mut surface, (width, height), Some(result));
    debug!("已绘制 {} 个缺陷框", result.located_defects().count());

    self.write(result, &surface.composite_onto(&frame))
  }

  /// 以实时叠加层合成快照，叠加层为空时按结果重新绘制
  pub fn save_live(
    &self,
    result: &InspectionResult,
    live: &ImageSurface,
  ) -> Result<PathBuf, SnapshotError> {
    if live.is_blank() {
      return self.save(result);
    }
    let frame = result.image_ref.image().decode()?;
    self.write(result, &live.composite_onto(&frame))
  }

  fn write(&self, result: &InspectionResult, image: &RgbImage) -> Result<PathBuf, SnapshotError> {
    let path = self.frame_path(result.captured_at.with_timezone(&Local))?;
    image.save(&path)?;

    if self.record {
      let record = path.with_extension("json");
      serde_json::to_writer_pretty(BufWriter::new(File::create(&record)?), result)?;
    }

    info!("快照 {} 已保存到 {}", result.id, path.display());
    Ok(path)
  }
}

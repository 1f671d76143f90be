// 该文件是 Jianzhi （鉴质） 项目的一部分。
// src/inspection.rs - 检验结果数据模型
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

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Local, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageError, RgbImage};
use serde::{Deserialize, Serialize, Serializer};

/// 归一化边界框坐标的满量程
pub const NORMALIZED_SCALE: f32 = 1000.0;

const JPEG_MIME: &str = "image/jpeg";

/// 缺陷严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Low,
  Medium,
  High,
}

impl Severity {
  /// 解析分析服务返回的严重程度，未知取值按 `Low` 处理
  pub fn from_label(label: &str) -> Self {
    match label.trim().to_ascii_lowercase().as_str() {
      "high" => Severity::High,
      "medium" => Severity::Medium,
      _ => Severity::Low,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Severity::Low => "low",
      Severity::Medium => "medium",
      Severity::High => "high",
    }
  }
}

/// 归一化边界框 `[y_min, x_min, y_max, x_max]`，坐标范围 0-1000
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
  pub y_min: f32,
  pub x_min: f32,
  pub y_max: f32,
  pub x_max: f32,
}

impl BoundingBox {
  /// 构造边界框，坐标会被截断到 [0, 1000] 并保证 min <= max
  pub fn new(y_min: f32, x_min: f32, y_max: f32, x_max: f32) -> Self {
    let clamp = |v: f32| {
      if v.is_finite() {
        v.clamp(0.0, NORMALIZED_SCALE)
      } else {
        0.0
      }
    };
    let (y_min, y_max) = (clamp(y_min), clamp(y_max));
    let (x_min, x_max) = (clamp(x_min), clamp(x_max));

    Self {
      y_min: y_min.min(y_max),
      x_min: x_min.min(x_max),
      y_max: y_min.max(y_max),
      x_max: x_min.max(x_max),
    }
  }

  /// 从分析服务的数组表示构造，长度不为 4 时返回 `None`
  pub fn from_slice(values: &[f64]) -> Option<Self> {
    match values {
      [y_min, x_min, y_max, x_max] => Some(Self::new(
        *y_min as f32,
        *x_min as f32,
        *y_max as f32,
        *x_max as f32,
      )),
      _ => None,
    }
  }
}

impl From<[f32; 4]> for BoundingBox {
  fn from(v: [f32; 4]) -> Self {
    BoundingBox::new(v[0], v[1], v[2], v[3])
  }
}

impl From<BoundingBox> for [f32; 4] {
  fn from(b: BoundingBox) -> Self {
    [b.y_min, b.x_min, b.y_max, b.x_max]
  }
}

/// 单个检出缺陷
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Defect {
  /// 缺陷类别（自由文本，例如 "scratch"）
  pub kind: String,
  pub description: String,
  pub severity: Severity,
  /// 缺失时表示没有空间定位，渲染时直接跳过
  pub bounding_box: Option<BoundingBox>,
}

/// 检验结论
///
/// `Pending` 为保留值，流水线本身只会产生 `Pass` 与 `Fail`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InspectionStatus {
  Pass,
  Fail,
  Pending,
}

impl fmt::Display for InspectionStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      InspectionStatus::Pass => "PASS",
      InspectionStatus::Fail => "FAIL",
      InspectionStatus::Pending => "PENDING",
    };
    f.write_str(s)
  }
}

/// JPEG 编码后的静态图像
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
  jpeg: Vec<u8>,
  width: u32,
  height: u32,
}

impl fmt::Debug for EncodedImage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EncodedImage")
      .field("bytes", &self.jpeg.len())
      .field("width", &self.width)
      .field("height", &self.height)
      .finish()
  }
}

impl EncodedImage {
  /// 将 RGB 图像按给定质量（1-100）编码为 JPEG
  pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Self, ImageError> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100)).encode_image(image)?;
    Ok(Self {
      jpeg,
      width: image.width(),
      height: image.height(),
    })
  }

  pub fn bytes(&self) -> &[u8] {
    &self.jpeg
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn mime_type(&self) -> &'static str {
    JPEG_MIME
  }

  /// 不含 `data:` 前缀的 base64 负载
  pub fn to_base64(&self) -> String {
    STANDARD.encode(&self.jpeg)
  }

  pub fn to_data_uri(&self) -> String {
    format!("data:{};base64,{}", JPEG_MIME, self.to_base64())
  }

  pub fn decode(&self) -> Result<RgbImage, ImageError> {
    Ok(image::load_from_memory_with_format(&self.jpeg, image::ImageFormat::Jpeg)?.to_rgb8())
  }
}

/// 对采集图像的不透明引用，克隆开销很小
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRef(Arc<EncodedImage>);

impl ImageRef {
  pub fn new(image: EncodedImage) -> Self {
    Self(Arc::new(image))
  }

  pub fn image(&self) -> &EncodedImage {
    &self.0
  }
}

impl Serialize for ImageRef {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.0.to_data_uri())
  }
}

/// 一次完成的分析结果，构造后不可变，以 `Arc` 在组件间共享
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionResult {
  pub id: String,
  pub captured_at: DateTime<Utc>,
  pub status: InspectionStatus,
  pub confidence: f32,
  pub defects: Vec<Defect>,
  pub image_ref: ImageRef,
  pub product_label: String,
}

impl InspectionResult {
  pub fn is_fail(&self) -> bool {
    self.status == InspectionStatus::Fail
  }

  /// 实时画面角标文本，例如 `PASS (93%)`
  pub fn verdict(&self) -> String {
    format!("{} ({:.0}%)", self.status, self.confidence * 100.0)
  }

  pub fn local_time(&self) -> String {
    self.captured_at.with_timezone(&Local).format("%H:%M:%S").to_string()
  }

  /// 带空间定位的缺陷
  pub fn located_defects(&self) -> impl Iterator<Item = (&Defect, &BoundingBox)> {
    self
      .defects
      .iter()
      .filter_map(|d| d.bounding_box.as_ref().map(|b| (d, b)))
  }
}

/// 结果编号生成器，格式为 `QC-<毫秒时间戳>`，同一会话内严格递增
#[derive(Debug, Default)]
pub struct ResultIdGenerator {
  last: AtomicI64,
}

impl ResultIdGenerator {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn next_id(&self, now: DateTime<Utc>) -> String {
    let millis = now.timestamp_millis();
    let mut prev = self.last.load(Ordering::Relaxed);
    loop {
      let candidate = millis.max(prev + 1);
      match self
        .last
        .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed)
      {
        Ok(_) => return format!("QC-{}", candidate),
        Err(actual) => prev = actual,
      }
    }
  }
}

// 该文件是 Jianzhi （鉴质） 项目的一部分。
// src/capture/file.rs - 图片文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use image::ImageReader;
use tracing::{debug, warn};

use super::ImageIoError;
use crate::inspection::EncodedImage;

/// 异步解码用户提供的图片文件，并重新编码为与摄像头采集相同的 JPEG 表示
///
/// 除解码成功与否外不做任何格式或大小校验。
pub async fn load_from_file(
  path: impl AsRef<Path>,
  quality: u8,
) -> Result<EncodedImage, ImageIoError> {
  let path = path.as_ref().to_path_buf();
  let shown = path.display().to_string();

  let decoded = tokio::task::spawn_blocking(move || decode_file(&path, quality))
    .await
    .map_err(|e| ImageIoError::Unreadable(format!("{}: 解码任务异常: {}", shown, e)))?;

  match &decoded {
    Ok(image) => debug!(
      "图片文件已加载: {} ({}x{})",
      shown,
      image.width(),
      image.height()
    ),
    Err(e) => warn!("{}", e),
  }
  decoded
}

fn decode_file(path: &Path, quality: u8) -> Result<EncodedImage, ImageIoError> {
  let unreadable =
    |reason: String| ImageIoError::Unreadable(format!("{}: {}", path.display(), reason));

  let image = ImageReader::open(path)
    .map_err(|e| unreadable(e.to_string()))?
    .with_guessed_format()
    .map_err(|e| unreadable(e.to_string()))?
    .decode()
    .map_err(|e| unreadable(e.to_string()))?
    .to_rgb8();

  EncodedImage::encode_jpeg(&image, quality).map_err(|e| unreadable(e.to_string()))
}

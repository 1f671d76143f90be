// 该文件是 Jianzhi （鉴质） 项目的一部分。
// src/capture.rs - 采集源管理
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

use async_trait::async_trait;
use image::RgbImage;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::CameraRequest;
use crate::inspection::EncodedImage;

mod file;
pub use self::file::load_from_file;

#[cfg(feature = "v4l2_camera")]
mod v4l2;
#[cfg(feature = "v4l2_camera")]
pub use self::v4l2::{V4l2Camera, V4l2CameraError};

#[derive(Error, Debug)]
pub enum CameraError {
  #[error("摄像头访问被拒绝或设备不可用: {0}")]
  AccessDenied(String),
}

#[derive(Error, Debug)]
pub enum CaptureError {
  #[error("视频流尚未输出画面")]
  NoFrame,
  #[error("图像编码错误: {0}")]
  Encode(#[from] image::ImageError),
}

#[derive(Error, Debug)]
pub enum ImageIoError {
  #[error("无法读取图像文件: {0}")]
  Unreadable(String),
}

/// 已打开的视频流
///
/// 实现者需要持续刷新最新一帧；`stop` 必须幂等，并释放全部设备资源。
pub trait VideoStream: Send {
  /// 当前画面的固有尺寸，尚未出帧时为 `(0, 0)`
  fn intrinsic_size(&self) -> (u32, u32);

  fn current_frame(&self) -> Option<RgbImage>;

  fn stop(&mut self);
}

/// 摄像头后端
#[async_trait]
pub trait CameraBackend: Send + Sync {
  /// 按请求打开摄像头；失败时不得遗留半初始化的设备
  async fn open(&self, request: &CameraRequest) -> Result<Box<dyn VideoStream>, CameraError>;
}

/// 摄像头设备句柄，离开作用域时释放设备
pub struct DeviceHandle {
  stream: Box<dyn VideoStream>,
}

impl DeviceHandle {
  fn new(stream: Box<dyn VideoStream>) -> Self {
    Self { stream }
  }

  pub fn intrinsic_size(&self) -> (u32, u32) {
    self.stream.intrinsic_size()
  }

  /// 截取当前画面并编码为 JPEG
  pub fn capture_frame(&self, quality: u8) -> Result<EncodedImage, CaptureError> {
    let (width, height) = self.stream.intrinsic_size();
    if width == 0 || height == 0 {
      return Err(CaptureError::NoFrame);
    }
    let frame = self.stream.current_frame().ok_or(CaptureError::NoFrame)?;
    Ok(EncodedImage::encode_jpeg(&frame, quality)?)
  }

  fn release(&mut self) {
    self.stream.stop();
  }
}

impl Drop for DeviceHandle {
  fn drop(&mut self) {
    self.release();
  }
}

/// 采集源管理器，独占摄像头设备
pub struct CaptureSource<B> {
  backend: B,
  handle: Option<DeviceHandle>,
  jpeg_quality: u8,
  video_size: watch::Sender<(u32, u32)>,
}

impl<B: CameraBackend> CaptureSource<B> {
  pub fn new(backend: B, jpeg_quality: u8) -> Self {
    let (video_size, _) = watch::channel((0, 0));
    Self {
      backend,
      handle: None,
      jpeg_quality,
      video_size,
    }
  }

  pub fn is_active(&self) -> bool {
    self.handle.is_some()
  }

  /// 订阅视频画面尺寸，停止时为 `(0, 0)`
  pub fn video_size(&self) -> watch::Receiver<(u32, u32)> {
    self.video_size.subscribe()
  }

  pub async fn start_camera(&mut self, request: &CameraRequest) -> Result<(), CameraError> {
    if self.handle.is_some() {
      debug!("摄像头已处于打开状态");
      return Ok(());
    }

    info!(
      "请求摄像头: {:?} 朝向, 理想分辨率 {}x{}",
      request.facing, request.ideal_width, request.ideal_height
    );
    let stream = self.backend.open(request).await?;
    let handle = DeviceHandle::new(stream);
    self.video_size.send_replace(handle.intrinsic_size());
    self.handle = Some(handle);
    info!("摄像头已打开");
    Ok(())
  }

  /// 释放摄像头，可重复调用
  pub fn stop_camera(&mut self) {
    if let Some(handle) = self.handle.take() {
      drop(handle);
      self.video_size.send_replace((0, 0));
      info!("摄像头已释放");
    }
  }

  pub fn capture_frame(&mut self) -> Result<EncodedImage, CaptureError> {
    let handle = self.handle.as_ref().ok_or(CaptureError::NoFrame)?;
    let size = handle.intrinsic_size();
    self.video_size.send_if_modified(|current| {
      let changed = *current != size;
      *current = size;
      changed
    });
    let image = handle.capture_frame(self.jpeg_quality);
    if let Err(CaptureError::Encode(e)) = &image {
      warn!("采集帧编码失败: {}", e);
    }
    image
  }
}

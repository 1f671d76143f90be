// 该文件是 Jianzhi （鉴质） 项目的一部分。
// src/config.rs - 会话配置
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

use std::time::Duration;

/// 自动扫描间隔
pub const AUTO_SCAN_DELAY: Duration = Duration::from_secs(4);
/// 历史记录容量
pub const HISTORY_CAPACITY: usize = 50;
/// 采集图像的 JPEG 质量
pub const JPEG_QUALITY: u8 = 80;
/// 单次分析的最长等待时间
pub const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(60);
/// 叠加层重绘间隔（约 60 Hz）
pub const REPAINT_INTERVAL: Duration = Duration::from_millis(16);

const IDEAL_WIDTH: u32 = 1280;
const IDEAL_HEIGHT: u32 = 720;

/// 摄像头朝向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
  /// 后置（朝向被检物）
  Environment,
  /// 前置
  User,
}

/// 摄像头打开请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraRequest {
  pub facing: FacingMode,
  pub ideal_width: u32,
  pub ideal_height: u32,
  pub audio: bool,
}

impl Default for CameraRequest {
  fn default() -> Self {
    Self {
      facing: FacingMode::Environment,
      ideal_width: IDEAL_WIDTH,
      ideal_height: IDEAL_HEIGHT,
      audio: false,
    }
  }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
  pub auto_scan_delay: Duration,
  pub history_capacity: usize,
  pub jpeg_quality: u8,
  pub camera: CameraRequest,
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      auto_scan_delay: AUTO_SCAN_DELAY,
      history_capacity: HISTORY_CAPACITY,
      jpeg_quality: JPEG_QUALITY,
      camera: CameraRequest::default(),
    }
  }
}

impl SessionConfig {
  pub fn with_auto_scan_delay(mut self, delay: Duration) -> Self {
    self.auto_scan_delay = delay;
    self
  }

  pub fn with_camera(mut self, camera: CameraRequest) -> Self {
    self.camera = camera;
    self
  }

  pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
    self.jpeg_quality = quality.clamp(1, 100);
    self
  }
}

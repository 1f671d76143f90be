// 该文件是 Jianzhi （鉴质） 项目的一部分。
// src/capture/v4l2.rs - V4L2 摄像头后端
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::io::ErrorKind;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_trait::async_trait;
use image::RgbImage;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use super::{CameraBackend, CameraError, VideoStream};
use crate::config::{CameraRequest, FacingMode};
use crate::{FromUrl, FromUrlWithScheme};

const DEFAULT_DEVICE: &str = "/dev/video0";
const BUFFER_COUNT: u32 = 4;
// 取帧等待上限，采集线程据此检查停止标志
const POLL_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Error, Debug)]
pub enum V4l2CameraError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// V4L2 摄像头
///
/// 设备在独立线程中打开并持续采集，最新一帧保存在共享槽位中，
/// 与浏览器中持续播放的视频元素语义一致。
#[derive(Debug, Clone)]
pub struct V4l2Camera {
  device_path: String,
}

impl V4l2Camera {
  pub fn new(device_path: impl Into<String>) -> Self {
    Self {
      device_path: device_path.into(),
    }
  }

  pub fn device_path(&self) -> &str {
    &self.device_path
  }
}

impl Default for V4l2Camera {
  fn default() -> Self {
    Self::new(DEFAULT_DEVICE)
  }
}

impl FromUrlWithScheme for V4l2Camera {
  const SCHEME: &'static str = "v4l2";
}

impl FromUrl for V4l2Camera {
  type Error = V4l2CameraError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4l2CameraError::SchemeMismatch);
    }

    // v4l2:///dev/video0
    let device_path = if url.path().is_empty() || url.path() == "/" {
      DEFAULT_DEVICE.to_string()
    } else {
      url.path().to_string()
    };
    Ok(Self::new(device_path))
  }
}

#[async_trait]
impl CameraBackend for V4l2Camera {
  async fn open(&self, request: &CameraRequest) -> Result<Box<dyn VideoStream>, CameraError> {
    if request.facing != FacingMode::Environment {
      debug!("V4L2 设备不区分朝向，忽略 {:?}", request.facing);
    }

    let latest = Arc::new(Mutex::new(None));
    let running = Arc::new(AtomicBool::new(true));
    let (ready_tx, ready_rx) = oneshot::channel();

    let worker = {
      let device_path = self.device_path.clone();
      let request = request.clone();
      let latest = latest.clone();
      let running = running.clone();
      thread::Builder::new()
        .name("jianzhi-v4l2".into())
        .spawn(move || capture_loop(&device_path, &request, latest, running, ready_tx))
        .map_err(|e| CameraError::AccessDenied(format!("无法创建采集线程: {}", e)))?
    };

    let ready = ready_rx
      .await
      .unwrap_or_else(|_| Err(CameraError::AccessDenied("采集线程意外退出".into())));

    match ready {
      Ok((width, height)) => {
        info!("V4L2 设备 {} 已打开: {}x{}", self.device_path, width, height);
        Ok(Box::new(V4l2Stream {
          latest,
          running,
          worker: Some(worker),
        }))
      }
      Err(e) => {
        running.store(false, Ordering::Release);
        let _ = worker.join();
        Err(e)
      }
    }
  }
}

type FrameSlot = Arc<Mutex<Option<RgbImage>>>;

fn capture_loop(
  device_path: &str,
  request: &CameraRequest,
  latest: FrameSlot,
  running: Arc<AtomicBool>,
  ready: oneshot::Sender<Result<(u32, u32), CameraError>>,
) {
  let denied = |what: &str, e: std::io::Error| {
    CameraError::AccessDenied(format!("{} {}: {}", what, device_path, e))
  };

  let device = match Device::with_path(device_path) {
    Ok(device) => device,
    Err(e) => {
      let _ = ready.send(Err(denied("无法打开设备", e)));
      return;
    }
  };

  // 设置视频格式
  let format = device.format().and_then(|mut format| {
    format.width = request.ideal_width;
    format.height = request.ideal_height;
    format.fourcc = FourCC::new(b"YUYV");
    device.set_format(&format)
  });
  let format = match format {
    Ok(format) if format.fourcc == FourCC::new(b"YUYV") => format,
    Ok(format) => {
      let _ = ready.send(Err(CameraError::AccessDenied(format!(
        "设备 {} 不支持 YUYV，协商结果为 {}",
        device_path, format.fourcc
      ))));
      return;
    }
    Err(e) => {
      let _ = ready.send(Err(denied("无法设置视频格式", e)));
      return;
    }
  };
  let (width, height) = (format.width, format.height);

  let mut stream = match Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT) {
    Ok(stream) => stream,
    Err(e) => {
      let _ = ready.send(Err(denied("无法创建捕获流", e)));
      return;
    }
  };

  stream.set_timeout(POLL_TIMEOUT);

  if ready.send(Ok((width, height))).is_err() {
    return;
  }

  while running.load(Ordering::Acquire) {
    match stream.next() {
      Ok((buffer, _meta)) => {
        let rgb = yuyv_to_rgb(buffer, width, height);
        match RgbImage::from_raw(width, height, rgb) {
          Some(image) => {
            *latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(image);
          }
          None => warn!("采集缓冲区大小与 {}x{} 不匹配", width, height),
        }
      }
      Err(e) if e.kind() == ErrorKind::TimedOut => continue,
      Err(e) => {
        error!("无法捕获帧: {}", e);
        break;
      }
    }
  }

  debug!("释放 V4L2 设备 {}", device_path);
}

/// 将 YUYV 格式转换为 RGB
fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
  let mut rgb = Vec::with_capacity((width * height * 3) as usize);

  for chunk in yuyv.chunks_exact(4) {
    let y0 = chunk[0] as f32;
    let u = chunk[1] as f32 - 128.0;
    let y1 = chunk[2] as f32;
    let v = chunk[3] as f32 - 128.0;

    for y in [y0, y1] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  rgb
}

struct V4l2Stream {
  latest: FrameSlot,
  running: Arc<AtomicBool>,
  worker: Option<JoinHandle<()>>,
}

impl VideoStream for V4l2Stream {
  fn intrinsic_size(&self) -> (u32, u32) {
    self
      .latest
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .as_ref()
      .map(|frame| frame.dimensions())
      .unwrap_or((0, 0))
  }

  fn current_frame(&self) -> Option<RgbImage> {
    self
      .latest
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// 通知采集线程退出后立即返回，不等待线程结束
  ///
  /// 线程最迟在下一帧或取帧超时后看到停止标志并释放设备。
  fn stop(&mut self) {
    self.running.store(false, Ordering::Release);
    if let Some(worker) = self.worker.take() {
      if worker.is_finished() && worker.join().is_err() {
        warn!("V4L2 采集线程异常退出");
      }
    }
    self
      .latest
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
  }
}

impl Drop for V4l2Stream {
  fn drop(&mut self) {
    self.stop();
  }
}

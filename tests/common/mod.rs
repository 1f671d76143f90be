// 该文件是 Jianzhi （鉴质） 项目的一部分。
// tests/common/mod.rs - 会话测试夹具
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

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use tokio::sync::{Notify, mpsc, watch};

use jianzhi::analysis::{AnalysisClient, AnalysisError, AnalysisReport, Analyzer};
use jianzhi::capture::{CameraBackend, CameraError, VideoStream};
use jianzhi::config::{CameraRequest, SessionConfig};
use jianzhi::inspection::EncodedImage;
use jianzhi::session::{SessionController, SessionHandle, SessionNotice, SessionState};
use jianzhi::stats::{SharedStore, shared_store};

pub const PASS_REPORT: &str =
  r#"{"productType": "Gear", "status": "PASS", "confidence": 0.93, "defects": []}"#;

pub const SCRATCH_REPORT: &str = r#"{
  "productType": "Bottle Cap",
  "status": "FAIL",
  "confidence": 0.81,
  "defects": [{
    "type": "Hairline Scratch",
    "description": "Thin scratch near the rim",
    "severity": "medium",
    "boundingBox": [100, 200, 300, 400]
  }]
}"#;

struct FakeStream {
  frame: RgbImage,
  stops: Arc<AtomicUsize>,
}

impl VideoStream for FakeStream {
  fn intrinsic_size(&self) -> (u32, u32) {
    self.frame.dimensions()
  }

  fn current_frame(&self) -> Option<RgbImage> {
    Some(self.frame.clone())
  }

  fn stop(&mut self) {
    self.stops.fetch_add(1, Ordering::SeqCst);
  }
}

/// 假摄像头，记录设备释放次数
pub struct FakeCamera {
  deny: bool,
  pub stops: Arc<AtomicUsize>,
}

impl FakeCamera {
  pub fn new() -> Self {
    Self {
      deny: false,
      stops: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub fn denying() -> Self {
    Self {
      deny: true,
      ..Self::new()
    }
  }
}

#[async_trait]
impl CameraBackend for FakeCamera {
  async fn open(&self, _request: &CameraRequest) -> Result<Box<dyn VideoStream>, CameraError> {
    if self.deny {
      return Err(CameraError::AccessDenied("Permission denied".into()));
    }
    Ok(Box::new(FakeStream {
      frame: RgbImage::from_pixel(64, 48, Rgb([120, 130, 140])),
      stops: self.stops.clone(),
    }))
  }
}

/// 受控分析器：每次调用都等待测试放行
pub struct GatedAnalyzer {
  response: &'static str,
  pub started: Notify,
  pub gate: Notify,
  calls: AtomicUsize,
  running: AtomicUsize,
  max_running: AtomicUsize,
}

impl GatedAnalyzer {
  pub fn new(response: &'static str) -> Arc<Self> {
    Arc::new(Self {
      response,
      started: Notify::new(),
      gate: Notify::new(),
      calls: AtomicUsize::new(0),
      running: AtomicUsize::new(0),
      max_running: AtomicUsize::new(0),
    })
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn max_running(&self) -> usize {
    self.max_running.load(Ordering::SeqCst)
  }

  pub fn release(&self) {
    self.gate.notify_one();
  }
}

#[async_trait]
impl Analyzer for GatedAnalyzer {
  async fn analyze(&self, _image: &EncodedImage) -> Result<AnalysisReport, AnalysisError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_running.fetch_max(running, Ordering::SeqCst);
    self.started.notify_one();

    self.gate.notified().await;

    self.running.fetch_sub(1, Ordering::SeqCst);
    Ok(AnalysisReport::parse(self.response)?)
  }
}

pub struct Harness {
  pub handle: SessionHandle,
  pub notices: mpsc::UnboundedReceiver<SessionNotice>,
  pub analyzer: Arc<GatedAnalyzer>,
  pub store: SharedStore,
  pub camera_stops: Arc<AtomicUsize>,
}

pub fn spawn_session(camera: FakeCamera, response: &'static str) -> Harness {
  let analyzer = GatedAnalyzer::new(response);
  let store = shared_store(50);
  let camera_stops = camera.stops.clone();
  let client = Arc::new(AnalysisClient::new(analyzer.clone()));

  let (controller, handle, notices) =
    SessionController::new(SessionConfig::default(), camera, client, store.clone());
  tokio::spawn(controller.run());

  Harness {
    handle,
    notices,
    analyzer,
    store,
    camera_stops,
  }
}

/// 等待会话状态满足条件；虚拟时间下超时会立即推进
pub async fn wait_for_state(
  rx: &mut watch::Receiver<SessionState>,
  predicate: impl FnMut(&SessionState) -> bool,
) -> SessionState {
  tokio::time::timeout(Duration::from_secs(60), rx.wait_for(predicate))
    .await
    .expect("session state never reached")
    .expect("session ended")
    .clone()
}

pub async fn next_notice(notices: &mut mpsc::UnboundedReceiver<SessionNotice>) -> SessionNotice {
  tokio::time::timeout(Duration::from_secs(60), notices.recv())
    .await
    .expect("no notice arrived")
    .expect("notice channel closed")
}

pub fn total_inspected(store: &SharedStore) -> u64 {
  store.lock().unwrap().snapshot().total_inspected
}

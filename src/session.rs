// 该文件是 Jianzhi （鉴质） 项目的一部分。
// src/session.rs - 检验会话控制器
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # 检验会话
//!
//! 会话控制器是一个独立的任务，按顺序处理操作员命令与内部事件：
//!
//! ```text
//! Idle --start--> Live --capture / 自动扫描--> Analyzing --分析结束--> Live
//!   ^                                                   |
//!   +------------------------- stop --------------------+
//! ```
//!
//! 同一时刻最多只有一次分析在进行，自动扫描定时器最多只有一个。

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::analysis::AnalysisClient;
use crate::capture::{CameraBackend, CaptureError, CaptureSource, load_from_file};
use crate::config::SessionConfig;
use crate::inspection::{EncodedImage, InspectionResult};
use crate::stats::{Dashboard, SharedStore, lock_store};

const COMMAND_BUFFER: usize = 32;

/// 会话阶段，由 [`SessionState`] 推导
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
  Idle,
  Live,
  Analyzing,
}

impl fmt::Display for SessionPhase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      SessionPhase::Idle => "Idle",
      SessionPhase::Live => "Live",
      SessionPhase::Analyzing => "Analyzing",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
  pub camera_active: bool,
  pub auto_scan_enabled: bool,
  pub analysis_in_flight: bool,
  pub last_result: Option<Arc<InspectionResult>>,
}

impl SessionState {
  pub fn phase(&self) -> SessionPhase {
    match (self.camera_active, self.analysis_in_flight) {
      (false, _) => SessionPhase::Idle,
      (true, false) => SessionPhase::Live,
      (true, true) => SessionPhase::Analyzing,
    }
  }

  /// 实时画面左上角的状态文字
  pub fn status_line(&self) -> String {
    if !self.camera_active {
      return "Camera Offline".to_string();
    }
    let mode = if self.auto_scan_enabled {
      "Continuous Monitoring"
    } else {
      "Live System"
    };
    if self.analysis_in_flight {
      format!("{} · Analyzing", mode)
    } else {
      mode.to_string()
    }
  }
}

/// 操作员命令
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
  StartCamera,
  StopCamera,
  Capture,
  SetAutoScan(bool),
  ToggleAutoScan,
  InspectFile(PathBuf),
  Shutdown,
}

/// 需要通知操作员的会话事件
#[derive(Debug, Clone)]
pub enum SessionNotice {
  CameraDenied(String),
  ResultSettled(Arc<InspectionResult>),
}

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("检验会话已结束")]
  Closed,
}

enum Event {
  AutoScanFired(u64),
  /// 文件解码失败时为 `None`
  AnalysisSettled(Option<Arc<InspectionResult>>),
}

struct Request {
  command: SessionCommand,
  reply: oneshot::Sender<SessionState>,
}

/// 待触发的自动扫描，丢弃即取消
struct AutoScanTimer {
  generation: u64,
  task: JoinHandle<()>,
}

impl Drop for AutoScanTimer {
  fn drop(&mut self) {
    self.task.abort();
  }
}

pub struct SessionController<B> {
  config: SessionConfig,
  capture: CaptureSource<B>,
  client: Arc<AnalysisClient>,
  store: SharedStore,
  state: watch::Sender<SessionState>,
  requests: mpsc::Receiver<Request>,
  events_tx: mpsc::UnboundedSender<Event>,
  events_rx: mpsc::UnboundedReceiver<Event>,
  notices: mpsc::UnboundedSender<SessionNotice>,
  auto_scan: Option<AutoScanTimer>,
  generation: u64,
}

impl<B: CameraBackend> SessionController<B> {
  pub fn new(
    config: SessionConfig,
    backend: B,
    client: Arc<AnalysisClient>,
    store: SharedStore,
  ) -> (Self, SessionHandle, mpsc::UnboundedReceiver<SessionNotice>) {
    let capture = CaptureSource::new(backend, config.jpeg_quality);
    let (requests_tx, requests) = mpsc::channel(COMMAND_BUFFER);
    let (state, state_rx) = watch::channel(SessionState::default());
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (notices, notices_rx) = mpsc::unbounded_channel();

    let handle = SessionHandle {
      requests: requests_tx,
      state: state_rx,
      video_size: capture.video_size(),
      store: store.clone(),
    };

    let controller = Self {
      config,
      capture,
      client,
      store,
      state,
      requests,
      events_tx,
      events_rx,
      notices,
      auto_scan: None,
      generation: 0,
    };

    (controller, handle, notices_rx)
  }

  /// 运行会话，直到收到 `Shutdown` 或所有句柄被丢弃
  pub async fn run(mut self) {
    info!("检验会话启动");

    loop {
      tokio::select! {
        request = self.requests.recv() => match request {
          Some(Request { command: SessionCommand::Shutdown, reply }) => {
            self.teardown();
            let _ = reply.send(self.snapshot());
            return;
          }
          Some(Request { command, reply }) => {
            self.handle_command(command).await;
            self.sync_auto_scan_timer();
            let _ = reply.send(self.snapshot());
          }
          None => break,
        },
        Some(event) = self.events_rx.recv() => {
          self.handle_event(event);
          self.sync_auto_scan_timer();
        }
      }
    }

    self.teardown();
  }

  fn snapshot(&self) -> SessionState {
    self.state.borrow().clone()
  }

  async fn handle_command(&mut self, command: SessionCommand) {
    debug!("处理命令 {:?}", command);
    match command {
      SessionCommand::StartCamera => self.start_camera().await,
      SessionCommand::StopCamera => self.stop_camera(),
      SessionCommand::Capture => self.capture_and_inspect("手动"),
      SessionCommand::SetAutoScan(enabled) => self.set_auto_scan(enabled),
      SessionCommand::ToggleAutoScan => {
        let enabled = !self.state.borrow().auto_scan_enabled;
        self.set_auto_scan(enabled);
      }
      SessionCommand::InspectFile(path) => self.inspect_file(path),
      SessionCommand::Shutdown => {}
    }
  }

  async fn start_camera(&mut self) {
    if self.capture.is_active() {
      debug!("摄像头已打开，忽略启动命令");
      return;
    }

    match self.capture.start_camera(&self.config.camera).await {
      Ok(()) => {
        self.state.send_modify(|s| s.camera_active = true);
        info!("会话进入 {}", self.snapshot().phase());
      }
      Err(e) => {
        error!("无法打开摄像头: {}", e);
        let _ = self.notices.send(SessionNotice::CameraDenied(e.to_string()));
      }
    }
  }

  fn stop_camera(&mut self) {
    if !self.capture.is_active() {
      debug!("摄像头未打开，忽略停止命令");
      return;
    }

    self.auto_scan = None;
    self.capture.stop_camera();
    self.state.send_modify(|s| {
      s.camera_active = false;
      s.auto_scan_enabled = false;
    });
    info!("会话进入 Idle");
  }

  fn set_auto_scan(&mut self, enabled: bool) {
    if !self.state.borrow().camera_active {
      debug!("摄像头未打开，忽略自动扫描切换");
      return;
    }

    self.state.send_if_modified(|s| {
      let changed = s.auto_scan_enabled != enabled;
      s.auto_scan_enabled = enabled;
      changed
    });
    if !enabled {
      self.auto_scan = None;
    }
    info!("自动扫描已{}", if enabled { "开启" } else { "关闭" });
  }

  fn capture_and_inspect(&mut self, trigger: &str) {
    if self.state.borrow().analysis_in_flight {
      debug!("分析进行中，忽略{}采集", trigger);
      return;
    }

    match self.capture.capture_frame() {
      Ok(image) => {
        info!(
          "{}采集 {}x{} 图像，开始分析",
          trigger,
          image.width(),
          image.height()
        );
        self.dispatch(image);
      }
      Err(CaptureError::NoFrame) => debug!("视频流尚无画面，跳过{}采集", trigger),
      Err(e) => warn!("{}采集失败: {}", trigger, e),
    }
  }

  fn dispatch(&mut self, image: EncodedImage) {
    self.state.send_modify(|s| s.analysis_in_flight = true);

    let client = self.client.clone();
    let store = self.store.clone();
    let events = self.events_tx.clone();
    tokio::spawn(async move {
      let result = analyze_and_record(&client, &store, image).await;
      // 会话可能已结束，结果仍已计入统计
      let _ = events.send(Event::AnalysisSettled(Some(result)));
    });
  }

  fn inspect_file(&mut self, path: PathBuf) {
    if self.state.borrow().analysis_in_flight {
      debug!("分析进行中，忽略文件 {}", path.display());
      return;
    }
    self.state.send_modify(|s| s.analysis_in_flight = true);

    let quality = self.config.jpeg_quality;
    let client = self.client.clone();
    let store = self.store.clone();
    let events = self.events_tx.clone();
    tokio::spawn(async move {
      let settled = match load_from_file(&path, quality).await {
        Ok(image) => {
          info!("已读取文件 {}，开始分析", path.display());
          Some(analyze_and_record(&client, &store, image).await)
        }
        Err(_) => {
          debug!("文件 {} 无法解码，不进行分析", path.display());
          None
        }
      };
      let _ = events.send(Event::AnalysisSettled(settled));
    });
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::AutoScanFired(generation) => {
        match &self.auto_scan {
          Some(timer) if timer.generation == generation => {}
          _ => {
            debug!("忽略过期的自动扫描 #{}", generation);
            return;
          }
        }
        self.auto_scan = None;
        self.capture_and_inspect("自动");
      }
      Event::AnalysisSettled(result) => {
        self.state.send_modify(|s| {
          s.analysis_in_flight = false;
          if let Some(result) = &result {
            s.last_result = Some(result.clone());
          }
        });
        if let Some(result) = result {
          let _ = self.notices.send(SessionNotice::ResultSettled(result));
        }
        debug!("分析结束，会话进入 {}", self.snapshot().phase());
      }
    }
  }

  /// 保证定时器与状态一致：仅在自动扫描开启、摄像头在线且没有分析时保留一个定时器
  fn sync_auto_scan_timer(&mut self) {
    let wanted = {
      let s = self.state.borrow();
      s.auto_scan_enabled && s.camera_active && !s.analysis_in_flight
    };

    match (wanted, self.auto_scan.is_some()) {
      (true, false) => self.arm_auto_scan(),
      (false, true) => {
        debug!("取消自动扫描定时器");
        self.auto_scan = None;
      }
      _ => {}
    }
  }

  fn arm_auto_scan(&mut self) {
    self.generation += 1;
    let generation = self.generation;
    let delay = self.config.auto_scan_delay;
    let events = self.events_tx.clone();
    debug!("自动扫描 #{} 将在 {:.2?} 后触发", generation, delay);

    let task = tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      let _ = events.send(Event::AutoScanFired(generation));
    });
    self.auto_scan = Some(AutoScanTimer { generation, task });
  }

  fn teardown(&mut self) {
    self.auto_scan = None;
    self.capture.stop_camera();
    self.state.send_modify(|s| {
      s.camera_active = false;
      s.auto_scan_enabled = false;
    });
    info!("检验会话结束");
  }
}

async fn analyze_and_record(
  client: &AnalysisClient,
  store: &SharedStore,
  image: EncodedImage,
) -> Arc<InspectionResult> {
  let result = Arc::new(client.analyze(image).await);
  lock_store(store).record(result.clone());
  result
}

/// 会话句柄，可克隆，供控制台与测试驱动会话
#[derive(Clone)]
pub struct SessionHandle {
  requests: mpsc::Sender<Request>,
  state: watch::Receiver<SessionState>,
  video_size: watch::Receiver<(u32, u32)>,
  store: SharedStore,
}

impl SessionHandle {
  /// 发送命令，返回命令处理完毕后的会话状态
  pub async fn send(&self, command: SessionCommand) -> Result<SessionState, SessionError> {
    let (reply, response) = oneshot::channel();
    self
      .requests
      .send(Request { command, reply })
      .await
      .map_err(|_| SessionError::Closed)?;
    response.await.map_err(|_| SessionError::Closed)
  }

  pub async fn start_camera(&self) -> Result<SessionState, SessionError> {
    self.send(SessionCommand::StartCamera).await
  }

  pub async fn stop_camera(&self) -> Result<SessionState, SessionError> {
    self.send(SessionCommand::StopCamera).await
  }

  pub async fn capture(&self) -> Result<SessionState, SessionError> {
    self.send(SessionCommand::Capture).await
  }

  pub async fn set_auto_scan(&self, enabled: bool) -> Result<SessionState, SessionError> {
    self.send(SessionCommand::SetAutoScan(enabled)).await
  }

  pub async fn toggle_auto_scan(&self) -> Result<SessionState, SessionError> {
    self.send(SessionCommand::ToggleAutoScan).await
  }

  pub async fn inspect_file(&self, path: impl Into<PathBuf>) -> Result<SessionState, SessionError> {
    self.send(SessionCommand::InspectFile(path.into())).await
  }

  pub async fn shutdown(&self) -> Result<SessionState, SessionError> {
    self.send(SessionCommand::Shutdown).await
  }

  pub fn state(&self) -> SessionState {
    self.state.borrow().clone()
  }

  pub fn subscribe(&self) -> watch::Receiver<SessionState> {
    self.state.clone()
  }

  pub fn video_size(&self) -> watch::Receiver<(u32, u32)> {
    self.video_size.clone()
  }

  pub fn dashboard(&self) -> Dashboard {
    Dashboard::new(self.store.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn phase_follows_flags() {
    let mut state = SessionState::default();
    assert_eq!(state.phase(), SessionPhase::Idle);
    state.camera_active = true;
    assert_eq!(state.phase(), SessionPhase::Live);
    state.analysis_in_flight = true;
    assert_eq!(state.phase(), SessionPhase::Analyzing);
    state.camera_active = false;
    assert_eq!(state.phase(), SessionPhase::Idle);
  }

  #[test]
  fn status_line_reflects_mode() {
    let mut state = SessionState {
      camera_active: true,
      ..Default::default()
    };
    assert_eq!(state.status_line(), "Live System");
    state.auto_scan_enabled = true;
    assert_eq!(state.status_line(), "Continuous Monitoring");
    state.analysis_in_flight = true;
    assert_eq!(state.status_line(), "Continuous Monitoring · Analyzing");
  }
}

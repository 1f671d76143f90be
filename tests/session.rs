// 该文件是 Jianzhi （鉴质） 项目的一部分。
// tests/session.rs - 检验会话状态机测试
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

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use image::{Rgb, RgbImage};
use jianzhi::analysis::FALLBACK_PRODUCT_LABEL;
use jianzhi::config::ANALYSIS_TIMEOUT;
use jianzhi::inspection::InspectionStatus;
use jianzhi::session::{SessionError, SessionNotice, SessionPhase};

use common::*;

#[tokio::test(start_paused = true)]
async fn manual_capture_while_analyzing_is_ignored() {
  let mut h = spawn_session(FakeCamera::new(), PASS_REPORT);
  let mut state = h.handle.subscribe();

  assert_eq!(h.handle.start_camera().await.unwrap().phase(), SessionPhase::Live);
  assert_eq!(h.handle.capture().await.unwrap().phase(), SessionPhase::Analyzing);
  h.analyzer.started.notified().await;

  // 第二次采集是静默的空操作
  let again = h.handle.capture().await.unwrap();
  assert_eq!(again.phase(), SessionPhase::Analyzing);

  h.analyzer.release();
  let settled = wait_for_state(&mut state, |s| !s.analysis_in_flight).await;
  assert_eq!(settled.phase(), SessionPhase::Live);
  assert_eq!(
    settled.last_result.as_ref().map(|r| r.status),
    Some(InspectionStatus::Pass)
  );
  assert_eq!(h.analyzer.calls(), 1);
  assert_eq!(total_inspected(&h.store), 1);
  assert!(matches!(
    next_notice(&mut h.notices).await,
    SessionNotice::ResultSettled(_)
  ));

  h.handle.capture().await.unwrap();
  h.analyzer.started.notified().await;
  h.analyzer.release();
  wait_for_state(&mut state, |s| !s.analysis_in_flight).await;
  assert_eq!(h.analyzer.calls(), 2);
  assert_eq!(h.analyzer.max_running(), 1);
}

#[tokio::test(start_paused = true)]
async fn auto_scan_rearms_only_after_settle() {
  let h = spawn_session(FakeCamera::new(), SCRATCH_REPORT);
  let mut state = h.handle.subscribe();

  h.handle.start_camera().await.unwrap();
  let enabled = h.handle.set_auto_scan(true).await.unwrap();
  assert!(enabled.auto_scan_enabled);

  tokio::time::sleep(Duration::from_millis(3900)).await;
  assert_eq!(h.analyzer.calls(), 0);

  tokio::time::sleep(Duration::from_millis(200)).await;
  h.analyzer.started.notified().await;
  assert_eq!(h.analyzer.calls(), 1);

  // 分析未结束时不会有新的定时器
  tokio::time::sleep(Duration::from_secs(20)).await;
  assert_eq!(h.analyzer.calls(), 1);

  h.analyzer.release();
  wait_for_state(&mut state, |s| !s.analysis_in_flight).await;

  tokio::time::sleep(Duration::from_millis(3900)).await;
  assert_eq!(h.analyzer.calls(), 1);
  tokio::time::sleep(Duration::from_millis(200)).await;
  h.analyzer.started.notified().await;
  assert_eq!(h.analyzer.calls(), 2);
  assert_eq!(h.analyzer.max_running(), 1);

  let stats = h.handle.dashboard().snapshot();
  assert_eq!(stats.failed, 1);
  assert_eq!(stats.bucket("Scratches"), Some(1));
}

#[tokio::test(start_paused = true)]
async fn disabling_auto_scan_cancels_pending_capture() {
  let h = spawn_session(FakeCamera::new(), PASS_REPORT);

  h.handle.start_camera().await.unwrap();
  h.handle.set_auto_scan(true).await.unwrap();
  tokio::time::sleep(Duration::from_millis(3999)).await;

  let disabled = h.handle.toggle_auto_scan().await.unwrap();
  assert!(!disabled.auto_scan_enabled);

  tokio::time::sleep(Duration::from_secs(30)).await;
  assert_eq!(h.analyzer.calls(), 0);
  assert_eq!(h.handle.state().phase(), SessionPhase::Live);
}

#[tokio::test(start_paused = true)]
async fn stop_while_analyzing_goes_idle_and_still_records() {
  let mut h = spawn_session(FakeCamera::new(), SCRATCH_REPORT);
  let mut state = h.handle.subscribe();

  h.handle.start_camera().await.unwrap();
  h.handle.set_auto_scan(true).await.unwrap();
  h.handle.capture().await.unwrap();
  h.analyzer.started.notified().await;

  let stopped = h.handle.stop_camera().await.unwrap();
  assert_eq!(stopped.phase(), SessionPhase::Idle);
  assert!(!stopped.auto_scan_enabled);
  assert_eq!(h.camera_stops.load(Ordering::SeqCst), 1);

  h.analyzer.release();
  match next_notice(&mut h.notices).await {
    SessionNotice::ResultSettled(result) => assert_eq!(result.status, InspectionStatus::Fail),
    other => panic!("unexpected notice {:?}", other),
  }
  let settled = wait_for_state(&mut state, |s| !s.analysis_in_flight).await;
  assert_eq!(settled.phase(), SessionPhase::Idle);
  assert_eq!(total_inspected(&h.store), 1);
  assert_eq!(h.handle.dashboard().history().len(), 1);

  // 摄像头关闭后自动扫描不再触发
  tokio::time::sleep(Duration::from_secs(30)).await;
  assert_eq!(h.analyzer.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_analysis_settles_as_fallback_and_frees_capture() {
  let mut h = spawn_session(FakeCamera::new(), PASS_REPORT);
  let mut state = h.handle.subscribe();

  h.handle.start_camera().await.unwrap();
  h.handle.capture().await.unwrap();
  h.analyzer.started.notified().await;

  // 分析器从不放行
  tokio::time::sleep(ANALYSIS_TIMEOUT + Duration::from_secs(1)).await;
  let settled = wait_for_state(&mut state, |s| !s.analysis_in_flight).await;
  assert_eq!(settled.phase(), SessionPhase::Live);
  let result = settled.last_result.expect("fallback recorded");
  assert_eq!(result.status, InspectionStatus::Fail);
  assert_eq!(result.product_label, FALLBACK_PRODUCT_LABEL);
  assert!(matches!(
    next_notice(&mut h.notices).await,
    SessionNotice::ResultSettled(_)
  ));
  assert_eq!(h.handle.dashboard().snapshot().failed, 1);

  assert_eq!(h.handle.capture().await.unwrap().phase(), SessionPhase::Analyzing);
  h.analyzer.started.notified().await;
  assert_eq!(h.analyzer.calls(), 2);
  h.analyzer.release();
  wait_for_state(&mut state, |s| !s.analysis_in_flight).await;
  assert_eq!(total_inspected(&h.store), 2);
}

#[tokio::test(start_paused = true)]
async fn denied_camera_keeps_session_idle() {
  let mut h = spawn_session(FakeCamera::denying(), PASS_REPORT);

  let state = h.handle.start_camera().await.unwrap();
  assert_eq!(state.phase(), SessionPhase::Idle);
  assert!(matches!(
    next_notice(&mut h.notices).await,
    SessionNotice::CameraDenied(_)
  ));

  let state = h.handle.capture().await.unwrap();
  assert!(!state.analysis_in_flight);
  assert_eq!(h.analyzer.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn auto_scan_toggle_is_ignored_while_idle() {
  let h = spawn_session(FakeCamera::new(), PASS_REPORT);

  assert!(!h.handle.toggle_auto_scan().await.unwrap().auto_scan_enabled);
  assert!(!h.handle.set_auto_scan(true).await.unwrap().auto_scan_enabled);

  tokio::time::sleep(Duration::from_secs(30)).await;
  assert_eq!(h.analyzer.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn file_inspection_works_without_camera() {
  let mut h = spawn_session(FakeCamera::new(), SCRATCH_REPORT);
  let mut state = h.handle.subscribe();

  let path = std::env::temp_dir().join(format!("jianzhi-session-{}.png", std::process::id()));
  RgbImage::from_pixel(32, 24, Rgb([10, 200, 30]))
    .save(&path)
    .unwrap();

  let dispatched = h.handle.inspect_file(&path).await.unwrap();
  assert!(dispatched.analysis_in_flight);
  assert_eq!(dispatched.phase(), SessionPhase::Idle);

  h.analyzer.started.notified().await;
  h.analyzer.release();
  let settled = wait_for_state(&mut state, |s| !s.analysis_in_flight).await;
  let result = settled.last_result.expect("result recorded");
  assert_eq!(result.product_label, "Bottle Cap");
  assert_eq!(result.image_ref.image().width(), 32);
  assert!(matches!(
    next_notice(&mut h.notices).await,
    SessionNotice::ResultSettled(_)
  ));
  assert_eq!(total_inspected(&h.store), 1);

  std::fs::remove_file(&path).ok();
}

#[tokio::test(start_paused = true)]
async fn unreadable_file_is_silently_dropped() {
  let h = spawn_session(FakeCamera::new(), PASS_REPORT);
  let mut state = h.handle.subscribe();

  let path = std::env::temp_dir().join(format!("jianzhi-garbage-{}.png", std::process::id()));
  std::fs::write(&path, b"definitely not an image").unwrap();

  h.handle.inspect_file(&path).await.unwrap();
  // 解码在阻塞线程上进行，这里不设虚拟时间超时
  let settled = state
    .wait_for(|s| !s.analysis_in_flight)
    .await
    .unwrap()
    .clone();
  assert!(settled.last_result.is_none());
  assert_eq!(h.analyzer.calls(), 0);
  assert_eq!(total_inspected(&h.store), 0);

  std::fs::remove_file(&path).ok();
}

#[tokio::test(start_paused = true)]
async fn shutdown_releases_camera_and_late_result_is_recorded() {
  let h = spawn_session(FakeCamera::new(), PASS_REPORT);

  h.handle.start_camera().await.unwrap();
  h.handle.capture().await.unwrap();
  h.analyzer.started.notified().await;

  let last = h.handle.shutdown().await.unwrap();
  assert_eq!(last.phase(), SessionPhase::Idle);
  assert_eq!(h.camera_stops.load(Ordering::SeqCst), 1);
  assert!(matches!(
    h.handle.capture().await,
    Err(SessionError::Closed)
  ));

  h.analyzer.release();
  for _ in 0..100 {
    if total_inspected(&h.store) == 1 {
      break;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  assert_eq!(total_inspected(&h.store), 1);
}

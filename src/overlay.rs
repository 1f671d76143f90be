// 该文件是 Jianzhi （鉴质） 项目的一部分。
// src/overlay.rs - 缺陷叠加层渲染
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use image::Rgba;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::inspection::{BoundingBox, Defect, InspectionResult, NORMALIZED_SCALE, Severity};
use crate::session::SessionState;

mod surface;
pub use self::surface::{ImageSurface, ImageSurfaceError, load_font};

pub const HIGH_COLOR: Rgba<u8> = Rgba([0xef, 0x44, 0x44, 0xff]); // 红色
pub const MEDIUM_COLOR: Rgba<u8> = Rgba([0xf5, 0x9e, 0x0b, 0xff]); // 琥珀色
pub const LOW_COLOR: Rgba<u8> = Rgba([0x3b, 0x82, 0xf6, 0xff]); // 蓝色
pub const LABEL_TEXT_COLOR: Rgba<u8> = Rgba([0xff, 0xff, 0xff, 0xff]);

pub fn severity_color(severity: Severity) -> Rgba<u8> {
  match severity {
    Severity::High => HIGH_COLOR,
    Severity::Medium => MEDIUM_COLOR,
    Severity::Low => LOW_COLOR,
  }
}

/// 绘制面上的像素矩形
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
  pub x: f32,
  pub y: f32,
  pub w: f32,
  pub h: f32,
}

/// 将 0-1000 归一化边界框映射到绘制面像素坐标
pub fn map_bounding_box(bbox: &BoundingBox, width: u32, height: u32) -> PixelRect {
  let (w, h) = (width as f32, height as f32);
  PixelRect {
    x: bbox.x_min / NORMALIZED_SCALE * w,
    y: bbox.y_min / NORMALIZED_SCALE * h,
    w: (bbox.x_max - bbox.x_min) / NORMALIZED_SCALE * w,
    h: (bbox.y_max - bbox.y_min) / NORMALIZED_SCALE * h,
  }
}

/// 线条样式
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stroke {
  pub color: Rgba<u8>,
  pub width: f32,
  /// 虚线 (实线长度, 间隔长度)，`None` 为实线
  pub dash: Option<(f32, f32)>,
}

/// 二维绘制面，语义对应浏览器 canvas 的一个子集
pub trait Surface {
  fn size(&self) -> (u32, u32);

  /// 调整尺寸，内容随之清空
  fn resize(&mut self, width: u32, height: u32);

  fn clear(&mut self);

  fn stroke_rect(&mut self, rect: PixelRect, stroke: &Stroke);

  fn stroke_polyline(&mut self, points: &[(f32, f32)], stroke: &Stroke);

  fn fill_rect(&mut self, rect: PixelRect, color: Rgba<u8>);

  fn measure_text(&self, text: &str, px: f32) -> f32;

  /// 以基线坐标 `(x, baseline)` 绘制文本
  fn fill_text(&mut self, text: &str, x: f32, baseline: f32, px: f32, color: Rgba<u8>);
}

/// 叠加层样式参数
#[derive(Debug, Clone)]
pub struct OverlayStyle {
  pub line_width: f32,
  pub dash: (f32, f32),
  pub corner_size: f32,
  pub corner_width: f32,
  pub font_px: f32,
  pub tag_height: f32,
  pub tag_padding: f32,
  pub baseline_offset: f32,
}

impl Default for OverlayStyle {
  fn default() -> Self {
    Self {
      line_width: 3.0,
      dash: (5.0, 5.0),
      corner_size: 10.0,
      corner_width: 4.0,
      font_px: 12.0,
      tag_height: 22.0,
      tag_padding: 5.0,
      baseline_offset: 7.0,
    }
  }
}

/// 缺陷叠加层渲染器
///
/// 每次 `paint` 都是完整的一帧：按需调整尺寸、清空、再绘制所有带定位的缺陷。
#[derive(Debug, Clone, Default)]
pub struct OverlayRenderer {
  style: OverlayStyle,
}

impl OverlayRenderer {
  pub fn new(style: OverlayStyle) -> Self {
    Self { style }
  }

  pub fn paint<S: Surface + ?Sized>(
    &self,
    surface: &mut S,
    display: (u32, u32),
    result: Option<&InspectionResult>,
  ) {
    let (display_w, display_h) = display;
    if display_w > 0 && display_h > 0 && surface.size() != display {
      debug!("叠加层尺寸调整为 {}x{}", display_w, display_h);
      surface.resize(display_w, display_h);
    }

    surface.clear();

    let Some(result) = result else {
      return;
    };
    let (width, height) = surface.size();
    for (defect, bbox) in result.located_defects() {
      let rect = map_bounding_box(bbox, width, height);
      self.draw_defect(surface, defect, rect);
    }
  }

  fn draw_defect<S: Surface + ?Sized>(&self, surface: &mut S, defect: &Defect, rect: PixelRect) {
    let style = &self.style;
    let color = severity_color(defect.severity);

    surface.stroke_rect(
      rect,
      &Stroke {
        color,
        width: style.line_width,
        dash: Some(style.dash),
      },
    );

    let corner = Stroke {
      color,
      width: style.corner_width,
      dash: None,
    };
    let c = style.corner_size;
    let PixelRect { x, y, w, h } = rect;
    surface.stroke_polyline(&[(x, y + c), (x, y), (x + c, y)], &corner);
    surface.stroke_polyline(&[(x + w - c, y), (x + w, y), (x + w, y + c)], &corner);
    surface.stroke_polyline(
      &[(x + w, y + h - c), (x + w, y + h), (x + w - c, y + h)],
      &corner,
    );
    surface.stroke_polyline(&[(x + c, y + h), (x, y + h), (x, y + h - c)], &corner);

    // 标签位于边框上方
    let label = defect.kind.to_uppercase();
    let text_width = surface.measure_text(&label, style.font_px);
    surface.fill_rect(
      PixelRect {
        x,
        y: y - style.tag_height,
        w: text_width + 2.0 * style.tag_padding,
        h: style.tag_height,
      },
      color,
    );
    surface.fill_text(
      &label,
      x + style.tag_padding,
      y - style.baseline_offset,
      style.font_px,
      LABEL_TEXT_COLOR,
    );
  }
}

/// 持续重绘循环，与分析节奏无关
///
/// 只读取会话状态中的最新结果与显示尺寸，不会控制摄像头设备。
/// 尚无结果时每一帧只做清空。
pub struct RepaintLoop<S> {
  renderer: OverlayRenderer,
  surface: Arc<Mutex<S>>,
  interval: Duration,
}

impl<S: Surface + Send + 'static> RepaintLoop<S> {
  pub fn new(renderer: OverlayRenderer, surface: Arc<Mutex<S>>, interval: Duration) -> Self {
    Self {
      renderer,
      surface,
      interval,
    }
  }

  pub async fn run(
    self,
    state: watch::Receiver<SessionState>,
    display: watch::Receiver<(u32, u32)>,
    shutdown: CancellationToken,
  ) {
    let mut ticker = tokio::time::interval(self.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("叠加层重绘循环启动，间隔 {:.2?}", self.interval);

    loop {
      tokio::select! {
        _ = shutdown.cancelled() => break,
        _ = ticker.tick() => {
          // 摄像头关闭时没有实时画面可供叠加
          let result = {
            let state = state.borrow();
            state.camera_active.then(|| state.last_result.clone()).flatten()
          };
          let size = *display.borrow();
          let mut surface = self.surface.lock().unwrap_or_else(PoisonError::into_inner);
          self.renderer.paint(&mut *surface, size, result.as_deref());
        }
      }
    }

    info!("叠加层重绘循环退出");
  }
}

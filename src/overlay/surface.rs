// 该文件是 Jianzhi （鉴质） 项目的一部分。
// src/overlay/surface.rs - 基于 imageproc 的离屏绘制面
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::info;

use super::{PixelRect, Stroke, Surface};

// 无字体时的字符宽度估计（相对字号）
const FALLBACK_CHAR_WIDTH: f32 = 0.6;
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

#[derive(Error, Debug)]
pub enum ImageSurfaceError {
  #[error("无法读取字体文件: {0}")]
  Io(#[from] std::io::Error),
  #[error("无效的字体文件")]
  InvalidFont,
}

pub fn load_font(path: impl AsRef<Path>) -> Result<FontArc, ImageSurfaceError> {
  let data = std::fs::read(path.as_ref())?;
  let font = FontArc::try_from_vec(data).map_err(|_| ImageSurfaceError::InvalidFont)?;
  info!("已加载字体 {}", path.as_ref().display());
  Ok(font)
}

/// 透明背景的 RGBA 绘制面
///
/// 未提供字体时仍绘制边框与标签底色，只是不写文字。
pub struct ImageSurface {
  canvas: RgbaImage,
  font: Option<FontArc>,
}

impl ImageSurface {
  pub fn new(width: u32, height: u32, font: Option<FontArc>) -> Self {
    Self {
      canvas: RgbaImage::from_pixel(width, height, TRANSPARENT),
      font,
    }
  }

  pub fn canvas(&self) -> &RgbaImage {
    &self.canvas
  }

  pub fn is_blank(&self) -> bool {
    self.canvas.pixels().all(|p| p[3] == 0)
  }

  /// 将叠加层按透明度混合到底图上，尺寸不一致时先缩放叠加层
  pub fn composite_onto(&self, base: &RgbImage) -> RgbImage {
    let (width, height) = base.dimensions();
    let scaled;
    let overlay = if self.canvas.dimensions() == (width, height) {
      &self.canvas
    } else {
      scaled = imageops::resize(&self.canvas, width, height, FilterType::Triangle);
      &scaled
    };

    let mut output = base.clone();
    for (dst, src) in output.pixels_mut().zip(overlay.pixels()) {
      let alpha = src[3] as f32 / 255.0;
      if alpha <= 0.0 {
        continue;
      }
      let blend = |d: u8, s: u8| (s as f32 * alpha + d as f32 * (1.0 - alpha)).round() as u8;
      *dst = Rgb([
        blend(dst[0], src[0]),
        blend(dst[1], src[1]),
        blend(dst[2], src[2]),
      ]);
    }
    output
  }

  fn line(&mut self, from: (f32, f32), to: (f32, f32), stroke: &Stroke) {
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    let length = (dx * dx + dy * dy).sqrt();
    if length <= f32::EPSILON {
      return;
    }
    // 法线方向上平移得到线宽
    let (nx, ny) = (-dy / length, dx / length);
    let width = stroke.width.max(1.0).round() as i32;
    for i in 0..width {
      let offset = i as f32 - (width - 1) as f32 / 2.0;
      draw_line_segment_mut(
        &mut self.canvas,
        (from.0 + nx * offset, from.1 + ny * offset),
        (to.0 + nx * offset, to.1 + ny * offset),
        stroke.color,
      );
    }
  }

  fn dashed_line(&mut self, from: (f32, f32), to: (f32, f32), stroke: &Stroke) {
    let Some((on, off)) = stroke.dash.filter(|(on, off)| *on > 0.0 && *off >= 0.0) else {
      self.line(from, to, stroke);
      return;
    };

    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    let length = (dx * dx + dy * dy).sqrt();
    if length <= f32::EPSILON {
      return;
    }
    let (ux, uy) = (dx / length, dy / length);
    let mut t = 0.0;
    while t < length {
      let end = (t + on).min(length);
      self.line(
        (from.0 + ux * t, from.1 + uy * t),
        (from.0 + ux * end, from.1 + uy * end),
        stroke,
      );
      t = end + off;
    }
  }
}

impl Surface for ImageSurface {
  fn size(&self) -> (u32, u32) {
    self.canvas.dimensions()
  }

  fn resize(&mut self, width: u32, height: u32) {
    self.canvas = RgbaImage::from_pixel(width, height, TRANSPARENT);
  }

  fn clear(&mut self) {
    self.canvas.pixels_mut().for_each(|p| *p = TRANSPARENT);
  }

  fn stroke_rect(&mut self, rect: PixelRect, stroke: &Stroke) {
    let PixelRect { x, y, w, h } = rect;
    let corners = [(x, y), (x + w, y), (x + w, y + h), (x, y + h)];
    for i in 0..corners.len() {
      self.dashed_line(corners[i], corners[(i + 1) % corners.len()], stroke);
    }
  }

  fn stroke_polyline(&mut self, points: &[(f32, f32)], stroke: &Stroke) {
    for pair in points.windows(2) {
      self.dashed_line(pair[0], pair[1], stroke);
    }
  }

  fn fill_rect(&mut self, rect: PixelRect, color: Rgba<u8>) {
    let width = rect.w.round() as i64;
    let height = rect.h.round() as i64;
    if width <= 0 || height <= 0 {
      return;
    }
    let r =
      Rect::at(rect.x.round() as i32, rect.y.round() as i32).of_size(width as u32, height as u32);
    draw_filled_rect_mut(&mut self.canvas, r, color);
  }

  fn measure_text(&self, text: &str, px: f32) -> f32 {
    match &self.font {
      Some(font) => text_size(PxScale::from(px), font, text).0 as f32,
      None => text.chars().count() as f32 * px * FALLBACK_CHAR_WIDTH,
    }
  }

  fn fill_text(&mut self, text: &str, x: f32, baseline: f32, px: f32, color: Rgba<u8>) {
    let Some(font) = &self.font else {
      return;
    };
    let scale = PxScale::from(px);
    // imageproc 以文字顶部定位
    let top = baseline - font.as_scaled(scale).ascent();
    draw_text_mut(
      &mut self.canvas,
      color,
      x.round() as i32,
      top.round() as i32,
      scale,
      font,
      text,
    );
  }
}

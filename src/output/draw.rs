// 该文件是 Lubiao （路标） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;

use crate::model::{ClassNameTable, DetectItem, DetectResult};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const BOX_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色
const TEXT_COLOR: [u8; 3] = [255, 255, 255];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体加载错误")]
  FontLoadError,
}

/// 检测框绘制器；没有字体时只画框不写字
pub struct Draw {
  font: Option<FontVec>,
  font_size: f32,
  color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      color: BOX_COLOR,
    }
  }
}

impl Draw {
  pub fn with_font_file(path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let font = FontVec::try_from_vec(data).map_err(|_| DrawError::FontLoadError)?;
    info!("加载字体: {}", path.display());

    Ok(Self {
      font: Some(font),
      ..Self::default()
    })
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 像素坐标的检测框，退化时返回 None
  fn pixel_rect(image: &RgbImage, bbox: &[f32; 4]) -> Option<(i32, i32, i32, i32)> {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let x_min = ((bbox[0] * w).floor() as i32).clamp(0, w as i32 - 1);
    let y_min = ((bbox[1] * h).floor() as i32).clamp(0, h as i32 - 1);
    let x_max = ((bbox[2] * w).ceil() as i32).clamp(0, w as i32 - 1);
    let y_max = ((bbox[3] * h).ceil() as i32).clamp(0, h as i32 - 1);
    (x_min < x_max && y_min < y_max).then_some((x_min, y_min, x_max, y_max))
  }

  fn draw_item(&self, image: &mut RgbImage, item: &DetectItem, label: &str) {
    let Some((x_min, y_min, x_max, y_max)) = Self::pixel_rect(image, &item.bbox) else {
      return;
    };

    for t in 0..BOX_THICKNESS {
      let width = (x_max - x_min - 2 * t).max(1) as u32;
      let height = (y_max - y_min - 2 * t).max(1) as u32;
      draw_hollow_rect_mut(
        image,
        Rect::at(x_min + t, y_min + t).of_size(width, height),
        Rgb(self.color),
      );
    }

    let Some(font) = &self.font else {
      return;
    };

    let caption = format!("{} {:.2}", label, item.score);
    let scale = PxScale::from(self.font_size);
    let (text_w, text_h) = text_size(scale, font, &caption);
    let text_h = text_h as i32 + 2 * LABEL_TEXT_VERTICAL_PADDING;

    // 标签放在框的上方，放不下时贴着图像顶部
    let label_x = x_min;
    let label_y = (y_min - text_h).max(0);
    let label_w = (text_w as i32).min(image.width() as i32 - label_x);
    if label_w <= 0 {
      return;
    }

    draw_filled_rect_mut(
      image,
      Rect::at(label_x, label_y).of_size(label_w as u32, text_h as u32),
      Rgb(self.color),
    );
    draw_text_mut(
      image,
      Rgb(TEXT_COLOR),
      label_x,
      label_y + LABEL_TEXT_VERTICAL_PADDING,
      scale,
      font,
      &caption,
    );
  }

  pub fn draw_detections(
    &self,
    image: &mut RgbImage,
    result: &DetectResult,
    labels: &ClassNameTable,
  ) {
    for item in result.items.iter() {
      self.draw_item(image, item, labels.resolve(item.class_id));
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn draws_box_outline_without_font() {
    let mut image = RgbImage::new(100, 100);
    let result = DetectResult::from(vec![DetectItem {
      class_id: 0,
      score: 0.9,
      bbox: [0.2, 0.2, 0.6, 0.6],
    }]);
    let draw = Draw::default();
    assert!(!draw.has_font());
    draw.draw_detections(&mut image, &result, &ClassNameTable::new(["stop"]));

    assert_eq!(*image.get_pixel(20, 20), Rgb(BOX_COLOR));
    assert_eq!(*image.get_pixel(21, 40), Rgb(BOX_COLOR));
    // 框内部保持原样
    assert_eq!(*image.get_pixel(40, 40), Rgb([0, 0, 0]));
  }

  #[test]
  fn degenerate_boxes_are_skipped() {
    let mut image = RgbImage::new(10, 10);
    let result = DetectResult::from(vec![DetectItem {
      class_id: 0,
      score: 0.9,
      bbox: [0.5, 0.5, 0.5, 0.5],
    }]);
    Draw::default().draw_detections(&mut image, &result, ClassNameTable::empty());
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }

  #[test]
  fn invalid_font_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("font.ttf");
    std::fs::write(&path, b"nope").unwrap();
    assert!(matches!(
      Draw::with_font_file(&path),
      Err(DrawError::FontLoadError)
    ));
  }
}

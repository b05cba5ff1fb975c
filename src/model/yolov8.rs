// 该文件是 Lubiao （路标） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 检测头后处理
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

//! YOLOv8 导出模型只有一个输出张量，形状为 `[1, 4 + 类别数, 锚点数]`，
//! 部分转换工具会转置为 `[1, 锚点数, 4 + 类别数]`。前 4 个通道是输入坐标系下的
//! `cx, cy, w, h`，其余通道是已经过 sigmoid 的类别得分。

use std::cmp::Ordering;

use tracing::debug;

use crate::{
  frame::Letterbox,
  model::{DetectItem, DetectParams},
};

pub const YOLOV8_INPUT_SIZE: u32 = 640;
pub const YOLOV8_STRIDES: [u32; 3] = [8, 16, 32];
const BOX_CHANNELS: usize = 4;

/// 输入尺寸对应的锚点总数，640 输入时为 8400
pub fn anchors_for(input_size: u32) -> usize {
  YOLOV8_STRIDES
    .iter()
    .map(|stride| {
      let side = (input_size / stride) as usize;
      side * side
    })
    .sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadLayout {
  /// `[channels, anchors]`
  ChannelsFirst { channels: usize, anchors: usize },
  /// `[anchors, channels]`
  AnchorsFirst { anchors: usize, channels: usize },
}

impl HeadLayout {
  /// 根据输出形状判断布局，锚点数总是远大于通道数
  pub fn from_shape(shape: &[usize]) -> Option<Self> {
    let dims: Vec<usize> = shape.iter().copied().filter(|&d| d != 1).collect();
    match dims.as_slice() {
      [a, b] if a <= b && *a > BOX_CHANNELS => Some(HeadLayout::ChannelsFirst {
        channels: *a,
        anchors: *b,
      }),
      [a, b] if a > b && *b > BOX_CHANNELS => Some(HeadLayout::AnchorsFirst {
        anchors: *a,
        channels: *b,
      }),
      _ => None,
    }
  }

  /// 已知锚点数时根据数据长度推断通道数
  pub fn from_len(len: usize, anchors: usize) -> Option<Self> {
    if anchors == 0 || len % anchors != 0 {
      return None;
    }
    let channels = len / anchors;
    (channels > BOX_CHANNELS).then_some(HeadLayout::ChannelsFirst { channels, anchors })
  }

  pub fn channels(&self) -> usize {
    match *self {
      HeadLayout::ChannelsFirst { channels, .. } | HeadLayout::AnchorsFirst { channels, .. } => {
        channels
      }
    }
  }

  pub fn anchors(&self) -> usize {
    match *self {
      HeadLayout::ChannelsFirst { anchors, .. } | HeadLayout::AnchorsFirst { anchors, .. } => {
        anchors
      }
    }
  }

  pub fn num_classes(&self) -> usize {
    self.channels() - BOX_CHANNELS
  }

  fn len(&self) -> usize {
    self.channels() * self.anchors()
  }

  #[inline]
  fn value(&self, data: &[f32], channel: usize, anchor: usize) -> f32 {
    match *self {
      HeadLayout::ChannelsFirst { anchors, .. } => data[channel * anchors + anchor],
      HeadLayout::AnchorsFirst { channels, .. } => data[anchor * channels + channel],
    }
  }
}

pub fn decode(
  output: &[f32],
  layout: HeadLayout,
  letterbox: &Letterbox,
  params: &DetectParams,
) -> Vec<DetectItem> {
  if output.len() < layout.len() {
    debug!(
      "输出长度不足: 期望 {}, 实际 {}",
      layout.len(),
      output.len()
    );
    return Vec::new();
  }

  let mut candidates = Vec::new();
  for anchor in 0..layout.anchors() {
    let (score, class_id) = {
      let mut best = f32::MIN;
      let mut cls_idx = 0usize;
      for c in 0..layout.num_classes() {
        let score = layout.value(output, BOX_CHANNELS + c, anchor);
        if score > best {
          best = score;
          cls_idx = c;
        }
      }
      (best, cls_idx as u32)
    };

    if score < params.confidence {
      continue;
    }

    let cx = layout.value(output, 0, anchor);
    let cy = layout.value(output, 1, anchor);
    let w = layout.value(output, 2, anchor);
    let h = layout.value(output, 3, anchor);

    let (x_min, y_min) = letterbox.restore(cx - w / 2.0, cy - h / 2.0);
    let (x_max, y_max) = letterbox.restore(cx + w / 2.0, cy + h / 2.0);
    if x_min >= x_max || y_min >= y_max {
      continue;
    }

    candidates.push(DetectItem {
      class_id,
      score,
      bbox: [x_min, y_min, x_max, y_max],
    });
  }

  debug!("置信度筛选后候选框 {} 个", candidates.len());
  nms(candidates, params.iou, params.max_detections)
}

/// 按类别进行非极大值抑制，结果按得分降序
pub fn nms(mut items: Vec<DetectItem>, iou_threshold: f32, max_detections: usize) -> Vec<DetectItem> {
  items.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

  let mut kept: Vec<DetectItem> = Vec::new();
  for item in items {
    if kept.len() >= max_detections {
      break;
    }
    let suppressed = kept
      .iter()
      .any(|k| k.class_id == item.class_id && iou(&k.bbox, &item.bbox) > iou_threshold);
    if !suppressed {
      kept.push(item);
    }
  }
  kept
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x_min = a[0].max(b[0]);
  let y_min = a[1].max(b[1]);
  let x_max = a[2].min(b[2]);
  let y_max = a[3].min(b[3]);

  let inter = (x_max - x_min).max(0.0) * (y_max - y_min).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn identity_letterbox() -> Letterbox {
    Letterbox {
      scale: 1.0,
      pad_x: 0.0,
      pad_y: 0.0,
      source_width: 100,
      source_height: 100,
    }
  }

  /// 构造 `[4 + classes, anchors]` 的输出张量
  fn head(classes: usize, boxes: &[([f32; 4], usize, f32)], anchors: usize) -> Vec<f32> {
    let channels = 4 + classes;
    let mut data = vec![0.0f32; channels * anchors];
    for (anchor, (bbox, class, score)) in boxes.iter().enumerate() {
      for (c, v) in bbox.iter().enumerate() {
        data[c * anchors + anchor] = *v;
      }
      data[(4 + class) * anchors + anchor] = *score;
    }
    data
  }

  #[test]
  fn anchors_for_default_input() {
    assert_eq!(anchors_for(YOLOV8_INPUT_SIZE), 8400);
  }

  #[test]
  fn layout_detection() {
    assert_eq!(
      HeadLayout::from_shape(&[1, 19, 8400]),
      Some(HeadLayout::ChannelsFirst {
        channels: 19,
        anchors: 8400
      })
    );
    assert_eq!(
      HeadLayout::from_shape(&[1, 8400, 19]),
      Some(HeadLayout::AnchorsFirst {
        anchors: 8400,
        channels: 19
      })
    );
    assert_eq!(HeadLayout::from_shape(&[1, 3, 8400]), None);
    assert_eq!(HeadLayout::from_len(19 * 8400, 8400).map(|l| l.num_classes()), Some(15));
    assert_eq!(HeadLayout::from_len(100, 8400), None);
  }

  #[test]
  fn decode_filters_by_confidence() {
    let data = head(
      2,
      &[([50.0, 50.0, 20.0, 20.0], 1, 0.9), ([20.0, 20.0, 10.0, 10.0], 0, 0.1)],
      4,
    );
    let layout = HeadLayout::ChannelsFirst {
      channels: 6,
      anchors: 4,
    };
    let items = decode(&data, layout, &identity_letterbox(), &DetectParams::default());
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].class_id, 1);
    let [x0, y0, x1, y1] = items[0].bbox;
    assert!((x0 - 0.4).abs() < 1e-5 && (y0 - 0.4).abs() < 1e-5);
    assert!((x1 - 0.6).abs() < 1e-5 && (y1 - 0.6).abs() < 1e-5);
  }

  #[test]
  fn decode_reads_transposed_layout() {
    // 单个锚点，[anchors, channels]
    let data = vec![50.0, 50.0, 20.0, 20.0, 0.0, 0.8];
    let layout = HeadLayout::AnchorsFirst {
      anchors: 1,
      channels: 6,
    };
    let items = decode(&data, layout, &identity_letterbox(), &DetectParams::default());
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].class_id, 1);
  }

  #[test]
  fn nms_suppresses_same_class_overlaps_only() {
    let a = DetectItem {
      class_id: 0,
      score: 0.9,
      bbox: [0.1, 0.1, 0.5, 0.5],
    };
    let b = DetectItem {
      score: 0.8,
      bbox: [0.12, 0.12, 0.5, 0.5],
      ..a.clone()
    };
    let c = DetectItem {
      class_id: 1,
      ..b.clone()
    };
    let kept = nms(vec![b, c, a.clone()], 0.45, 300);
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0], a);
    assert_eq!(kept[1].class_id, 1);
  }

  #[test]
  fn nms_respects_max_detections() {
    let items = (0..5)
      .map(|i| DetectItem {
        class_id: i,
        score: 0.5,
        bbox: [0.0, 0.0, 1.0, 1.0],
      })
      .collect();
    assert_eq!(nms(items, 0.45, 3).len(), 3);
  }

  #[test]
  fn iou_of_disjoint_boxes_is_zero() {
    assert_eq!(iou(&[0.0, 0.0, 0.1, 0.1], &[0.5, 0.5, 0.6, 0.6]), 0.0);
    assert!((iou(&[0.0, 0.0, 1.0, 1.0], &[0.0, 0.0, 1.0, 1.0]) - 1.0).abs() < 1e-6);
  }
}

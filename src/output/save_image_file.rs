// 该文件是 Lubiao （路标） 项目的一部分。
// src/output/save_image_file.rs - 保存标注图像
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::{
  frame::RgbFrame,
  model::{ClassNameTable, DetectResult},
  output::{Render, draw::Draw},
};

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
}

/// 把检测结果画到原图上并保存，格式由扩展名决定
pub struct SaveImageFileOutput<'a> {
  path: PathBuf,
  draw: &'a Draw,
  labels: &'a ClassNameTable,
}

impl<'a> SaveImageFileOutput<'a> {
  pub fn new(path: impl Into<PathBuf>, draw: &'a Draw, labels: &'a ClassNameTable) -> Self {
    SaveImageFileOutput {
      path: path.into(),
      draw,
      labels,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Render<RgbFrame, DetectResult> for SaveImageFileOutput<'_> {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &RgbFrame, result: &DetectResult) -> Result<(), Self::Error> {
    let mut image = frame.to_rgb_image();
    self.draw.draw_detections(&mut image, result, self.labels);

    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;
    info!("保存标注图像到文件: {}", self.path.display());

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;

  #[test]
  fn saves_annotated_copy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("predict").join("sign.png");
    let draw = Draw::default();
    let labels = ClassNameTable::new(["stop"]);
    let output = SaveImageFileOutput::new(&path, &draw, &labels);

    let frame = RgbFrame::with_shape(32, 32);
    let result = DetectResult::from(vec![DetectItem {
      class_id: 0,
      score: 0.7,
      bbox: [0.25, 0.25, 0.75, 0.75],
    }]);
    output.render_result(&frame, &result).unwrap();

    let saved = image::open(output.path()).unwrap().to_rgb8();
    assert_eq!(saved.dimensions(), (32, 32));
    assert_ne!(saved, frame.to_rgb_image());
  }

  #[test]
  fn unknown_extension_fails_to_encode() {
    let dir = tempfile::tempdir().unwrap();
    let draw = Draw::default();
    let output = SaveImageFileOutput::new(dir.path().join("x.unknownext"), &draw, ClassNameTable::empty());
    let result = output.render_result(&RgbFrame::with_shape(4, 4), &DetectResult::default());
    assert!(matches!(result, Err(SaveImageFileError::ImageError(_))));
  }
}

// 该文件是 Lubiao （路标） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbImage};
use tracing::debug;

use crate::{frame::RgbFrame, input::InputError};

/// 单帧输入：迭代一次后耗尽
pub struct ImageFileInput {
  image: Option<RgbImage>,
}

impl ImageFileInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, InputError> {
    let path = path.as_ref();
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    debug!(
      "读取图像: {} ({}x{})",
      path.display(),
      image.width(),
      image.height()
    );

    Ok(ImageFileInput {
      image: Some(image.to_rgb8()),
    })
  }
}

impl Iterator for ImageFileInput {
  type Item = RgbFrame;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take().map(RgbFrame::from)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn yields_exactly_one_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("one.png");
    RgbImage::from_pixel(5, 4, image::Rgb([9, 8, 7]))
      .save(&path)
      .unwrap();

    let mut input = ImageFileInput::open(&path).unwrap();
    let frame = input.next().unwrap();
    assert_eq!(frame.dimensions(), (5, 4));
    assert_eq!(&frame.as_nhwc()[..3], &[9, 8, 7]);
    assert!(input.next().is_none());
  }

  #[test]
  fn garbage_is_an_image_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.jpg");
    std::fs::write(&path, b"definitely not a jpeg").unwrap();
    assert!(matches!(
      ImageFileInput::open(&path),
      Err(InputError::ImageLoadError(_))
    ));
  }
}

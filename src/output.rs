// 该文件是 Lubiao （路标） 项目的一部分。
// src/output.rs - 输出定义
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

use thiserror::Error;

use crate::frame::RgbFrame;

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

/// 视频帧写入器：第一帧决定输出尺寸，循环结束后必须调用 [`FrameWriter::release`]
pub trait FrameWriter {
  type Error;

  fn write_frame(&mut self, frame: &RgbFrame) -> Result<(), Self::Error>;

  fn release(self) -> Result<(), Self::Error>
  where
    Self: Sized;
}

/// 结果视频的编码标签（MPEG-4 Part 2）
pub const VIDEO_FOURCC: &str = "mp4v";
/// 结果视频的固定帧率
pub const VIDEO_FPS: f64 = 20.0;

pub mod draw;
mod run_dir;
mod save_image_file;
mod save_video_file;

#[cfg(feature = "gstreamer_video")]
mod gstreamer_video_output;

pub use self::run_dir::{RunDirError, RunDirectory, RunsRoot};
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};
pub use self::save_video_file::FfmpegVideoOutput;

#[cfg(feature = "gstreamer_video")]
pub use self::gstreamer_video_output::GStreamerVideoOutput;

#[derive(Error, Debug)]
pub enum VideoOutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("视频编码错误: {0}")]
  EncodingError(String),
  #[cfg(feature = "gstreamer_video")]
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gstreamer::glib::Error),
  #[cfg(feature = "gstreamer_video")]
  #[error("GStreamer 布尔操作错误: {0}")]
  GStreamerBoolError(#[from] gstreamer::glib::BoolError),
  #[cfg(feature = "gstreamer_video")]
  #[error("状态改变错误: {0}")]
  StateChangeError(#[from] gstreamer::StateChangeError),
  #[error("管道错误: {0}")]
  PipelineError(String),
}

/// 尺寸与首帧不同的帧缩放到首帧尺寸
pub(crate) fn conform_frame(frame: &RgbFrame, width: u32, height: u32) -> Option<RgbFrame> {
  if frame.dimensions() == (width, height) {
    return None;
  }
  tracing::warn!(
    "帧尺寸 {}x{} 与首帧 {}x{} 不同，已缩放",
    frame.width(),
    frame.height(),
    width,
    height
  );
  let resized = image::imageops::resize(
    &frame.to_rgb_image(),
    width,
    height,
    image::imageops::FilterType::Triangle,
  );
  Some(RgbFrame::from(resized))
}

// 该文件是 Lubiao （路标） 项目的一部分。
// src/input.rs - 上传文件与图像/视频输入
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

mod ffmpeg_video;
mod read_image_file;
mod upload;

#[cfg(feature = "gstreamer_video")]
mod gstreamer_input;

pub use self::ffmpeg_video::{FfmpegVideoInput, VideoProbe, probe_video};
pub use self::read_image_file::ImageFileInput;
pub use self::upload::{IMAGE_EXTENSIONS, MediaKind, UploadedArtifact, VIDEO_EXTENSIONS};

#[cfg(feature = "gstreamer_video")]
pub use self::gstreamer_input::GStreamerVideoInput;

#[derive(Error, Debug)]
pub enum InputError {
  #[error("不支持的文件格式: {0}")]
  UnsupportedFormat(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像读取错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

#[derive(Error, Debug)]
pub enum VideoInputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("ffprobe 失败: {0}")]
  ProbeFailed(String),
  #[error("ffprobe 输出解析错误: {0}")]
  ProbeParseError(#[from] serde_json::Error),
  #[error("文件中没有视频流")]
  NoVideoStream,
  #[cfg(feature = "gstreamer_video")]
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gstreamer::glib::Error),
  #[cfg(feature = "gstreamer_video")]
  #[error("状态改变错误: {0}")]
  StateChangeError(#[from] gstreamer::StateChangeError),
  #[error("管道错误: {0}")]
  PipelineError(String),
}

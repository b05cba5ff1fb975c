// 该文件是 Lubiao （路标） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频文件输入
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

//! # GStreamer 视频输入模块
//!
//! 通过 `filesrc ! decodebin ! videoconvert ! appsink` 管道逐帧解码视频文件。
//! appsink 不丢帧，`pull_sample` 在流结束时返回错误，迭代随之结束。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev gstreamer1.0-libav
//! ```

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, error, info};

use crate::{frame::RgbFrame, input::VideoInputError};

const PULL_TIMEOUT_MS: u64 = 100;

fn pipeline_description(path: &Path) -> String {
  format!(
    "filesrc location=\"{}\" ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
     appsink name=sink sync=false max-buffers=4 drop=false",
    path.display()
  )
}

pub struct GStreamerVideoInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  frame_index: u64,
  finished: bool,
}

impl GStreamerVideoInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, VideoInputError> {
    gst::init()?;

    let description = pipeline_description(path.as_ref());
    info!("GStreamer pipeline description: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| VideoInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or_else(|| VideoInputError::PipelineError("Failed to get appsink element".to_string()))?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| {
        VideoInputError::PipelineError("Failed to convert element to appsink".to_string())
      })?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerVideoInput {
      pipeline,
      appsink,
      frame_index: 0,
      finished: false,
    })
  }
}

impl Drop for GStreamerVideoInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      tracing::warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl GStreamerVideoInput {
  /// 取出管道总线上的错误；解码失败时 appsink 收不到 EOS，只能从这里得知
  fn pipeline_error(&self) -> Option<String> {
    let bus = self.pipeline.bus()?;
    let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
    match msg.view() {
      gst::MessageView::Error(err) => Some(match err.debug() {
        Some(debug) => format!("{} ({})", err.error(), debug),
        None => err.error().to_string(),
      }),
      _ => None,
    }
  }

  fn pull_frame(&mut self) -> Option<Result<RgbFrame, VideoInputError>> {
    loop {
      if let Some(sample) = self
        .appsink
        .try_pull_sample(gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
      {
        return Some(convert_sample(sample));
      }
      if self.appsink.is_eos() {
        debug!("视频读取结束，共 {} 帧", self.frame_index);
        return None;
      }
      if let Some(e) = self.pipeline_error() {
        return Some(Err(VideoInputError::PipelineError(e)));
      }
    }
  }
}

impl Iterator for GStreamerVideoInput {
  type Item = RgbFrame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    match self.pull_frame() {
      Some(Ok(frame)) => {
        self.frame_index += 1;
        Some(frame)
      }
      Some(Err(e)) => {
        error!("读取第 {} 帧失败: {}", self.frame_index, e);
        self.finished = true;
        None
      }
      None => {
        self.finished = true;
        None
      }
    }
  }
}

fn convert_sample(sample: gst::Sample) -> Result<RgbFrame, VideoInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| VideoInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| VideoInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info = gst_video::VideoInfo::from_caps(caps)
    .map_err(|_| VideoInputError::PipelineError("Failed to get video info from caps".to_string()))?;
  if video_info.format() != gst_video::VideoFormat::Rgb {
    return Err(VideoInputError::PipelineError(format!(
      "Unsupported video format {:?}",
      video_info.format()
    )));
  }

  let width = video_info.width();
  let height = video_info.height();
  let stride = video_info.stride()[0] as usize;
  let row = width as usize * 3;

  let map = buffer.map_readable().map_err(|e| {
    VideoInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();
  if data.len() < stride * (height as usize).saturating_sub(1) + row {
    return Err(VideoInputError::PipelineError(format!(
      "Buffer size mismatch: {} bytes for {}x{} stride {}",
      data.len(),
      width,
      height,
      stride
    )));
  }

  // 去掉每行末尾的对齐填充
  let mut frame = RgbFrame::with_shape(width, height);
  for (y, dst) in frame.as_mut().chunks_exact_mut(row).enumerate() {
    let offset = y * stride;
    dst.copy_from_slice(&data[offset..offset + row]);
  }

  Ok(frame)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn location_is_quoted() {
    let desc = pipeline_description(Path::new("/tmp/my clip.mp4"));
    assert!(desc.starts_with("filesrc location=\"/tmp/my clip.mp4\" ! decodebin"));
    assert!(desc.contains("drop=false"));
  }

  #[test]
  fn undecodable_file_ends_the_stream() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.mp4");
    std::fs::write(&path, b"this is not a video container at all").unwrap();

    // 管道可能在打开时就失败，也可能在播放后才在总线上报错；两种情况都不能阻塞
    match GStreamerVideoInput::open(&path) {
      Ok(mut input) => {
        assert!(input.next().is_none());
        assert!(input.next().is_none());
      }
      Err(_) => {}
    }
  }
}

// 该文件是 Lubiao （路标） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件输出
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

//! # GStreamer 视频文件输出模块
//!
//! 使用 `avenc_mpeg4`（mp4v）编码，容器由扩展名决定：
//!
//! - **.mp4** - `mp4mux`
//! - **.mov** - `qtmux`
//! - **.avi** - `avimux`
//!
//! 其它扩展名按 MP4 处理。管道在写入第一帧时创建，尺寸取第一帧的尺寸。

use std::path::{Path, PathBuf};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use tracing::{error, info, warn};

use crate::{
  frame::RgbFrame,
  output::{FrameWriter, VIDEO_FPS, VideoOutputError, conform_frame},
};

fn muxer_for(path: &Path) -> &'static str {
  match path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| e.to_ascii_lowercase())
    .as_deref()
  {
    Some("mov") => "qtmux",
    Some("avi") => "avimux",
    _ => "mp4mux",
  }
}

fn pipeline_description(path: &Path) -> String {
  format!(
    "appsrc name=src ! videoconvert ! avenc_mpeg4 ! {} ! filesink location=\"{}\"",
    muxer_for(path),
    path.display()
  )
}

struct Pipeline {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  width: u32,
  height: u32,
}

pub struct GStreamerVideoOutput {
  path: PathBuf,
  fps: u64,
  pipeline: Option<Pipeline>,
  frame_count: u64,
}

impl GStreamerVideoOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    GStreamerVideoOutput {
      path: path.into(),
      fps: VIDEO_FPS as u64,
      pipeline: None,
      frame_count: 0,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn start_pipeline(&self, width: u32, height: u32) -> Result<Pipeline, VideoOutputError> {
    gst::init()?;

    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let description = pipeline_description(&self.path);
    info!("创建视频输出管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| VideoOutputError::PipelineError("无法创建管道".to_string()))?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or_else(|| VideoOutputError::PipelineError("无法获取 appsrc 元素".to_string()))?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| VideoOutputError::PipelineError("无法转换为 appsrc".to_string()))?;

    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", width as i32)
      .field("height", height as i32)
      .field("framerate", gst::Fraction::new(self.fps as i32, 1))
      .build();
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;
    info!(
      "视频输出已初始化: {}x{} @ {} fps -> {}",
      width,
      height,
      self.fps,
      self.path.display()
    );

    Ok(Pipeline {
      pipeline,
      appsrc,
      width,
      height,
    })
  }

  fn push(&self, appsrc: &gst_app::AppSrc, data: &[u8]) -> Result<(), VideoOutputError> {
    let mut buffer = gst::Buffer::from_mut_slice(data.to_vec());
    let frame_ns = 1_000_000_000 / self.fps;
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or_else(|| VideoOutputError::PipelineError("缓冲区不可写".to_string()))?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(self.frame_count * frame_ns));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_ns));
    }

    appsrc
      .push_buffer(buffer)
      .map_err(|e| VideoOutputError::PipelineError(format!("推送缓冲区失败: {:?}", e)))?;
    Ok(())
  }
}

impl FrameWriter for GStreamerVideoOutput {
  type Error = VideoOutputError;

  fn write_frame(&mut self, frame: &RgbFrame) -> Result<(), Self::Error> {
    if self.pipeline.is_none() {
      self.pipeline = Some(self.start_pipeline(frame.width(), frame.height())?);
    }
    let Some(pipeline) = self.pipeline.as_ref() else {
      return Err(VideoOutputError::PipelineError("管道未启动".to_string()));
    };

    let resized = conform_frame(frame, pipeline.width, pipeline.height);
    let data = resized.as_ref().unwrap_or(frame).as_nhwc();
    self.push(&pipeline.appsrc, data)?;
    self.frame_count += 1;
    Ok(())
  }

  fn release(mut self) -> Result<(), Self::Error> {
    let Some(Pipeline {
      pipeline, appsrc, ..
    }) = self.pipeline.take()
    else {
      info!("没有帧可以编码为视频，跳过编码过程");
      return Ok(());
    };

    appsrc
      .end_of_stream()
      .map_err(|e| VideoOutputError::PipelineError(format!("发送 EOS 失败: {:?}", e)))?;

    // 等待 muxer 写完文件尾
    let mut outcome = Ok(());
    if let Some(bus) = pipeline.bus() {
      for msg in bus.iter_timed(gst::ClockTime::NONE) {
        match msg.view() {
          gst::MessageView::Eos(..) => break,
          gst::MessageView::Error(err) => {
            error!("GStreamer 编码错误: {}", err.error());
            outcome = Err(VideoOutputError::EncodingError(err.error().to_string()));
            break;
          }
          _ => {}
        }
      }
    }

    if let Err(e) = pipeline.set_state(gst::State::Null) {
      warn!("无法停止视频输出管道: {}", e);
    }

    if outcome.is_ok() {
      info!(
        "视频已保存到文件: {} ({} 帧)",
        self.path.display(),
        self.frame_count
      );
    }
    outcome
  }
}

impl Drop for GStreamerVideoOutput {
  fn drop(&mut self) {
    if let Some(Pipeline {
      pipeline, appsrc, ..
    }) = self.pipeline.take()
    {
      let _ = appsrc.end_of_stream();
      if let Err(e) = pipeline.set_state(gst::State::Null) {
        warn!("无法停止视频输出管道: {}", e);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn container_follows_extension() {
    assert_eq!(muxer_for(Path::new("result_a.mp4")), "mp4mux");
    assert_eq!(muxer_for(Path::new("result_a.MOV")), "qtmux");
    assert_eq!(muxer_for(Path::new("result_a.avi")), "avimux");
    assert_eq!(muxer_for(Path::new("result_a.mkv")), "mp4mux");
  }

  #[test]
  fn pipeline_encodes_mpeg4() {
    let desc = pipeline_description(Path::new("/tmp/result_a.avi"));
    assert!(desc.contains("avenc_mpeg4 ! avimux"));
    assert!(desc.ends_with("location=\"/tmp/result_a.avi\""));
  }
}

// 该文件是 Lubiao （路标） 项目的一部分。
// src/output/save_video_file.rs - 保存视频文件
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

//! 视频文件输出模块
//!
//! 帧以 `rgb24` 原始数据写入 `ffmpeg` 的标准输入，由 ffmpeg 编码为 `mp4v`（MPEG-4 Part 2）。
//! 编码进程在写入第一帧时启动，视频尺寸取第一帧的尺寸；没有写入任何帧时不会生成文件。
//!
//! # 依赖
//!
//! 此模块需要系统安装 ffmpeg 命令行工具来编码视频。

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use tracing::{error, info};

use crate::{
  frame::RgbFrame,
  output::{FrameWriter, VIDEO_FOURCC, VIDEO_FPS, VideoOutputError, conform_frame},
};

struct Encoder {
  child: Child,
  stdin: ChildStdin,
  width: u32,
  height: u32,
}

pub struct FfmpegVideoOutput {
  path: PathBuf,
  fps: f64,
  encoder: Option<Encoder>,
  frame_count: u64,
}

impl FfmpegVideoOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    FfmpegVideoOutput {
      path: path.into(),
      fps: VIDEO_FPS,
      encoder: None,
      frame_count: 0,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn frame_count(&self) -> u64 {
    self.frame_count
  }

  fn encoder_args(&self, width: u32, height: u32) -> Vec<String> {
    let mut args: Vec<String> = [
      "-y",
      "-loglevel",
      "error",
      "-f",
      "rawvideo",
      "-pix_fmt",
      "rgb24",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.extend([
      "-s".to_string(),
      format!("{}x{}", width, height),
      "-r".to_string(),
      self.fps.to_string(),
      "-i".to_string(),
      "-".to_string(),
      "-c:v".to_string(),
      "mpeg4".to_string(),
      "-vtag".to_string(),
      VIDEO_FOURCC.to_string(),
      "-pix_fmt".to_string(),
      "yuv420p".to_string(),
      self.path.display().to_string(),
    ]);
    args
  }

  fn start_encoder(&self, width: u32, height: u32) -> Result<Encoder, VideoOutputError> {
    info!(
      "开始编码视频: {}x{} @ {} fps ({}) -> {}",
      width,
      height,
      self.fps,
      VIDEO_FOURCC,
      self.path.display()
    );

    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let mut child = Command::new("ffmpeg")
      .args(self.encoder_args(width, height))
      .stdin(Stdio::piped())
      .stdout(Stdio::null())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|e| {
        error!("无法执行 ffmpeg: {}", e);
        VideoOutputError::EncodingError(format!("无法执行 ffmpeg (请确保已安装): {}", e))
      })?;

    let stdin = child
      .stdin
      .take()
      .ok_or_else(|| VideoOutputError::PipelineError("无法获取 ffmpeg 标准输入".to_string()))?;

    Ok(Encoder {
      child,
      stdin,
      width,
      height,
    })
  }
}

impl FrameWriter for FfmpegVideoOutput {
  type Error = VideoOutputError;

  fn write_frame(&mut self, frame: &RgbFrame) -> Result<(), Self::Error> {
    if self.encoder.is_none() {
      self.encoder = Some(self.start_encoder(frame.width(), frame.height())?);
    }
    let Some(encoder) = self.encoder.as_mut() else {
      return Err(VideoOutputError::PipelineError("编码器未启动".to_string()));
    };

    match conform_frame(frame, encoder.width, encoder.height) {
      Some(resized) => encoder.stdin.write_all(resized.as_nhwc())?,
      None => encoder.stdin.write_all(frame.as_nhwc())?,
    }
    self.frame_count += 1;
    Ok(())
  }

  fn release(mut self) -> Result<(), Self::Error> {
    let Some(Encoder {
      child, stdin, ..
    }) = self.encoder.take()
    else {
      info!("没有帧可以编码为视频，跳过编码过程");
      return Ok(());
    };

    // 关闭标准输入，ffmpeg 随后完成封装并退出
    drop(stdin);
    let output = child.wait_with_output()?;
    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      error!("ffmpeg 错误: {}", stderr);
      return Err(VideoOutputError::EncodingError(format!(
        "ffmpeg 失败: {}",
        stderr
      )));
    }

    info!(
      "视频已保存到文件: {} ({} 帧)",
      self.path.display(),
      self.frame_count
    );
    Ok(())
  }
}

impl Drop for FfmpegVideoOutput {
  fn drop(&mut self) {
    // 未经 release 就被销毁时结束编码进程
    if let Some(Encoder {
      mut child, stdin, ..
    }) = self.encoder.take()
    {
      drop(stdin);
      let _ = child.wait();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn encoder_uses_fixed_codec_tag_and_rate() {
    let output = FfmpegVideoOutput::new("/tmp/result_clip.mp4");
    let args = output.encoder_args(640, 360);
    let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();

    assert_eq!(args[pos("-s") + 1], "640x360");
    assert_eq!(args[pos("-r") + 1], "20");
    assert_eq!(args[pos("-vtag") + 1], "mp4v");
    assert_eq!(args[pos("-c:v") + 1], "mpeg4");
    assert_eq!(args.last().unwrap(), "/tmp/result_clip.mp4");
  }

  #[test]
  fn releasing_without_frames_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("result_empty.mp4");
    let output = FfmpegVideoOutput::new(&path);
    assert_eq!(output.frame_count(), 0);
    output.release().unwrap();
    assert!(!path.exists());
  }
}

// 该文件是 Lubiao （路标） 项目的一部分。
// src/input/ffmpeg_video.rs - 基于 ffmpeg 的视频逐帧读取
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

//! 视频文件输入
//!
//! 先用 `ffprobe` 读取视频流尺寸，再启动 `ffmpeg` 将视频解码为 `rgb24` 原始帧，
//! 通过标准输出按帧读取。读到流末尾或读取失败都视为输入结束。
//!
//! # 依赖
//!
//! 此模块需要系统安装 ffmpeg 与 ffprobe 命令行工具。

use std::io::{ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::{frame::RgbFrame, input::VideoInputError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoProbe {
  pub width: u32,
  pub height: u32,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
  #[serde(default)]
  streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
  codec_type: Option<String>,
  width: Option<u32>,
  height: Option<u32>,
}

/// 解析 `ffprobe -print_format json -show_streams` 的输出
fn parse_probe(json: &[u8]) -> Result<VideoProbe, VideoInputError> {
  let probe: FfprobeOutput = serde_json::from_slice(json)?;
  probe
    .streams
    .iter()
    .find(|s| s.codec_type.as_deref() == Some("video"))
    .and_then(|s| match (s.width, s.height) {
      (Some(width), Some(height)) if width > 0 && height > 0 => Some(VideoProbe { width, height }),
      _ => None,
    })
    .ok_or(VideoInputError::NoVideoStream)
}

pub fn probe_video(path: impl AsRef<Path>) -> Result<VideoProbe, VideoInputError> {
  let path = path.as_ref();
  let output = Command::new("ffprobe")
    .args([
      "-v",
      "error",
      "-select_streams",
      "v:0",
      "-print_format",
      "json",
      "-show_streams",
    ])
    .arg(path)
    .stdin(Stdio::null())
    .output()?;

  if !output.status.success() {
    return Err(VideoInputError::ProbeFailed(
      String::from_utf8_lossy(&output.stderr).into_owned(),
    ));
  }

  parse_probe(&output.stdout)
}

pub struct FfmpegVideoInput {
  child: Child,
  stdout: ChildStdout,
  probe: VideoProbe,
  frame_index: u64,
  finished: bool,
}

impl FfmpegVideoInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, VideoInputError> {
    let path = path.as_ref();
    let probe = probe_video(path)?;
    info!(
      "打开视频: {} ({}x{})",
      path.display(),
      probe.width,
      probe.height
    );

    // 关闭自动旋转，保证输出尺寸与 ffprobe 报告一致
    let mut child = Command::new("ffmpeg")
      .args(["-v", "error", "-nostdin", "-noautorotate", "-i"])
      .arg(path)
      .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::inherit())
      .spawn()?;

    let stdout = child
      .stdout
      .take()
      .ok_or_else(|| VideoInputError::PipelineError("无法获取 ffmpeg 标准输出".to_string()))?;

    Ok(FfmpegVideoInput {
      child,
      stdout,
      probe,
      frame_index: 0,
      finished: false,
    })
  }

  fn frame_size(&self) -> usize {
    self.probe.width as usize * self.probe.height as usize * 3
  }
}

impl Iterator for FfmpegVideoInput {
  type Item = RgbFrame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    let mut data = vec![0u8; self.frame_size()];
    match self.stdout.read_exact(&mut data) {
      Ok(()) => {}
      Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
        debug!("视频读取结束，共 {} 帧", self.frame_index);
        self.finished = true;
        return None;
      }
      Err(e) => {
        error!("读取第 {} 帧失败: {}", self.frame_index, e);
        self.finished = true;
        return None;
      }
    }

    self.frame_index += 1;
    match RgbFrame::from_raw(self.probe.width, self.probe.height, data) {
      Ok(frame) => Some(frame),
      Err(e) => {
        error!("帧数据无效: {}", e);
        self.finished = true;
        None
      }
    }
  }
}

impl Drop for FfmpegVideoInput {
  fn drop(&mut self) {
    if !self.finished {
      let _ = self.child.kill();
    }
    match self.child.wait() {
      Ok(status) if !status.success() && self.finished => {
        warn!("ffmpeg 解码进程异常退出: {}", status)
      }
      Ok(_) => {}
      Err(e) => warn!("等待 ffmpeg 解码进程失败: {}", e),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn picks_the_video_stream() {
    let json = br#"{
      "streams": [
        { "index": 0, "codec_type": "audio" },
        { "index": 1, "codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720 }
      ]
    }"#;
    assert_eq!(
      parse_probe(json).unwrap(),
      VideoProbe {
        width: 1280,
        height: 720
      }
    );
  }

  #[test]
  fn no_video_stream_is_an_error() {
    assert!(matches!(
      parse_probe(br#"{ "streams": [] }"#),
      Err(VideoInputError::NoVideoStream)
    ));
    assert!(matches!(
      parse_probe(br#"{}"#),
      Err(VideoInputError::NoVideoStream)
    ));
    assert!(matches!(
      parse_probe(b"not json"),
      Err(VideoInputError::ProbeParseError(_))
    ));
  }
}

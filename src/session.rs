// 该文件是 Lubiao （路标） 项目的一部分。
// src/session.rs - 会话
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

//! 会话
//!
//! [`Session`] 在启动时创建一次，持有模型、播报器、视频后端和运行目录根。
//! 每个上传文件是一次独立的交互，拥有自己的临时目录，[`Interaction`] 析构时删除。

use std::error::Error as StdError;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  detect::{DetectError, DetectedLabelSet, DetectionRunner, ImageReport, MissingOutputArtifact, VideoReport},
  frame::RgbFrame,
  input::{FfmpegVideoInput, InputError, MediaKind, UploadedArtifact, VideoInputError},
  model::{DetectResult, Model},
  output::{FfmpegVideoOutput, FrameWriter, RunsRoot, VideoOutputError, draw::Draw},
  speech::Announcer,
};

#[cfg(feature = "gstreamer_video")]
use crate::{input::GStreamerVideoInput, output::GStreamerVideoOutput};

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("Unsupported file format! ({0})")]
  UnsupportedFormat(String),
  #[error("输入错误: {0}")]
  Input(InputError),
  #[error("检测错误: {0}")]
  Detect(#[from] DetectError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error(transparent)]
  MissingOutput(#[from] MissingOutputArtifact),
}

impl From<InputError> for SessionError {
  fn from(e: InputError) -> Self {
    match e {
      InputError::UnsupportedFormat(name) => SessionError::UnsupportedFormat(name),
      e => SessionError::Input(e),
    }
  }
}

/// 视频读写的实现方式
pub trait VideoBackend {
  type Source: Iterator<Item = RgbFrame>;
  type Writer: FrameWriter;

  fn open_source(&self, path: &Path) -> Result<Self::Source, VideoInputError>;

  /// 写入器在第一帧到达时才真正创建文件
  fn create_writer(&self, path: &Path) -> Self::Writer;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegBackend;

impl VideoBackend for FfmpegBackend {
  type Source = FfmpegVideoInput;
  type Writer = FfmpegVideoOutput;

  fn open_source(&self, path: &Path) -> Result<Self::Source, VideoInputError> {
    FfmpegVideoInput::open(path)
  }

  fn create_writer(&self, path: &Path) -> Self::Writer {
    FfmpegVideoOutput::new(path)
  }
}

#[cfg(feature = "gstreamer_video")]
#[derive(Debug, Default, Clone, Copy)]
pub struct GStreamerBackend;

#[cfg(feature = "gstreamer_video")]
impl VideoBackend for GStreamerBackend {
  type Source = GStreamerVideoInput;
  type Writer = GStreamerVideoOutput;

  fn open_source(&self, path: &Path) -> Result<Self::Source, VideoInputError> {
    GStreamerVideoInput::open(path)
  }

  fn create_writer(&self, path: &Path) -> Self::Writer {
    GStreamerVideoOutput::new(path)
  }
}

pub enum VideoBackendWrapper {
  Ffmpeg(FfmpegBackend),
  #[cfg(feature = "gstreamer_video")]
  GStreamer(GStreamerBackend),
}

pub enum VideoSourceWrapper {
  Ffmpeg(FfmpegVideoInput),
  #[cfg(feature = "gstreamer_video")]
  GStreamer(GStreamerVideoInput),
}

pub enum VideoWriterWrapper {
  Ffmpeg(FfmpegVideoOutput),
  #[cfg(feature = "gstreamer_video")]
  GStreamer(GStreamerVideoOutput),
}

impl Iterator for VideoSourceWrapper {
  type Item = RgbFrame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      VideoSourceWrapper::Ffmpeg(source) => source.next(),
      #[cfg(feature = "gstreamer_video")]
      VideoSourceWrapper::GStreamer(source) => source.next(),
    }
  }
}

impl FrameWriter for VideoWriterWrapper {
  type Error = VideoOutputError;

  fn write_frame(&mut self, frame: &RgbFrame) -> Result<(), Self::Error> {
    match self {
      VideoWriterWrapper::Ffmpeg(writer) => writer.write_frame(frame),
      #[cfg(feature = "gstreamer_video")]
      VideoWriterWrapper::GStreamer(writer) => writer.write_frame(frame),
    }
  }

  fn release(self) -> Result<(), Self::Error> {
    match self {
      VideoWriterWrapper::Ffmpeg(writer) => writer.release(),
      #[cfg(feature = "gstreamer_video")]
      VideoWriterWrapper::GStreamer(writer) => writer.release(),
    }
  }
}

impl VideoBackend for VideoBackendWrapper {
  type Source = VideoSourceWrapper;
  type Writer = VideoWriterWrapper;

  fn open_source(&self, path: &Path) -> Result<Self::Source, VideoInputError> {
    match self {
      VideoBackendWrapper::Ffmpeg(backend) => backend.open_source(path).map(VideoSourceWrapper::Ffmpeg),
      #[cfg(feature = "gstreamer_video")]
      VideoBackendWrapper::GStreamer(backend) => {
        backend.open_source(path).map(VideoSourceWrapper::GStreamer)
      }
    }
  }

  fn create_writer(&self, path: &Path) -> Self::Writer {
    match self {
      VideoBackendWrapper::Ffmpeg(backend) => VideoWriterWrapper::Ffmpeg(backend.create_writer(path)),
      #[cfg(feature = "gstreamer_video")]
      VideoBackendWrapper::GStreamer(backend) => {
        VideoWriterWrapper::GStreamer(backend.create_writer(path))
      }
    }
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum InteractionReport {
  Image(ImageReport),
  Video(VideoReport),
}

impl InteractionReport {
  pub fn summary(&self) -> &str {
    match self {
      InteractionReport::Image(report) => &report.summary,
      InteractionReport::Video(report) => &report.summary,
    }
  }

  pub fn labels(&self) -> &DetectedLabelSet {
    match self {
      InteractionReport::Image(report) => &report.labels,
      InteractionReport::Video(report) => &report.labels,
    }
  }

  /// 结果文件；图像模式下标注图像缺失、或视频没有任何帧时返回错误
  pub fn result_path(&self) -> Result<&Path, MissingOutputArtifact> {
    match self {
      InteractionReport::Image(report) => report.annotated(),
      InteractionReport::Video(report) if report.output_video.is_file() => Ok(&report.output_video),
      InteractionReport::Video(report) => Err(MissingOutputArtifact(report.output_video.clone())),
    }
  }
}

/// 一次交互的结果；上传文件及视频结果所在的临时目录随它一起删除
#[derive(Debug, Serialize)]
pub struct Interaction {
  pub created_at: DateTime<Local>,
  pub upload: String,
  pub kind: MediaKind,
  pub report: InteractionReport,
  #[serde(skip)]
  artifact: UploadedArtifact,
}

impl Interaction {
  pub fn artifact(&self) -> &UploadedArtifact {
    &self.artifact
  }

  /// 把结果文件复制到 `dir`，返回新路径
  pub fn export(&self, dir: impl AsRef<Path>) -> Result<PathBuf, SessionError> {
    let source = self.report.result_path()?;
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;

    let name = source
      .file_name()
      .map(PathBuf::from)
      .unwrap_or_else(|| PathBuf::from(self.artifact.name()));
    let target = dir.join(name);
    std::fs::copy(source, &target)?;
    info!("导出结果文件: {}", target.display());
    Ok(target)
  }
}

pub struct Session<M, A, V> {
  model: M,
  announcer: A,
  video: V,
  runs: RunsRoot,
  draw: Draw,
}

impl<M, A, V> Session<M, A, V> {
  pub fn new(model: M, announcer: A, video: V, runs: RunsRoot, draw: Draw) -> Self {
    Session {
      model,
      announcer,
      video,
      runs,
      draw,
    }
  }

  pub fn model(&self) -> &M {
    &self.model
  }

  pub fn announcer(&self) -> &A {
    &self.announcer
  }
}

impl<M, A, V> Session<M, A, V>
where
  M: Model<Input = RgbFrame, Output = DetectResult>,
  M::Error: StdError + Send + Sync + 'static,
  A: Announcer,
  V: VideoBackend,
  <V::Writer as FrameWriter>::Error: StdError + Send + Sync + 'static,
{

  /// 处理本地文件；格式不支持时不会调用模型、不会播报、也不会写任何文件
  pub fn handle_upload(&self, path: impl AsRef<Path>) -> Result<Interaction, SessionError> {
    let artifact = UploadedArtifact::materialize(path)?;
    self.process(artifact)
  }

  /// 处理内存中的上传内容
  pub fn handle_bytes(&self, name: &str, bytes: &[u8]) -> Result<Interaction, SessionError> {
    let artifact = UploadedArtifact::from_bytes(name, bytes)?;
    self.process(artifact)
  }

  fn process(&self, artifact: UploadedArtifact) -> Result<Interaction, SessionError> {
    let created_at = Local::now();
    let runner = DetectionRunner::new(&self.model, &self.announcer, &self.draw);

    let report = match artifact.kind() {
      MediaKind::Image => InteractionReport::Image(runner.run_image(&artifact, &self.runs)?),
      MediaKind::Video => {
        let output_video = artifact.result_path();
        // 打不开的视频按空帧流处理
        let source = match self.video.open_source(artifact.path()) {
          Ok(source) => Some(source),
          Err(e) => {
            warn!("无法读取视频 {}: {}", artifact.name(), e);
            None
          }
        };
        let writer = self.video.create_writer(&output_video);
        InteractionReport::Video(runner.run_video(
          source.into_iter().flatten(),
          writer,
          &output_video,
        )?)
      }
    };

    Ok(Interaction {
      created_at,
      upload: artifact.name().to_string(),
      kind: artifact.kind(),
      report,
      artifact,
    })
  }
}

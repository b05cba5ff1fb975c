// 该文件是 Lubiao （路标） 项目的一部分。
// src/detect.rs - 检测流程
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

//! 检测流程
//!
//! 图像模式只推理一次；视频模式逐帧顺序执行 `读取 → 推理 → 合并类别 → 写帧`，
//! 直到帧源耗尽。两种模式都在结束时播报一次摘要。

use std::error::Error as StdError;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::RgbFrame,
  input::{ImageFileInput, InputError, UploadedArtifact},
  model::{DetectResult, Model},
  output::{FrameWriter, Render, RunDirError, RunsRoot, SaveImageFileOutput, draw::Draw},
  speech::Announcer,
};

pub const NO_DETECTION_MESSAGE: &str = "No traffic signs detected.";
pub const DETECTED_PREFIX: &str = "Detected: ";

type BoxError = Box<dyn StdError + Send + Sync>;

/// 一次上传中出现过的类别名称，无重复，保持首次出现的顺序
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DetectedLabelSet {
  names: Vec<String>,
}

impl DetectedLabelSet {
  pub fn new() -> Self {
    Self::default()
  }

  /// 加入一个名称，已存在时返回 false
  pub fn insert(&mut self, name: &str) -> bool {
    if self.contains(name) {
      return false;
    }
    self.names.push(name.to_string());
    true
  }

  pub fn extend_from_result<M: Model + ?Sized>(&mut self, result: &DetectResult, model: &M) {
    for item in result.items.iter() {
      let name = model.resolve(item.class_id);
      if self.insert(name) {
        debug!("新类别: {}", name);
      }
    }
  }

  pub fn contains(&self, name: &str) -> bool {
    self.names.iter().any(|n| n == name)
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  /// 播报与显示共用的摘要文本
  pub fn summary(&self) -> String {
    if self.names.is_empty() {
      NO_DETECTION_MESSAGE.to_string()
    } else {
      format!("{}{}", DETECTED_PREFIX, self.names.join(", "))
    }
  }
}

impl<'a> FromIterator<&'a str> for DetectedLabelSet {
  fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
    let mut set = DetectedLabelSet::new();
    for name in iter {
      set.insert(name);
    }
    set
  }
}

/// 标注图像没有出现在预期位置；只作为显示警告
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("Processed image not found: {}", .0.display())]
pub struct MissingOutputArtifact(pub PathBuf);

#[derive(Debug, Clone, Serialize)]
pub struct ImageReport {
  pub labels: DetectedLabelSet,
  pub summary: String,
  pub detections: usize,
  pub run_dir: PathBuf,
  pub annotated_image: PathBuf,
  pub annotated_found: bool,
}

impl ImageReport {
  pub fn annotated(&self) -> Result<&Path, MissingOutputArtifact> {
    if self.annotated_found {
      Ok(&self.annotated_image)
    } else {
      Err(MissingOutputArtifact(self.annotated_image.clone()))
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoReport {
  pub labels: DetectedLabelSet,
  pub summary: String,
  pub frames: u64,
  pub dimensions: Option<(u32, u32)>,
  pub output_video: PathBuf,
}

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("输入错误: {0}")]
  Input(#[from] InputError),
  #[error("图像中没有可用的帧")]
  NoFrame,
  #[error("推理错误: {0}")]
  Model(BoxError),
  #[error("运行目录错误: {0}")]
  RunDir(#[from] RunDirError),
  #[error("视频写入错误: {0}")]
  Writer(BoxError),
}

pub struct DetectionRunner<'a, M, A> {
  model: &'a M,
  announcer: &'a A,
  draw: &'a Draw,
}

impl<'a, M, A> DetectionRunner<'a, M, A>
where
  M: Model<Input = RgbFrame, Output = DetectResult>,
  M::Error: StdError + Send + Sync + 'static,
  A: Announcer,
{
  pub fn new(model: &'a M, announcer: &'a A, draw: &'a Draw) -> Self {
    DetectionRunner {
      model,
      announcer,
      draw,
    }
  }

  fn infer(&self, frame: &RgbFrame) -> Result<DetectResult, DetectError> {
    self
      .model
      .infer(frame)
      .map_err(|e| DetectError::Model(Box::new(e)))
  }

  /// 播报失败只记录警告
  fn announce(&self, summary: &str) {
    if let Err(e) = self.announcer.announce(summary) {
      warn!("语音播报失败: {}", e);
    }
  }

  /// 图像模式：推理一次，把标注图像保存到新分配的运行目录，文件名与上传文件相同
  pub fn run_image(
    &self,
    artifact: &UploadedArtifact,
    runs: &RunsRoot,
  ) -> Result<ImageReport, DetectError> {
    self.run_image_with(artifact, runs, |path| {
      SaveImageFileOutput::new(path, self.draw, self.model.labels())
    })
  }

  /// 同 [`Self::run_image`]，标注图像由 `make_output` 创建的输出负责写入 `path`
  pub fn run_image_with<R, F>(
    &self,
    artifact: &UploadedArtifact,
    runs: &RunsRoot,
    make_output: F,
  ) -> Result<ImageReport, DetectError>
  where
    F: FnOnce(&Path) -> R,
    R: Render<RgbFrame, DetectResult>,
    R::Error: Display,
  {
    let frame = ImageFileInput::open(artifact.path())?
      .next()
      .ok_or(DetectError::NoFrame)?;
    let result = self.infer(&frame)?;
    info!("{}: 检测到 {} 个目标", artifact.name(), result.len());

    let mut labels = DetectedLabelSet::new();
    labels.extend_from_result(&result, self.model);

    let run = runs.allocate()?;
    let annotated_image = run.artifact_path(artifact.name());
    let output = make_output(&annotated_image);
    if let Err(e) = output.render_result(&frame, &result) {
      error!("无法保存标注图像 {}: {}", annotated_image.display(), e);
    }

    let summary = labels.summary();
    self.announce(&summary);

    let annotated_found = annotated_image.is_file();
    if !annotated_found {
      warn!("未找到标注图像: {}", annotated_image.display());
    }

    Ok(ImageReport {
      labels,
      summary,
      detections: result.len(),
      run_dir: run.path().to_path_buf(),
      annotated_image,
      annotated_found,
    })
  }

  /// 视频模式：逐帧推理并写出原始帧；无论处理了多少帧，写入器都会被释放
  pub fn run_video<S, W>(
    &self,
    source: S,
    mut writer: W,
    output_video: &Path,
  ) -> Result<VideoReport, DetectError>
  where
    S: IntoIterator<Item = RgbFrame>,
    W: FrameWriter,
    W::Error: StdError + Send + Sync + 'static,
  {
    let mut labels = DetectedLabelSet::new();
    let mut frames = 0u64;
    let mut dimensions = None;

    for frame in source {
      let step = self.infer(&frame).and_then(|result| {
        labels.extend_from_result(&result, self.model);
        writer
          .write_frame(&frame)
          .map_err(|e| DetectError::Writer(Box::new(e)))
      });
      if let Err(e) = step {
        if let Err(release_err) = writer.release() {
          warn!("释放视频写入器失败: {}", release_err);
        }
        return Err(e);
      }

      dimensions.get_or_insert(frame.dimensions());
      frames += 1;
    }

    writer
      .release()
      .map_err(|e| DetectError::Writer(Box::new(e)))?;
    info!("视频处理完成: {} 帧", frames);

    let summary = labels.summary();
    self.announce(&summary);

    Ok(VideoReport {
      labels,
      summary,
      frames,
      dimensions,
      output_video: output_video.to_path_buf(),
    })
  }
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;

  use super::*;
  use crate::model::{ClassNameTable, DetectItem, UNKNOWN_LABEL};
  use crate::speech::SpeechError;

  /// 按帧的第一个像素值决定检测结果
  struct PixelModel {
    labels: ClassNameTable,
  }

  impl Model for PixelModel {
    type Input = RgbFrame;
    type Output = DetectResult;
    type Error = std::io::Error;

    fn infer(&self, input: &RgbFrame) -> Result<DetectResult, std::io::Error> {
      let items = match input.as_nhwc()[0] {
        0 => vec![],
        255 => return Err(std::io::Error::other("boom")),
        v => vec![DetectItem {
          class_id: (v - 1) as u32,
          score: 0.9,
          bbox: [0.1, 0.1, 0.5, 0.5],
        }],
      };
      Ok(items.into())
    }

    fn labels(&self) -> &ClassNameTable {
      &self.labels
    }
  }

  #[derive(Default)]
  struct Recorder(RefCell<Vec<String>>);

  impl Announcer for Recorder {
    fn announce(&self, text: &str) -> Result<(), SpeechError> {
      self.0.borrow_mut().push(text.to_string());
      Ok(())
    }
  }

  #[derive(Default)]
  struct CountingWriter {
    frames: Vec<(u32, u32)>,
    released: std::rc::Rc<RefCell<Option<usize>>>,
  }

  impl FrameWriter for CountingWriter {
    type Error = std::io::Error;

    fn write_frame(&mut self, frame: &RgbFrame) -> Result<(), Self::Error> {
      self.frames.push(frame.dimensions());
      Ok(())
    }

    fn release(self) -> Result<(), Self::Error> {
      *self.released.borrow_mut() = Some(self.frames.len());
      Ok(())
    }
  }

  fn frame(value: u8) -> RgbFrame {
    let mut frame = RgbFrame::with_shape(8, 6);
    frame.as_mut()[0] = value;
    frame
  }

  /// 什么都不写的输出，标注图像因此不存在
  struct DiscardOutput;

  impl Render<RgbFrame, DetectResult> for DiscardOutput {
    type Error = std::io::Error;

    fn render_result(&self, _frame: &RgbFrame, _result: &DetectResult) -> Result<(), Self::Error> {
      Err(std::io::Error::other("disk full"))
    }
  }

  fn png_upload(name: &str, value: u8) -> UploadedArtifact {
    let mut picture = image::RgbImage::new(8, 6);
    picture.put_pixel(0, 0, image::Rgb([value, 0, 0]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    picture.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
    UploadedArtifact::from_bytes(name, &bytes.into_inner()).unwrap()
  }

  fn model() -> PixelModel {
    PixelModel {
      labels: ClassNameTable::new(["stop", "yield"]),
    }
  }

  #[test]
  fn summary_of_empty_set() {
    assert_eq!(DetectedLabelSet::new().summary(), "No traffic signs detected.");
  }

  #[test]
  fn duplicates_collapse_in_summary() {
    let set: DetectedLabelSet = ["A", "B", "A"].into_iter().collect();
    assert_eq!(set.len(), 2);
    assert_eq!(set.summary(), "Detected: A, B");
  }

  #[test]
  fn video_labels_are_unioned_across_frames() {
    let model = model();
    let recorder = Recorder::default();
    let draw = Draw::default();
    let runner = DetectionRunner::new(&model, &recorder, &draw);

    for (n, k) in [(1, 1), (5, 2), (9, 8)] {
      recorder.0.borrow_mut().clear();
      let frames = (0..n).map(|i| frame(if i < k { 1 } else { 2 }));
      let writer = CountingWriter::default();
      let released = writer.released.clone();
      let report = runner
        .run_video(frames, writer, Path::new("result_clip.mp4"))
        .unwrap();

      let expected: DetectedLabelSet = if k < n {
        ["stop", "yield"].into_iter().collect()
      } else {
        ["stop"].into_iter().collect()
      };
      assert_eq!(report.labels, expected);
      assert_eq!(report.frames, n as u64);
      assert_eq!(*released.borrow(), Some(n));
      assert_eq!(*recorder.0.borrow(), vec![report.summary.clone()]);
    }
  }

  #[test]
  fn empty_video_still_releases_writer() {
    let model = model();
    let recorder = Recorder::default();
    let draw = Draw::default();
    let runner = DetectionRunner::new(&model, &recorder, &draw);

    let writer = CountingWriter::default();
    let released = writer.released.clone();
    let report = runner
      .run_video(std::iter::empty(), writer, Path::new("result_empty.mp4"))
      .unwrap();
    assert_eq!(report.frames, 0);
    assert_eq!(report.dimensions, None);
    assert_eq!(*released.borrow(), Some(0));
    assert_eq!(*recorder.0.borrow(), vec![NO_DETECTION_MESSAGE.to_string()]);
  }

  #[test]
  fn inference_failure_releases_writer_and_stays_silent() {
    let model = model();
    let recorder = Recorder::default();
    let draw = Draw::default();
    let runner = DetectionRunner::new(&model, &recorder, &draw);

    let writer = CountingWriter::default();
    let released = writer.released.clone();
    let frames = vec![frame(1), frame(255), frame(2)];
    let result = runner.run_video(frames, writer, Path::new("result_bad.mp4"));
    assert!(matches!(result, Err(DetectError::Model(_))));
    assert_eq!(*released.borrow(), Some(1));
    assert!(recorder.0.borrow().is_empty());
  }

  #[test]
  fn out_of_range_class_is_collected_as_unknown() {
    let model = model();
    let result: DetectResult = vec![
      DetectItem {
        class_id: 1,
        score: 0.9,
        bbox: [0.0, 0.0, 0.5, 0.5],
      },
      DetectItem {
        class_id: 7,
        score: 0.8,
        bbox: [0.5, 0.5, 1.0, 1.0],
      },
    ]
    .into();

    let mut labels = DetectedLabelSet::new();
    labels.extend_from_result(&result, &model);
    assert_eq!(labels.iter().collect::<Vec<_>>(), ["yield", UNKNOWN_LABEL]);
    assert_eq!(model.resolve(0), "stop");
  }

  #[test]
  fn image_is_annotated_under_upload_name() {
    let dir = tempfile::tempdir().unwrap();
    let model = model();
    let recorder = Recorder::default();
    let draw = Draw::default();
    let runner = DetectionRunner::new(&model, &recorder, &draw);

    let upload = png_upload("corner.png", 2);
    let report = runner.run_image(&upload, &RunsRoot::new(dir.path())).unwrap();
    let annotated = report.annotated().unwrap();
    assert_eq!(annotated.file_name().unwrap(), "corner.png");
    assert!(annotated.is_file());
    assert_eq!(report.summary, "Detected: yield");
    assert_eq!(*recorder.0.borrow(), vec![report.summary.clone()]);
  }

  #[test]
  fn missing_annotated_image_is_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let model = model();
    let recorder = Recorder::default();
    let draw = Draw::default();
    let runner = DetectionRunner::new(&model, &recorder, &draw);

    let upload = png_upload("sign.png", 1);
    let result = runner.run_image_with(&upload, &RunsRoot::new(dir.path()), |_| DiscardOutput);
    assert!(result.is_ok());
    let report = result.unwrap();

    assert!(!report.annotated_found);
    match report.annotated() {
      Err(MissingOutputArtifact(path)) => assert_eq!(path.file_name().unwrap(), "sign.png"),
      Ok(path) => panic!("unexpected annotated image {}", path.display()),
    }
    assert_eq!(report.summary, "Detected: stop");
    assert_eq!(*recorder.0.borrow(), vec!["Detected: stop".to_string()]);
  }
}

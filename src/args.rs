// 该文件是 Lubiao （路标） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use url::Url;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoBackendKind {
  /// 调用 ffmpeg / ffprobe 命令行
  Ffmpeg,
  /// GStreamer 管道（需要 gstreamer_video 特性）
  Gstreamer,
}

/// Lubiao 交通标志检测与语音播报
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址
  /// 支持格式:
  /// - ONNX: onnx:///path/to/best.onnx[?imgsz=640]
  /// - RKNN: rknn:///path/to/best.rknn
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 类别表（TOML，`names = [...]`），默认使用内置的交通标志类别表
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
  pub iou: f32,

  /// 运行目录的根，标注图像写入 <ROOT>/predict, <ROOT>/predict2 ...
  #[arg(long, default_value = "runs/detect", value_name = "DIR")]
  pub runs_root: PathBuf,

  /// 标签文字使用的字体文件（TTF/OTF），不指定时只画框
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 视频读写后端
  #[arg(long, value_enum, default_value_t = VideoBackendKind::Ffmpeg)]
  pub video_backend: VideoBackendKind,

  /// 不播报语音
  #[arg(long)]
  pub mute: bool,

  /// 将结果文件复制到该目录（临时目录会在交互结束后删除）
  #[arg(long, value_name = "DIR")]
  pub export: Option<PathBuf>,

  /// 将所有交互的结果写成 JSON 报告
  #[arg(long, value_name = "FILE")]
  pub report: Option<PathBuf>,

  /// 日志详细程度（-v: debug，-vv: trace）
  #[arg(short, long, action = ArgAction::Count)]
  pub verbose: u8,

  /// 上传文件（图片: jpg/jpeg/png，视频: mp4/avi/mov）
  #[arg(value_name = "UPLOAD", required = true)]
  pub uploads: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults() {
    let args = Args::try_parse_from(["lubiao", "--model", "onnx:///m/best.onnx", "a.png"]).unwrap();
    assert_eq!(args.model.scheme(), "onnx");
    assert_eq!(args.confidence, 0.25);
    assert_eq!(args.iou, 0.45);
    assert_eq!(args.runs_root, PathBuf::from("runs/detect"));
    assert_eq!(args.video_backend, VideoBackendKind::Ffmpeg);
    assert!(!args.mute);
    assert_eq!(args.uploads, vec![PathBuf::from("a.png")]);
  }

  #[test]
  fn upload_is_required() {
    assert!(Args::try_parse_from(["lubiao", "--model", "onnx:///m/best.onnx"]).is_err());
  }

  #[test]
  fn verbosity_counts() {
    let args =
      Args::try_parse_from(["lubiao", "-vv", "--model", "rknn:///m.rknn", "--mute", "clip.mp4"]).unwrap();
    assert_eq!(args.verbose, 2);
    assert!(args.mute);
  }
}

// 该文件是 Lubiao （路标） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, level_filters::LevelFilter, warn};

use lubiao::{
  model::{ClassNameTable, DetectParams, Model, ModelWrapper},
  output::{RunsRoot, draw::Draw},
  session::{FfmpegBackend, Interaction, InteractionReport, Session, SessionError, VideoBackendWrapper},
  speech::{Announcer, CommandAnnouncer, SilentAnnouncer},
};

use args::{Args, VideoBackendKind};

fn init_tracing(verbose: u8) {
  let level = match verbose {
    0 => LevelFilter::INFO,
    1 => LevelFilter::DEBUG,
    _ => LevelFilter::TRACE,
  };
  tracing_subscriber::fmt().with_max_level(level).init();
}

#[cfg(feature = "gstreamer_video")]
fn gstreamer_backend() -> Result<VideoBackendWrapper> {
  Ok(VideoBackendWrapper::GStreamer(lubiao::session::GStreamerBackend))
}

#[cfg(not(feature = "gstreamer_video"))]
fn gstreamer_backend() -> Result<VideoBackendWrapper> {
  anyhow::bail!("未启用 gstreamer_video 特性，无法使用 GStreamer 视频后端")
}

fn present(interaction: &Interaction) {
  let report = &interaction.report;
  match report {
    InteractionReport::Image(_) => println!("Detection Results"),
    InteractionReport::Video(_) => println!("Detection Summary"),
  }

  if report.labels().is_empty() {
    println!("[warn] {}", report.summary());
  } else {
    println!("[ok] {}", report.summary());
  }

  match report {
    InteractionReport::Image(image) => match image.annotated() {
      Ok(path) => println!("Annotated image: {}", path.display()),
      Err(_) => println!("Processed image not found."),
    },
    InteractionReport::Video(video) => match video.dimensions {
      Some((w, h)) => println!(
        "Result video: {} ({} frames, {}x{})",
        video.output_video.display(),
        video.frames,
        w,
        h
      ),
      None => println!("Result video: no frames were read"),
    },
  }
}

fn main() -> Result<()> {
  let args = Args::parse();
  init_tracing(args.verbose);

  info!("模型地址: {}", args.model);
  let labels = match &args.labels {
    Some(path) => ClassNameTable::from_file(path)
      .with_context(|| format!("无法加载类别表: {}", path.display()))?,
    None => ClassNameTable::traffic_signs(),
  };
  let params = DetectParams {
    confidence: args.confidence,
    iou: args.iou,
    ..DetectParams::default()
  };

  info!("正在加载模型...");
  let model = ModelWrapper::load(&args.model, labels, params)
    .with_context(|| format!("无法加载模型: {}", args.model))?;
  info!("模型加载完成，共 {} 个类别", model.labels().len());

  let announcer: Box<dyn Announcer> = if args.mute {
    Box::new(SilentAnnouncer)
  } else {
    Box::new(CommandAnnouncer::system_default())
  };
  let video = match args.video_backend {
    VideoBackendKind::Ffmpeg => VideoBackendWrapper::Ffmpeg(FfmpegBackend),
    VideoBackendKind::Gstreamer => gstreamer_backend()?,
  };
  let draw = match &args.font {
    Some(path) => Draw::with_font_file(path)
      .with_context(|| format!("无法加载字体: {}", path.display()))?,
    None => Draw::default(),
  };

  let session = Session::new(model, announcer, video, RunsRoot::new(&args.runs_root), draw);

  let mut records = Vec::new();
  for upload in &args.uploads {
    let name = upload
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| upload.display().to_string());
    println!();
    println!("Uploaded File: {}", name);

    let interaction = match session.handle_upload(upload) {
      Ok(interaction) => interaction,
      Err(SessionError::UnsupportedFormat(_)) => {
        println!("Unsupported file format!");
        continue;
      }
      Err(e) => {
        error!("处理 {} 失败: {}", upload.display(), e);
        println!("[error] {}", e);
        continue;
      }
    };

    present(&interaction);
    if let Some(dir) = &args.export {
      export(&interaction, dir);
    }
    records.push(serde_json::to_value(&interaction)?);
  }

  if let Some(path) = &args.report {
    let json = serde_json::to_string_pretty(&records)?;
    std::fs::write(path, json).with_context(|| format!("无法写入报告: {}", path.display()))?;
    info!("报告已写入: {}", path.display());
  }

  Ok(())
}

fn export(interaction: &Interaction, dir: &Path) {
  match interaction.export(dir) {
    Ok(path) => println!("Exported: {}", path.display()),
    Err(e) => warn!("无法导出 {}: {}", interaction.upload, e),
  }
}

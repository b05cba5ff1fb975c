// 该文件是 Lubiao （路标） 项目的一部分。
// src/speech.rs - 语音播报
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

//! 语音播报
//!
//! [`Announcer::announce`] 是同步调用，返回时播放已经结束。
//! 默认实现调用系统自带的语音合成命令：
//!
//! - Linux: `espeak-ng`
//! - macOS: `say`
//! - Windows: PowerShell `System.Speech`

use std::io::Write;
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::{debug, info};

const MAX_TEXT_LEN: usize = 100_000;

#[derive(Error, Debug)]
pub enum SpeechError {
  #[error("播报文本为空")]
  EmptyText,
  #[error("无法执行语音合成程序 {program}: {source}")]
  Spawn {
    program: String,
    source: std::io::Error,
  },
  #[error("语音合成程序 {program} 执行失败: {stderr}")]
  Failed { program: String, stderr: String },
}

pub trait Announcer {
  /// 播报文本，播放结束后返回
  fn announce(&self, text: &str) -> Result<(), SpeechError>;
}

impl<A: Announcer + ?Sized> Announcer for &A {
  fn announce(&self, text: &str) -> Result<(), SpeechError> {
    (**self).announce(text)
  }
}

impl<A: Announcer + ?Sized> Announcer for Box<A> {
  fn announce(&self, text: &str) -> Result<(), SpeechError> {
    (**self).announce(text)
  }
}

/// 不发声，用于 `--mute`
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentAnnouncer;

impl Announcer for SilentAnnouncer {
  fn announce(&self, text: &str) -> Result<(), SpeechError> {
    debug!("静音模式，跳过播报: {}", text);
    Ok(())
  }
}

/// 文本传给程序的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextDelivery {
  /// 作为最后一个参数
  Argument,
  /// 写入标准输入
  Stdin,
}

/// 通过外部命令合成语音
#[derive(Debug, Clone)]
pub struct CommandAnnouncer {
  program: String,
  args: Vec<String>,
  delivery: TextDelivery,
}

impl CommandAnnouncer {
  pub fn new(program: impl Into<String>) -> Self {
    CommandAnnouncer {
      program: program.into(),
      args: Vec::new(),
      delivery: TextDelivery::Argument,
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn delivery(mut self, delivery: TextDelivery) -> Self {
    self.delivery = delivery;
    self
  }

  pub fn program(&self) -> &str {
    &self.program
  }

  #[cfg(target_os = "linux")]
  pub fn system_default() -> Self {
    CommandAnnouncer::new("espeak-ng")
  }

  #[cfg(target_os = "macos")]
  pub fn system_default() -> Self {
    CommandAnnouncer::new("say")
  }

  #[cfg(target_os = "windows")]
  pub fn system_default() -> Self {
    CommandAnnouncer::new("powershell")
      .arg("-NoProfile")
      .arg("-Command")
      .arg(
        "Add-Type -AssemblyName System.Speech; \
         (New-Object System.Speech.Synthesis.SpeechSynthesizer).Speak([Console]::In.ReadToEnd())",
      )
      .delivery(TextDelivery::Stdin)
  }

  #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
  pub fn system_default() -> Self {
    CommandAnnouncer::new("espeak")
  }

  fn command(&self, text: &str) -> Command {
    let mut command = Command::new(&self.program);
    command.args(&self.args);
    if self.delivery == TextDelivery::Argument {
      command.arg(text);
    }
    command
  }
}

/// 去掉控制字符，保留换行
fn sanitize(text: &str) -> String {
  text
    .chars()
    .filter(|c| !c.is_control() || *c == '\n' || *c == '\r')
    .take(MAX_TEXT_LEN)
    .collect()
}

impl Announcer for CommandAnnouncer {
  fn announce(&self, text: &str) -> Result<(), SpeechError> {
    let text = sanitize(text);
    if text.trim().is_empty() {
      return Err(SpeechError::EmptyText);
    }

    info!("播报: {}", text);
    let spawn_err = |source| SpeechError::Spawn {
      program: self.program.clone(),
      source,
    };

    let mut command = self.command(&text);
    command
      .stdout(Stdio::null())
      .stderr(Stdio::piped())
      .stdin(match self.delivery {
        TextDelivery::Argument => Stdio::null(),
        TextDelivery::Stdin => Stdio::piped(),
      });

    let mut child = command.spawn().map_err(spawn_err)?;
    if let Some(mut stdin) = child.stdin.take() {
      stdin.write_all(text.as_bytes()).map_err(spawn_err)?;
    }
    let output = child.wait_with_output().map_err(spawn_err)?;

    if !output.status.success() {
      return Err(SpeechError::Failed {
        program: self.program.clone(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn control_characters_are_dropped() {
    assert_eq!(sanitize("Detected: Stop\u{7}\u{1b}"), "Detected: Stop");
    assert_eq!(sanitize("a\nb"), "a\nb");
  }

  #[test]
  fn text_goes_last_as_argument() {
    let announcer = CommandAnnouncer::new("espeak-ng").arg("-s").arg("150");
    let command = announcer.command("Detected: Stop");
    let args: Vec<_> = command.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
    assert_eq!(args, ["-s", "150", "Detected: Stop"]);
  }

  #[test]
  fn stdin_delivery_keeps_text_out_of_arguments() {
    let announcer = CommandAnnouncer::new("tts").delivery(TextDelivery::Stdin);
    assert_eq!(announcer.command("hello").get_args().count(), 0);
  }

  #[test]
  fn empty_text_is_rejected() {
    assert!(matches!(
      CommandAnnouncer::new("true").announce(" \u{7}"),
      Err(SpeechError::EmptyText)
    ));
  }

  #[cfg(unix)]
  #[test]
  fn exit_status_decides_success() {
    assert!(CommandAnnouncer::new("true").announce("ok").is_ok());
    assert!(matches!(
      CommandAnnouncer::new("false").announce("no"),
      Err(SpeechError::Failed { .. })
    ));
  }

  #[test]
  fn missing_program_fails_to_spawn() {
    let result = CommandAnnouncer::new("lubiao-no-such-tts").announce("hello");
    assert!(matches!(result, Err(SpeechError::Spawn { .. })));
  }
}

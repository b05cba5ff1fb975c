// 该文件是 Lubiao （路标） 项目的一部分。
// src/input/upload.rs - 上传文件的临时存放
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

use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::input::InputError;

pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
pub const VIDEO_EXTENSIONS: [&str; 3] = ["mp4", "avi", "mov"];

const TEMP_DIR_PREFIX: &str = "lubiao-";
const RESULT_PREFIX: &str = "result_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
  Image,
  Video,
}

impl MediaKind {
  /// 按最后一个 `.` 之后的扩展名（不区分大小写）判断类型
  pub fn from_file_name(name: &str) -> Result<Self, InputError> {
    let ext = name.rsplit('.').next().unwrap_or_default().to_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
      Ok(MediaKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
      Ok(MediaKind::Video)
    } else {
      Err(InputError::UnsupportedFormat(name.to_string()))
    }
  }
}

/// 一次交互中的上传文件，存放在独占的临时目录里，析构时连同目录一起删除
#[derive(Debug)]
pub struct UploadedArtifact {
  dir: TempDir,
  path: PathBuf,
  name: String,
  kind: MediaKind,
}

impl UploadedArtifact {
  /// 复制本地文件到新的临时目录
  pub fn materialize(source: impl AsRef<Path>) -> Result<Self, InputError> {
    let source = source.as_ref();
    let name = source
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .ok_or_else(|| InputError::UnsupportedFormat(source.display().to_string()))?;
    let kind = MediaKind::from_file_name(&name)?;

    let dir = Self::temp_dir()?;
    let path = dir.path().join(&name);
    let size = std::fs::copy(source, &path)?;
    info!("上传文件已保存: {} ({} 字节)", path.display(), size);

    Ok(UploadedArtifact {
      dir,
      path,
      name,
      kind,
    })
  }

  /// 将内存中的上传内容写入新的临时目录
  pub fn from_bytes(name: &str, bytes: &[u8]) -> Result<Self, InputError> {
    let name = Path::new(name)
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .ok_or_else(|| InputError::UnsupportedFormat(name.to_string()))?;
    let kind = MediaKind::from_file_name(&name)?;

    let dir = Self::temp_dir()?;
    let path = dir.path().join(&name);
    std::fs::write(&path, bytes)?;
    info!("上传文件已保存: {} ({} 字节)", path.display(), bytes.len());

    Ok(UploadedArtifact {
      dir,
      path,
      name,
      kind,
    })
  }

  fn temp_dir() -> Result<TempDir, InputError> {
    let dir = tempfile::Builder::new().prefix(TEMP_DIR_PREFIX).tempdir()?;
    debug!("创建临时目录: {}", dir.path().display());
    Ok(dir)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn kind(&self) -> MediaKind {
    self.kind
  }

  pub fn dir(&self) -> &Path {
    self.dir.path()
  }

  /// 视频结果文件位置：同一临时目录下的 `result_<原文件名>`
  pub fn result_path(&self) -> PathBuf {
    self.dir.path().join(format!("{}{}", RESULT_PREFIX, self.name))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn classifies_by_last_extension() {
    assert_eq!(MediaKind::from_file_name("a.JPG").unwrap(), MediaKind::Image);
    assert_eq!(MediaKind::from_file_name("a.tar.png").unwrap(), MediaKind::Image);
    assert_eq!(MediaKind::from_file_name("clip.Mov").unwrap(), MediaKind::Video);
    assert!(matches!(
      MediaKind::from_file_name("notes.txt"),
      Err(InputError::UnsupportedFormat(_))
    ));
    assert!(MediaKind::from_file_name("png.gif").is_err());
  }

  #[test]
  fn materialize_copies_into_private_dir() {
    let src_dir = tempfile::tempdir().unwrap();
    let src = src_dir.path().join("sign.png");
    std::fs::write(&src, b"not really a png").unwrap();

    let artifact = UploadedArtifact::materialize(&src).unwrap();
    assert_eq!(artifact.kind(), MediaKind::Image);
    assert_eq!(artifact.name(), "sign.png");
    assert_ne!(artifact.dir(), src_dir.path());
    assert_eq!(std::fs::read(artifact.path()).unwrap(), b"not really a png");
    assert_eq!(artifact.result_path(), artifact.dir().join("result_sign.png"));
  }

  #[test]
  fn temp_dir_is_removed_on_drop() {
    let artifact = UploadedArtifact::from_bytes("clip.mp4", b"\0\0").unwrap();
    let dir = artifact.dir().to_path_buf();
    assert!(dir.exists());
    drop(artifact);
    assert!(!dir.exists());
  }

  #[test]
  fn unsupported_upload_is_not_stored() {
    let err = UploadedArtifact::from_bytes("readme.txt", b"hello").unwrap_err();
    assert!(matches!(err, InputError::UnsupportedFormat(name) if name == "readme.txt"));
  }
}

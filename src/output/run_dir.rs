// 该文件是 Lubiao （路标） 项目的一部分。
// src/output/run_dir.rs - 运行输出目录
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

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

const DEFAULT_RUNS_ROOT: &str = "runs/detect";
const RUN_NAME: &str = "predict";
const MAX_RUNS: u32 = 100_000;

#[derive(Error, Debug)]
pub enum RunDirError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("运行目录已用尽: {0}")]
  Exhausted(PathBuf),
}

/// 运行目录的根，例如 `runs/detect`
#[derive(Debug, Clone)]
pub struct RunsRoot {
  root: PathBuf,
}

impl Default for RunsRoot {
  fn default() -> Self {
    RunsRoot::new(DEFAULT_RUNS_ROOT)
  }
}

impl RunsRoot {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    RunsRoot { root: root.into() }
  }

  pub fn path(&self) -> &Path {
    &self.root
  }

  /// 分配新的运行目录：`predict`, `predict2`, `predict3` ...
  ///
  /// 目录通过 `create_dir` 原子创建，已存在则顺延，因此并发调用也不会拿到同一目录。
  pub fn allocate(&self) -> Result<RunDirectory, RunDirError> {
    std::fs::create_dir_all(&self.root)?;

    for n in 1..=MAX_RUNS {
      let name = if n == 1 {
        RUN_NAME.to_string()
      } else {
        format!("{}{}", RUN_NAME, n)
      };
      let path = self.root.join(name);
      match std::fs::create_dir(&path) {
        Ok(()) => {
          debug!("分配运行目录: {}", path.display());
          return Ok(RunDirectory { path });
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
        Err(e) => return Err(e.into()),
      }
    }

    Err(RunDirError::Exhausted(self.root.clone()))
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
  path: PathBuf,
}

impl RunDirectory {
  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn artifact_path(&self, file_name: &str) -> PathBuf {
    self.path.join(file_name)
  }
}

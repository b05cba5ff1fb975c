// 该文件是 Lubiao （路标） 项目的一部分。
// src/model/labels.rs - 类别名称表
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

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

pub const UNKNOWN_LABEL: &str = "unknown";

const TRAFFIC_SIGN_LABELS: &str = include_str!("../../labels/traffic_signs.toml");

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("类别表解析错误: {0}")]
  ParseError(#[from] toml::de::Error),
  #[error("类别表为空")]
  Empty,
}

#[derive(Deserialize)]
struct LabelFile {
  names: Vec<String>,
}

/// 类别编号到名称的映射，编号即数组下标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassNameTable {
  names: Vec<String>,
}

impl ClassNameTable {
  pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
    ClassNameTable {
      names: names.into_iter().map(Into::into).collect(),
    }
  }

  pub fn empty() -> &'static ClassNameTable {
    static EMPTY: ClassNameTable = ClassNameTable { names: Vec::new() };
    &EMPTY
  }

  /// 随程序分发的交通标志类别表
  pub fn traffic_signs() -> Self {
    Self::from_toml_str(TRAFFIC_SIGN_LABELS).expect("无法加载内置的类别表")
  }

  pub fn from_toml_str(content: &str) -> Result<Self, LabelError> {
    let file: LabelFile = toml::from_str(content)?;
    if file.names.is_empty() {
      return Err(LabelError::Empty);
    }
    debug!("类别数量: {}", file.names.len());
    Ok(ClassNameTable { names: file.names })
  }

  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LabelError> {
    let path = path.as_ref();
    info!("加载类别表: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    Self::from_toml_str(&content)
  }

  /// 越界编号解析为 [`UNKNOWN_LABEL`]
  pub fn resolve(&self, class_id: u32) -> &str {
    self
      .names
      .get(class_id as usize)
      .map(String::as_str)
      .unwrap_or(UNKNOWN_LABEL)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bundled_table_loads() {
    let table = ClassNameTable::traffic_signs();
    assert_eq!(table.len(), 15);
    assert_eq!(table.resolve(0), "Green Light");
    assert_eq!(table.resolve(14), "Stop");
  }

  #[test]
  fn out_of_range_resolves_to_unknown() {
    let table = ClassNameTable::new(["stop", "yield"]);
    assert_eq!(table.resolve(1), "yield");
    assert_eq!(table.resolve(2), UNKNOWN_LABEL);
    assert_eq!(ClassNameTable::empty().resolve(0), UNKNOWN_LABEL);
  }

  #[test]
  fn rejects_empty_or_malformed_tables() {
    assert!(matches!(
      ClassNameTable::from_toml_str("names = []"),
      Err(LabelError::Empty)
    ));
    assert!(matches!(
      ClassNameTable::from_toml_str("labels = 3"),
      Err(LabelError::ParseError(_))
    ));
  }

  #[test]
  fn loads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("labels.toml");
    std::fs::write(&path, "names = [\"stop\", \"yield\"]\n").unwrap();
    let table = ClassNameTable::from_file(&path).unwrap();
    assert_eq!(table, ClassNameTable::new(["stop", "yield"]));
  }
}

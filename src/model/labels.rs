// 该文件是 Lispa （叶片病虫害识别） 项目的一部分。
// src/model/labels.rs - 类别标签
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

use std::{path::Path, sync::LazyLock};

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

static METADATA_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r#"(\d+)\s*:\s*['"]([^'"]*)['"]"#).expect("标签正则表达式无效")
});

#[derive(Error, Debug)]
pub enum LabelsError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签文件格式错误: {0}")]
  ParseError(#[from] toml::de::Error),
}

/// 类别编号到名称的映射
///
/// 标签文件格式：
///
/// ```toml
/// names = ["pulgão", "lagarta", "mosca-branca"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Labels {
  names: Vec<String>,
}

impl Labels {
  pub fn new(names: Vec<String>) -> Self {
    Self { names }
  }

  pub fn from_toml_str(content: &str) -> Result<Self, LabelsError> {
    Ok(toml::from_str(content)?)
  }

  pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, LabelsError> {
    let content = std::fs::read_to_string(path)?;
    Self::from_toml_str(&content)
  }

  /// 解析 Ultralytics 导出的 ONNX 元数据，例如 `{0: 'aphid', 1: 'whitefly'}`
  pub fn from_ultralytics_metadata(names: &str) -> Option<Self> {
    let mut entries: Vec<(usize, String)> = METADATA_ENTRY
      .captures_iter(names)
      .filter_map(|cap| Some((cap[1].parse().ok()?, cap[2].to_string())))
      .collect();
    if entries.is_empty() {
      return None;
    }

    entries.sort_by_key(|(id, _)| *id);
    let len = entries.last().map(|(id, _)| id + 1).unwrap_or(0);
    let mut labels: Vec<String> = (0..len).map(fallback_name).collect();
    for (id, name) in entries {
      labels[id] = name;
    }
    Some(Self { names: labels })
  }

  pub fn name(&self, class_id: usize) -> String {
    self
      .names
      .get(class_id)
      .cloned()
      .unwrap_or_else(|| fallback_name(class_id))
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}

fn fallback_name(class_id: usize) -> String {
  format!("classe_{}", class_id)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn toml_labels_are_indexed_by_position() {
    let labels = Labels::from_toml_str(r#"names = ["pulgão", "lagarta"]"#).unwrap();
    assert_eq!(labels.len(), 2);
    assert_eq!(labels.name(1), "lagarta");
    assert_eq!(labels.name(7), "classe_7");
  }

  #[test]
  fn malformed_toml_is_an_error() {
    assert!(matches!(
      Labels::from_toml_str("names = 3"),
      Err(LabelsError::ParseError(_))
    ));
  }

  #[test]
  fn ultralytics_metadata_is_parsed() {
    let labels =
      Labels::from_ultralytics_metadata("{0: 'Early_blight', 2: \"Late_blight\"}").unwrap();
    assert_eq!(labels.name(0), "Early_blight");
    assert_eq!(labels.name(1), "classe_1");
    assert_eq!(labels.name(2), "Late_blight");
  }

  #[test]
  fn metadata_without_entries_is_ignored() {
    assert_eq!(Labels::from_ultralytics_metadata("{}"), None);
  }
}

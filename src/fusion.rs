// 该文件是 Lispa （叶片病虫害识别） 项目的一部分。
// src/fusion.rs - 多模型检测结果融合与置信度过滤
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

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::model::{DetectionBatch, Finding};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
#[error("置信度阈值必须位于 [0, 1] 区间内, 实际为 {0}")]
pub struct InvalidThreshold(pub f32);

/// 进入建议环节的置信度下限
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct ConfidenceThreshold(f32);

impl ConfidenceThreshold {
  pub fn new(value: f32) -> Result<Self, InvalidThreshold> {
    if (0.0..=1.0).contains(&value) {
      Ok(Self(value))
    } else {
      Err(InvalidThreshold(value))
    }
  }

  pub fn value(self) -> f32 {
    self.0
  }
}

impl Default for ConfidenceThreshold {
  fn default() -> Self {
    Self(DEFAULT_CONFIDENCE_THRESHOLD)
  }
}

impl fmt::Display for ConfidenceThreshold {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:.2}", self.0)
  }
}

impl std::str::FromStr for ConfidenceThreshold {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let value: f32 = s.parse().map_err(|e| format!("{}", e))?;
    Self::new(value).map_err(|e| e.to_string())
  }
}

/// 所有成功检测器的结果，按检测器注册顺序、批内顺序排列
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AggregatedFindings {
  items: Vec<Finding>,
}

impl AggregatedFindings {
  pub fn iter(&self) -> std::slice::Iter<'_, Finding> {
    self.items.iter()
  }

  pub fn as_slice(&self) -> &[Finding] {
    &self.items
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  /// 出现过的来源，保持首次出现的顺序
  pub fn origins(&self) -> Vec<&str> {
    let mut origins: Vec<&str> = Vec::new();
    for origin in self.items.iter().filter_map(Finding::origin) {
      if !origins.contains(&origin) {
        origins.push(origin);
      }
    }
    origins
  }
}

impl FromIterator<Finding> for AggregatedFindings {
  fn from_iter<I: IntoIterator<Item = Finding>>(iter: I) -> Self {
    Self {
      items: iter.into_iter().collect(),
    }
  }
}

impl IntoIterator for AggregatedFindings {
  type Item = Finding;
  type IntoIter = std::vec::IntoIter<Finding>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.into_iter()
  }
}

impl<'a> IntoIterator for &'a AggregatedFindings {
  type Item = &'a Finding;
  type IntoIter = std::slice::Iter<'a, Finding>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.iter()
  }
}

/// 合并多个检测批次，没有来源标记的结果补上所属批次的来源
pub fn aggregate<I>(batches: I) -> AggregatedFindings
where
  I: IntoIterator<Item = DetectionBatch>,
{
  batches
    .into_iter()
    .flat_map(|batch| {
      let (origin, items) = batch.into_parts();
      items.into_iter().map(move |finding| {
        if finding.origin().is_some() {
          finding
        } else {
          finding.with_origin(origin.clone())
        }
      })
    })
    .collect()
}

/// 保留置信度不低于阈值的结果，保持原有顺序
pub fn filter(findings: &AggregatedFindings, threshold: ConfidenceThreshold) -> AggregatedFindings {
  findings
    .iter()
    .filter(|f| f.confidence().value() >= threshold.value())
    .cloned()
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Confidence;

  fn finding(label: &str, confidence: f32) -> Finding {
    Finding::new(label, Confidence::new(confidence).unwrap())
  }

  fn sample_batches() -> Vec<DetectionBatch> {
    vec![
      DetectionBatch::new(
        "Praga",
        vec![finding("pulgão", 0.91), finding("lagarta", 0.42)],
      ),
      DetectionBatch::new(
        "Doença",
        vec![finding("requeima", 0.5), finding("mancha", 0.49)],
      ),
    ]
  }

  #[test]
  fn threshold_validation() {
    assert!(ConfidenceThreshold::new(0.0).is_ok());
    assert!(ConfidenceThreshold::new(1.0).is_ok());
    assert!(ConfidenceThreshold::new(1.5).is_err());
    assert!(ConfidenceThreshold::new(f32::NAN).is_err());
    assert_eq!(ConfidenceThreshold::default().value(), 0.5);
    assert!("0.7".parse::<ConfidenceThreshold>().is_ok());
    assert!("-1".parse::<ConfidenceThreshold>().is_err());
    assert!("abc".parse::<ConfidenceThreshold>().is_err());
  }

  #[test]
  fn aggregate_tags_origin_and_preserves_order() {
    let findings = aggregate(sample_batches());
    let got: Vec<_> = findings
      .iter()
      .map(|f| (f.origin().unwrap(), f.label()))
      .collect();
    assert_eq!(
      got,
      vec![
        ("Praga", "pulgão"),
        ("Praga", "lagarta"),
        ("Doença", "requeima"),
        ("Doença", "mancha"),
      ]
    );
    assert_eq!(findings.origins(), vec!["Praga", "Doença"]);
  }

  #[test]
  fn aggregate_keeps_existing_origin() {
    let batch = DetectionBatch::new("Doença", vec![finding("x", 0.9).with_origin("Praga")]);
    let findings = aggregate(vec![batch]);
    assert_eq!(findings.as_slice()[0].origin(), Some("Praga"));
  }

  #[test]
  fn aggregate_of_nothing_is_empty() {
    assert!(aggregate(Vec::new()).is_empty());
    assert!(aggregate(vec![DetectionBatch::empty("Praga")]).is_empty());
  }

  #[test]
  fn filter_is_inclusive_and_order_preserving() {
    let findings = aggregate(sample_batches());
    let kept = filter(&findings, ConfidenceThreshold::default());
    let labels: Vec<_> = kept.iter().map(Finding::label).collect();
    assert_eq!(labels, vec!["pulgão", "requeima"]);
  }

  #[test]
  fn filter_matches_definition_for_many_thresholds() {
    let findings = aggregate(sample_batches());
    for step in 0..=20 {
      let t = ConfidenceThreshold::new(step as f32 / 20.0).unwrap();
      let expected: Vec<Finding> = findings
        .iter()
        .filter(|f| f.confidence().value() >= t.value())
        .cloned()
        .collect();
      assert_eq!(filter(&findings, t).as_slice(), expected.as_slice());
    }
  }

  #[test]
  fn threshold_edges() {
    let findings = aggregate(vec![DetectionBatch::new(
      "Praga",
      vec![finding("a", 0.0), finding("b", 1.0), finding("c", 0.99)],
    )]);
    let all = filter(&findings, ConfidenceThreshold::new(0.0).unwrap());
    assert_eq!(all.len(), 3);
    let perfect = filter(&findings, ConfidenceThreshold::new(1.0).unwrap());
    assert_eq!(perfect.len(), 1);
    assert_eq!(perfect.as_slice()[0].label(), "b");
  }

  #[test]
  fn filtering_distributes_over_batches() {
    for step in 0..=10 {
      let t = ConfidenceThreshold::new(step as f32 / 10.0).unwrap();
      let together = filter(&aggregate(sample_batches()), t);
      let separately: AggregatedFindings = sample_batches()
        .into_iter()
        .flat_map(|batch| filter(&aggregate(vec![batch]), t))
        .collect();
      assert_eq!(together, separately);
    }
  }
}

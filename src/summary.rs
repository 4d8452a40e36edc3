// 该文件是 Lispa （叶片病虫害识别） 项目的一部分。
// src/summary.rs - 检测证据摘要与建议请求文本
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

use serde::Serialize;

use crate::{
  fusion::{AggregatedFindings, ConfidenceThreshold},
  model::Finding,
};

pub const DEFAULT_MAX_TREATMENTS: usize = 3;
pub const DEFAULT_CROP: &str = "tomate";

const UNKNOWN_ORIGIN: &str = "Desconhecida";

/// 渲染后的检测证据，每个结果一行
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EvidenceSummary {
  lines: Vec<String>,
}

impl EvidenceSummary {
  pub fn lines(&self) -> &[String] {
    &self.lines
  }

  pub fn len(&self) -> usize {
    self.lines.len()
  }

  pub fn is_empty(&self) -> bool {
    self.lines.is_empty()
  }

  pub fn join(&self, separator: &str) -> String {
    self.lines.join(separator)
  }
}

pub fn render_line(finding: &Finding) -> String {
  format!(
    "Origem {} (Tipo: {}) (Confiança: {})",
    finding.origin().unwrap_or(UNKNOWN_ORIGIN),
    finding.label(),
    finding.confidence()
  )
}

/// 逐条渲染，不截断
pub fn summarize(findings: &AggregatedFindings) -> EvidenceSummary {
  EvidenceSummary {
    lines: findings.iter().map(render_line).collect(),
  }
}

/// 发送给建议代理的用户消息模板
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
  pub crop: String,
  pub max_treatments: usize,
}

impl Default for PromptTemplate {
  fn default() -> Self {
    Self {
      crop: DEFAULT_CROP.to_string(),
      max_treatments: DEFAULT_MAX_TREATMENTS,
    }
  }
}

impl PromptTemplate {
  pub fn render(
    &self,
    summary: &EvidenceSummary,
    origins: &[&str],
    threshold: ConfidenceThreshold,
  ) -> String {
    let models = if origins.is_empty() {
      String::new()
    } else {
      format!(" ({})", origins.join(" e "))
    };

    format!(
      "Com base na imagem de {crop} que enviei, os modelos de Visão Computacional{models} \
       detectaram os seguintes problemas combinados: {evidence}.\n\n\
       Por favor, analise essas detecções. Como agrônomo, me forneça **no máximo {max} \
       recomendações** de tratamento para esses problemas combinados, usando sua ferramenta \
       de busca se necessário, considerando apenas confianças acima ou igual a \"{threshold}\".",
      crop = self.crop,
      models = models,
      evidence = summary.join("; "),
      max = self.max_treatments,
      threshold = threshold,
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    fusion::aggregate,
    model::{Confidence, DetectionBatch},
  };

  fn findings() -> AggregatedFindings {
    aggregate(vec![
      DetectionBatch::new(
        "Praga",
        vec![Finding::new("pulgão", Confidence::new(0.724).unwrap())],
      ),
      DetectionBatch::new(
        "Doença",
        vec![Finding::new("requeima", Confidence::new(0.5).unwrap())],
      ),
    ])
  }

  #[test]
  fn lines_use_two_decimal_confidence() {
    let summary = summarize(&findings());
    assert_eq!(
      summary.lines(),
      &[
        "Origem Praga (Tipo: pulgão) (Confiança: 0.72)".to_string(),
        "Origem Doença (Tipo: requeima) (Confiança: 0.50)".to_string(),
      ]
    );
  }

  #[test]
  fn summary_is_deterministic_and_length_preserving() {
    let f = findings();
    assert_eq!(summarize(&f), summarize(&f.clone()));
    assert_eq!(summarize(&f).len(), f.len());
    assert!(summarize(&AggregatedFindings::default()).is_empty());
  }

  #[test]
  fn large_inputs_are_not_truncated() {
    let many = aggregate(vec![DetectionBatch::new(
      "Praga",
      (0..500)
        .map(|i| Finding::new(format!("p{}", i), Confidence::new(0.9).unwrap()))
        .collect(),
    )]);
    assert_eq!(summarize(&many).len(), 500);
  }

  #[test]
  fn prompt_embeds_evidence_cap_and_threshold() {
    let f = findings();
    let prompt = PromptTemplate::default().render(
      &summarize(&f),
      &f.origins(),
      ConfidenceThreshold::default(),
    );
    assert!(prompt.contains("imagem de tomate"));
    assert!(prompt.contains("(Praga e Doença)"));
    assert!(prompt.contains(
      "Origem Praga (Tipo: pulgão) (Confiança: 0.72); Origem Doença (Tipo: requeima) (Confiança: 0.50)."
    ));
    assert!(prompt.contains("**no máximo 3 recomendações**"));
    assert!(prompt.contains("\"0.50\""));
  }
}

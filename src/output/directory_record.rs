// 该文件是 Lispa （叶片病虫害识别） 项目的一部分。
// src/output/directory_record.rs - 按日期归档分析记录
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

use chrono::{DateTime, Datelike, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::ImageFrame,
  fusion::AggregatedFindings,
  output::{Render, draw::Draw},
  pipeline::{Analysis, AnalysisOutcome},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("字体错误: {0}")]
  FontError(#[from] ab_glyph::InvalidFont),
}

/// 与标注图像一同保存的 JSON 报告
#[derive(Debug, Serialize)]
pub struct AnalysisReport<'a> {
  pub source: &'a str,
  pub image: String,
  pub created_at: DateTime<Utc>,
  pub findings: &'a AggregatedFindings,
  pub failed_detectors: Vec<String>,
  pub outcome: &'a AnalysisOutcome,
}

/// 目录记录输出，`folder:<目录>[?always]`
///
/// 记录写入 `<目录>/<年>/<月>/<日>/<时-分-秒>-<序号>.{png,json}`；
/// 默认只记录有检测结果的图像，带 `always` 参数时全部记录。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw<'static>,
  counter: Mutex<u16>,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");
    let path = urlencoding::decode(uri.path())
      .map(|p| p.into_owned())
      .unwrap_or_else(|_| uri.path().to_string());

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(path),
      draw: Draw::new()?,
      counter: Mutex::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  fn record_id(&self) -> u16 {
    let mut counter = self.counter.lock();
    *counter = counter.wrapping_add(1);
    *counter
  }

  fn record_path(&self, now: DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.record_id()
    )))
  }
}

impl Render<ImageFrame, Analysis> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &ImageFrame, result: &Analysis) -> Result<(), Self::Error> {
    if !self.always && result.findings.is_empty() {
      debug!("{} 没有检测结果, 跳过记录", frame.source());
      return Ok(());
    }

    let now = Utc::now();
    let path = self.record_path(now)?;

    let mut image = frame.image().clone();
    self.draw.draw_findings(&mut image, &result.findings);
    image.save(&path)?;

    let report = AnalysisReport {
      source: &result.source,
      image: path.display().to_string(),
      created_at: now,
      findings: &result.findings,
      failed_detectors: result.failures.iter().map(|e| e.to_string()).collect(),
      outcome: &result.outcome,
    };
    std::fs::write(
      path.with_extension("json"),
      serde_json::to_vec_pretty(&report)?,
    )?;

    info!("分析记录已保存: {}", path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    fusion::aggregate,
    model::{Confidence, DetectionBatch, Finding},
  };
  use image::RgbImage;

  fn analysis(findings: AggregatedFindings) -> Analysis {
    Analysis {
      source: "folha.jpg".to_string(),
      findings,
      failures: Vec::new(),
      outcome: AnalysisOutcome::NoActionableFindings,
    }
  }

  fn files(dir: &std::path::Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
      for entry in std::fs::read_dir(d).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          stack.push(path);
        } else {
          out.push(path);
        }
      }
    }
    out
  }

  #[test]
  fn writes_png_and_json_report() {
    let dir = tempfile::tempdir().unwrap();
    let url = url::Url::parse(&format!("folder:{}", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();

    let findings = aggregate(vec![DetectionBatch::new(
      "Praga",
      vec![Finding::new("pulgão", Confidence::new(0.3).unwrap()).with_region([0.1, 0.1, 0.5, 0.5])],
    )]);
    let frame = ImageFrame::new("folha.jpg", RgbImage::new(64, 64));
    output.render_result(&frame, &analysis(findings)).unwrap();

    let written = files(dir.path());
    assert_eq!(written.len(), 2);
    let json = written
      .iter()
      .find(|p| p.extension().is_some_and(|e| e == "json"))
      .unwrap();
    let report: serde_json::Value =
      serde_json::from_slice(&std::fs::read(json).unwrap()).unwrap();
    assert_eq!(report["source"], "folha.jpg");
    assert_eq!(report["findings"][0]["label"], "pulgão");
    assert_eq!(report["outcome"]["kind"], "no_actionable_findings");
  }

  #[test]
  fn empty_results_are_skipped_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let frame = ImageFrame::new("folha.jpg", RgbImage::new(8, 8));

    let url = url::Url::parse(&format!("folder:{}", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    output
      .render_result(&frame, &analysis(AggregatedFindings::default()))
      .unwrap();
    assert!(files(dir.path()).is_empty());

    let url = url::Url::parse(&format!("folder:{}?always", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    output
      .render_result(&frame, &analysis(AggregatedFindings::default()))
      .unwrap();
    assert_eq!(files(dir.path()).len(), 2);
  }
}

// 该文件是 Lispa （叶片病虫害识别） 项目的一部分。
// src/model.rs - 检测模型与检测结果定义
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

use std::{fmt, sync::Arc, time::Duration};

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

mod labels;
mod postprocess;
#[cfg(feature = "model_onnx")]
mod yolo_onnx;

pub use self::labels::{Labels, LabelsError};
pub use self::postprocess::{Candidate, decode_dense, decode_end2end, iou, nms};
#[cfg(feature = "model_onnx")]
pub use self::yolo_onnx::{OnnxYolo, OnnxYoloBuilder, OnnxYoloError};

#[derive(Error, Debug, Clone, Copy, PartialEq)]
#[error("置信度必须位于 [0, 1] 区间内, 实际为 {0}")]
pub struct InvalidConfidence(pub f32);

/// 检测置信度，取值范围 [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Confidence(f32);

impl Confidence {
  pub fn new(value: f32) -> Result<Self, InvalidConfidence> {
    // NaN 不在任何区间内，这里一并拒绝
    if (0.0..=1.0).contains(&value) {
      Ok(Self(value))
    } else {
      Err(InvalidConfidence(value))
    }
  }

  pub fn value(self) -> f32 {
    self.0
  }
}

impl TryFrom<f32> for Confidence {
  type Error = InvalidConfidence;

  fn try_from(value: f32) -> Result<Self, Self::Error> {
    Self::new(value)
  }
}

impl fmt::Display for Confidence {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:.2}", self.0)
  }
}

/// 单个检测结果
///
/// 由检测器产生后不再修改；来源 `origin` 在聚合阶段之前补齐。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
  origin: Option<String>,
  label: String,
  confidence: Confidence,
  region: Option<[f32; 4]>, // 归一化坐标 [x_min, y_min, x_max, y_max]
}

impl Finding {
  pub fn new(label: impl Into<String>, confidence: Confidence) -> Self {
    Self {
      origin: None,
      label: label.into(),
      confidence,
      region: None,
    }
  }

  pub fn with_region(mut self, bbox: [f32; 4]) -> Self {
    self.region = Some(bbox);
    self
  }

  pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
    self.origin = Some(origin.into());
    self
  }

  pub fn origin(&self) -> Option<&str> {
    self.origin.as_deref()
  }

  pub fn label(&self) -> &str {
    &self.label
  }

  pub fn confidence(&self) -> Confidence {
    self.confidence
  }

  pub fn region(&self) -> Option<[f32; 4]> {
    self.region
  }
}

/// 单个检测器一次调用的结果
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionBatch {
  origin: String,
  items: Vec<Finding>,
}

impl DetectionBatch {
  pub fn new(origin: impl Into<String>, items: Vec<Finding>) -> Self {
    Self {
      origin: origin.into(),
      items,
    }
  }

  pub fn empty(origin: impl Into<String>) -> Self {
    Self::new(origin, Vec::new())
  }

  pub fn origin(&self) -> &str {
    &self.origin
  }

  pub fn findings(&self) -> &[Finding] {
    &self.items
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn into_parts(self) -> (String, Vec<Finding>) {
    (self.origin, self.items)
  }
}

#[derive(Error, Debug, Clone)]
pub enum DetectorError {
  #[error("检测器 {name} 不可用: {reason}")]
  ModelUnavailable { name: String, reason: String },
  #[error("检测器 {name} 推理失败: {reason}")]
  Inference { name: String, reason: String },
  #[error("检测器 {name} 推理超时 ({after:?})")]
  Timeout { name: String, after: Duration },
}

impl DetectorError {
  pub fn unavailable(name: &str, reason: impl fmt::Display) -> Self {
    DetectorError::ModelUnavailable {
      name: name.to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn inference(name: &str, reason: impl fmt::Display) -> Self {
    DetectorError::Inference {
      name: name.to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn name(&self) -> &str {
    match self {
      DetectorError::ModelUnavailable { name, .. }
      | DetectorError::Inference { name, .. }
      | DetectorError::Timeout { name, .. } => name,
    }
  }
}

/// 检测器适配接口
///
/// 每个实现包装一个检测模型。模型加载失败应在构建阶段报告，
/// 而不是在每次 `detect` 时报告。
pub trait Detector: Send + Sync {
  fn name(&self) -> &str;

  fn detect(&self, image: &RgbImage) -> Result<DetectionBatch, DetectorError>;
}

/// 已加载的检测器列表，按注册顺序排列
#[derive(Default, Clone)]
pub struct DetectorRegistry {
  detectors: Vec<Arc<dyn Detector>>,
  unavailable: Vec<DetectorError>,
}

impl fmt::Debug for DetectorRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DetectorRegistry")
      .field(
        "detectors",
        &self.detectors.iter().map(|d| d.name()).collect::<Vec<_>>(),
      )
      .field("unavailable", &self.unavailable)
      .finish()
  }
}

impl DetectorRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(mut self, detector: Arc<dyn Detector>) -> Self {
    self.push(Ok(detector));
    self
  }

  /// 登记一次模型加载的结果；失败的检测器在整个进程生命周期内都不再重试
  pub fn push(&mut self, loaded: Result<Arc<dyn Detector>, DetectorError>) {
    match loaded {
      Ok(detector) => {
        info!("检测器 {} 加载成功", detector.name());
        self.detectors.push(detector);
      }
      Err(e) => {
        error!("检测器加载失败: {}", e);
        self.unavailable.push(e);
      }
    }
  }

  /// 根据 URL 加载全部检测器
  pub fn load(urls: &[Url]) -> Self {
    let mut registry = Self::new();
    for url in urls {
      registry.push(load_detector(url));
    }
    registry
  }

  pub fn detectors(&self) -> &[Arc<dyn Detector>] {
    &self.detectors
  }

  pub fn unavailable(&self) -> &[DetectorError] {
    &self.unavailable
  }

  pub fn len(&self) -> usize {
    self.detectors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.detectors.is_empty()
  }
}

fn load_detector(url: &Url) -> Result<Arc<dyn Detector>, DetectorError> {
  #[cfg(feature = "model_onnx")]
  {
    use crate::{FromUrl, FromUrlWithScheme};

    if url.scheme() == OnnxYoloBuilder::SCHEME {
      let builder = OnnxYoloBuilder::from_url(url)
        .map_err(|e| DetectorError::unavailable(url.as_str(), e))?;
      let name = builder.name().to_string();
      let detector = builder
        .build()
        .map_err(|e| DetectorError::unavailable(&name, e))?;
      return Ok(Arc::new(detector));
    }
  }

  Err(DetectorError::unavailable(
    url.as_str(),
    format!("不支持的模型方案: {}", url.scheme()),
  ))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn confidence_rejects_out_of_range_values() {
    assert!(Confidence::new(0.0).is_ok());
    assert!(Confidence::new(1.0).is_ok());
    assert_eq!(Confidence::new(1.01), Err(InvalidConfidence(1.01)));
    assert!(Confidence::new(-0.1).is_err());
    assert!(Confidence::new(f32::NAN).is_err());
  }

  #[test]
  fn confidence_displays_two_decimals() {
    let c = Confidence::new(0.724).unwrap();
    assert_eq!(c.to_string(), "0.72");
    let c = Confidence::new(0.5).unwrap();
    assert_eq!(c.to_string(), "0.50");
  }

  #[test]
  fn unknown_scheme_is_reported_unavailable() {
    let url = Url::parse("tflite:///models/agro.tflite").unwrap();
    let registry = DetectorRegistry::load(&[url]);
    assert!(registry.is_empty());
    assert_eq!(registry.unavailable().len(), 1);
    assert!(matches!(
      registry.unavailable()[0],
      DetectorError::ModelUnavailable { .. }
    ));
  }
}

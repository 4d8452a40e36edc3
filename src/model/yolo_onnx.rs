// 该文件是 Lispa （叶片病虫害识别） 项目的一部分。
// src/model/yolo_onnx.rs - 基于 ONNX Runtime 的 YOLO 检测器
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

use image::RgbImage;
use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor,
};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNchwTensor,
  model::{
    Confidence, DetectionBatch, Detector, DetectorError, Finding, Labels, LabelsError,
    postprocess::{decode_dense, decode_end2end, nms},
  },
};

const YOLO_INPUT_SIZE: u32 = 640;
const YOLO_OBJECT_THRESH: f32 = 0.25;
const YOLO_NMS_THRESH: f32 = 0.45;
const YOLO_MAX_DETECTIONS: usize = 300;
const END2END_ROW_SIZE: i64 = 6;

#[derive(Error, Debug)]
pub enum OnnxYoloError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("参数 {key} 的值无效: {value}")]
  InvalidParameter { key: String, value: String },
  #[error("模型文件不存在: {0}")]
  ModelNotFound(PathBuf),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("标签错误: {0}")]
  LabelsError(#[from] LabelsError),
  #[error("模型输出形状无法识别: {0:?}")]
  UnexpectedOutput(Vec<i64>),
}

/// 从 URL 构建检测器，例如
/// `onnx:models/agro.onnx?name=Praga&labels=models/agro.toml&size=640&conf=0.25&iou=0.45&max=300`
#[derive(Debug, Clone)]
pub struct OnnxYoloBuilder {
  name: String,
  model_path: PathBuf,
  labels_path: Option<PathBuf>,
  input_size: u32,
  conf_threshold: f32,
  iou_threshold: f32,
  max_detections: usize,
}

impl FromUrlWithScheme for OnnxYoloBuilder {
  const SCHEME: &'static str = "onnx";
}

fn parse_param<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, OnnxYoloError> {
  value.parse().map_err(|_| OnnxYoloError::InvalidParameter {
    key: key.to_string(),
    value: value.to_string(),
  })
}

impl FromUrl for OnnxYoloBuilder {
  type Error = OnnxYoloError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxYoloError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let path = urlencoding::decode(url.path())
      .map(|p| p.into_owned())
      .unwrap_or_else(|_| url.path().to_string());
    let model_path = PathBuf::from(path);

    let mut builder = OnnxYoloBuilder {
      name: model_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "detector".to_string()),
      model_path,
      labels_path: None,
      input_size: YOLO_INPUT_SIZE,
      conf_threshold: YOLO_OBJECT_THRESH,
      iou_threshold: YOLO_NMS_THRESH,
      max_detections: YOLO_MAX_DETECTIONS,
    };

    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "name" => builder.name = v.into_owned(),
        "labels" => builder.labels_path = Some(PathBuf::from(v.as_ref())),
        "size" => builder.input_size = parse_param(&k, &v)?,
        "conf" => builder.conf_threshold = parse_param(&k, &v)?,
        "iou" => builder.iou_threshold = parse_param(&k, &v)?,
        "max" => builder.max_detections = parse_param(&k, &v)?,
        other => warn!("忽略未知的模型参数: {}", other),
      }
    }

    if builder.input_size == 0 {
      return Err(OnnxYoloError::InvalidParameter {
        key: "size".to_string(),
        value: "0".to_string(),
      });
    }

    Ok(builder)
  }
}

impl OnnxYoloBuilder {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn build(self) -> Result<OnnxYolo, OnnxYoloError> {
    info!("加载模型文件: {}", self.model_path.display());
    if !self.model_path.exists() {
      return Err(OnnxYoloError::ModelNotFound(self.model_path));
    }

    let session = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .commit_from_file(&self.model_path)?;

    let labels = match &self.labels_path {
      Some(path) => Labels::from_toml_file(path)?,
      None => session
        .metadata()
        .ok()
        .and_then(|meta| meta.custom("names").ok().flatten())
        .and_then(|names| Labels::from_ultralytics_metadata(&names))
        .unwrap_or_default(),
    };
    debug!("模型 {} 共有 {} 个类别标签", self.name, labels.len());
    info!("模型 {} 加载完成", self.name);

    Ok(OnnxYolo {
      name: self.name,
      session: Mutex::new(session),
      labels,
      input_size: self.input_size,
      conf_threshold: self.conf_threshold,
      iou_threshold: self.iou_threshold,
      max_detections: self.max_detections,
    })
  }
}

pub struct OnnxYolo {
  name: String,
  session: Mutex<Session>,
  labels: Labels,
  input_size: u32,
  conf_threshold: f32,
  iou_threshold: f32,
  max_detections: usize,
}

impl OnnxYolo {
  fn infer(&self, image: &RgbImage) -> Result<DetectionBatch, OnnxYoloError> {
    let (tensor, letterbox) = RgbNchwTensor::letterbox(image, self.input_size);
    let input = Tensor::from_array((tensor.shape(), tensor.into_vec()))?;

    // 执行推理，输出借用 session，需要在锁内完成解码
    let candidates = {
      let mut session = self.session.lock();
      let outputs = session.run(ort::inputs![input])?;
      let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
      debug!("模型 {} 输出形状: {:?}", self.name, shape);

      let dims: &[i64] = shape;
      match *dims {
        [1, rows, END2END_ROW_SIZE] if rows > 0 => {
          decode_end2end(data, rows as usize, self.conf_threshold, self.max_detections)
        }
        [1, channels, anchors] if channels > 4 && anchors > 0 => {
          let dense = decode_dense(data, channels as usize, anchors as usize, self.conf_threshold);
          nms(dense, self.iou_threshold, self.max_detections)
        }
        _ => return Err(OnnxYoloError::UnexpectedOutput(dims.to_vec())),
      }
    };

    let items = candidates
      .into_iter()
      .filter_map(|c| {
        let confidence = Confidence::new(c.score.clamp(0.0, 1.0)).ok()?;
        Some(
          Finding::new(self.labels.name(c.class_id), confidence)
            .with_region(letterbox.to_normalized(c.bbox))
            .with_origin(&self.name),
        )
      })
      .collect::<Vec<_>>();

    debug!("模型 {} 检测到 {} 个目标", self.name, items.len());
    Ok(DetectionBatch::new(&self.name, items))
  }
}

impl Detector for OnnxYolo {
  fn name(&self) -> &str {
    &self.name
  }

  fn detect(&self, image: &RgbImage) -> Result<DetectionBatch, DetectorError> {
    self
      .infer(image)
      .map_err(|e| DetectorError::inference(&self.name, e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builder_reads_query_parameters() {
    let url = Url::parse("onnx:models/tesla.onnx?name=Doen%C3%A7a&size=320&conf=0.3&max=50")
      .unwrap();
    let builder = OnnxYoloBuilder::from_url(&url).unwrap();
    assert_eq!(builder.name(), "Doença");
    assert_eq!(builder.model_path, PathBuf::from("models/tesla.onnx"));
    assert_eq!(builder.input_size, 320);
    assert_eq!(builder.conf_threshold, 0.3);
    assert_eq!(builder.iou_threshold, YOLO_NMS_THRESH);
    assert_eq!(builder.max_detections, 50);
  }

  #[test]
  fn builder_defaults_name_to_file_stem() {
    let url = Url::parse("onnx:///opt/models/agro.onnx").unwrap();
    let builder = OnnxYoloBuilder::from_url(&url).unwrap();
    assert_eq!(builder.name(), "agro");
  }

  #[test]
  fn builder_rejects_bad_parameters() {
    let url = Url::parse("onnx:agro.onnx?conf=high").unwrap();
    assert!(matches!(
      OnnxYoloBuilder::from_url(&url),
      Err(OnnxYoloError::InvalidParameter { .. })
    ));
    let url = Url::parse("file:agro.onnx").unwrap();
    assert!(matches!(
      OnnxYoloBuilder::from_url(&url),
      Err(OnnxYoloError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn missing_model_file_fails_at_build_time() {
    let url = Url::parse("onnx:/nonexistent/agro.onnx").unwrap();
    let builder = OnnxYoloBuilder::from_url(&url).unwrap();
    assert!(matches!(builder.build(), Err(OnnxYoloError::ModelNotFound(_))));
  }
}

// 该文件是 Lispa （叶片病虫害识别） 项目的一部分。
// src/model/postprocess.rs - YOLO 输出解码与非极大值抑制
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

use std::cmp::Ordering;

use tracing::debug;

/// 解码后的候选框，坐标位于模型输入像素空间
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
  pub class_id: usize,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]
}

/// 解码 YOLOv8 风格的稠密输出 `[4 + C, N]`（通道优先）
///
/// 前四个通道为中心点与宽高，其余为各类别分数。
pub fn decode_dense(
  data: &[f32],
  num_channels: usize,
  num_anchors: usize,
  conf_threshold: f32,
) -> Vec<Candidate> {
  let mut candidates = Vec::new();
  if num_channels <= 4 || data.len() < num_channels * num_anchors {
    debug!(
      "输出大小不匹配: 通道 {}, 锚点 {}, 数据 {}",
      num_channels,
      num_anchors,
      data.len()
    );
    return candidates;
  }

  for a in 0..num_anchors {
    // 找到最高类别分数
    let mut score = f32::MIN;
    let mut class_id = 0usize;
    for c in 4..num_channels {
      let s = data[c * num_anchors + a];
      if s > score {
        score = s;
        class_id = c - 4;
      }
    }

    if score < conf_threshold {
      continue;
    }

    let cx = data[a];
    let cy = data[num_anchors + a];
    let w = data[2 * num_anchors + a];
    let h = data[3 * num_anchors + a];

    candidates.push(Candidate {
      class_id,
      score,
      bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
    });
  }

  candidates
}

/// 解码端到端输出 `[N, 6]`，每行为 `[x_min, y_min, x_max, y_max, score, class]`
///
/// 最多保留 `max_detections` 个置信度最高的结果。
pub fn decode_end2end(
  data: &[f32],
  rows: usize,
  conf_threshold: f32,
  max_detections: usize,
) -> Vec<Candidate> {
  let mut candidates: Vec<Candidate> = data
    .chunks_exact(6)
    .take(rows)
    .filter(|row| row[4] >= conf_threshold && row[5] >= 0.0)
    .map(|row| Candidate {
      class_id: row[5].round() as usize,
      score: row[4],
      bbox: [row[0], row[1], row[2], row[3]],
    })
    .collect();
  candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
  candidates.truncate(max_detections);
  candidates
}

/// 按类别的贪心非极大值抑制
pub fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32, max_detections: usize) -> Vec<Candidate> {
  // 按置信度降序排序
  candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

  let mut result = Vec::new();

  while !candidates.is_empty() && result.len() < max_detections {
    let best = candidates.remove(0);

    candidates.retain(|c| c.class_id != best.class_id || iou(&best.bbox, &c.bbox) < iou_threshold);
    result.push(best);
  }

  result
}

/// 计算两个边界框的 IoU
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dense_output_is_decoded_per_anchor() {
    // 2 个类别，3 个锚点
    let anchors = 3;
    #[rustfmt::skip]
    let data = vec![
      10.0, 50.0, 90.0, // cx
      10.0, 50.0, 90.0, // cy
      4.0, 8.0, 2.0,    // w
      4.0, 8.0, 2.0,    // h
      0.9, 0.1, 0.2,    // class 0
      0.05, 0.7, 0.1,   // class 1
    ];

    let candidates = decode_dense(&data, 6, anchors, 0.25);
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].class_id, 0);
    assert_eq!(candidates[0].bbox, [8.0, 8.0, 12.0, 12.0]);
    assert_eq!(candidates[1].class_id, 1);
    assert!((candidates[1].score - 0.7).abs() < f32::EPSILON);
  }

  #[test]
  fn dense_output_with_wrong_size_yields_nothing() {
    assert!(decode_dense(&[0.0; 10], 6, 3, 0.1).is_empty());
  }

  #[test]
  fn end2end_rows_below_threshold_are_dropped() {
    #[rustfmt::skip]
    let data = vec![
      0.0, 0.0, 10.0, 10.0, 0.8, 2.0,
      5.0, 5.0, 15.0, 15.0, 0.1, 1.0,
    ];
    let candidates = decode_end2end(&data, 2, 0.25, 300);
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].class_id, 2);
  }

  #[test]
  fn end2end_keeps_at_most_max_detections() {
    #[rustfmt::skip]
    let data = vec![
      0.0, 0.0, 10.0, 10.0, 0.5, 0.0,
      5.0, 5.0, 15.0, 15.0, 0.9, 1.0,
      8.0, 8.0, 18.0, 18.0, 0.7, 2.0,
    ];
    let candidates = decode_end2end(&data, 3, 0.25, 2);
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].score, 0.9);
    assert_eq!(candidates[1].score, 0.7);
  }

  #[test]
  fn nms_suppresses_overlaps_of_same_class_only() {
    let candidates = vec![
      Candidate { class_id: 0, score: 0.6, bbox: [1.0, 1.0, 11.0, 11.0] },
      Candidate { class_id: 0, score: 0.9, bbox: [0.0, 0.0, 10.0, 10.0] },
      Candidate { class_id: 1, score: 0.5, bbox: [0.0, 0.0, 10.0, 10.0] },
    ];
    let kept = nms(candidates, 0.45, 10);
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].score, 0.9);
    assert_eq!(kept[1].class_id, 1);
  }

  #[test]
  fn nms_respects_max_detections() {
    let candidates = (0..5)
      .map(|i| Candidate {
        class_id: i,
        score: 0.5,
        bbox: [0.0, 0.0, 1.0, 1.0],
      })
      .collect();
    assert_eq!(nms(candidates, 0.45, 3).len(), 3);
  }

  #[test]
  fn iou_of_disjoint_boxes_is_zero() {
    assert_eq!(iou(&[0.0, 0.0, 1.0, 1.0], &[2.0, 2.0, 3.0, 3.0]), 0.0);
    assert!((iou(&[0.0, 0.0, 2.0, 2.0], &[0.0, 0.0, 2.0, 2.0]) - 1.0).abs() < 1e-6);
  }
}

// 该文件是 Lispa （叶片病虫害识别） 项目的一部分。
// src/frame.rs - 图像帧、NCHW 张量与 letterbox 预处理
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

use std::sync::Arc;

use image::{RgbImage, imageops::FilterType};

const RGB_CHANNELS: usize = 3;
const LETTERBOX_FILL: u8 = 114;

/// 一张待分析的图像及其来源
#[derive(Debug, Clone)]
pub struct ImageFrame {
  source: String,
  image: Arc<RgbImage>,
}

impl ImageFrame {
  pub fn new(source: impl Into<String>, image: RgbImage) -> Self {
    Self {
      source: source.into(),
      image: Arc::new(image),
    }
  }

  pub fn source(&self) -> &str {
    &self.source
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  /// 供阻塞线程池中的检测器共享
  pub fn shared(&self) -> Arc<RgbImage> {
    self.image.clone()
  }

  pub fn dimensions(&self) -> (u32, u32) {
    self.image.dimensions()
  }
}

/// letterbox 变换参数，用于把模型坐标映射回原图
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  pub scale: f32,
  pub pad_x: f32,
  pub pad_y: f32,
  pub source_width: u32,
  pub source_height: u32,
}

impl Letterbox {
  /// 模型输入像素坐标 -> 原图归一化坐标 [x_min, y_min, x_max, y_max]
  pub fn to_normalized(&self, bbox: [f32; 4]) -> [f32; 4] {
    let w = self.source_width as f32;
    let h = self.source_height as f32;
    let x = |v: f32| (((v - self.pad_x) / self.scale).clamp(0.0, w)) / w;
    let y = |v: f32| (((v - self.pad_y) / self.scale).clamp(0.0, h)) / h;
    [x(bbox[0]), y(bbox[1]), x(bbox[2]), y(bbox[3])]
  }
}

/// 归一化到 [0, 1] 的 RGB NCHW 浮点张量，批大小为 1
#[derive(Debug, Clone)]
pub struct RgbNchwTensor {
  data: Box<[f32]>,
  size: usize,
}

impl RgbNchwTensor {
  /// 等比缩放到 `size x size`，空白区域以灰色填充
  pub fn letterbox(image: &RgbImage, size: u32) -> (Self, Letterbox) {
    let (src_w, src_h) = image.dimensions();
    let scale = (size as f32 / src_w.max(1) as f32).min(size as f32 / src_h.max(1) as f32);
    let new_w = ((src_w as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((src_h as f32 * scale).round() as u32).clamp(1, size);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let side = size as usize;
    let plane = side * side;
    let fill = LETTERBOX_FILL as f32 / 255.0;
    let mut data = vec![fill; RGB_CHANNELS * plane].into_boxed_slice();

    for h in 0..new_h {
      for w in 0..new_w {
        let pixel = resized.get_pixel(w, h);
        let offset = ((h + pad_y) as usize) * side + (w + pad_x) as usize;
        for c in 0..RGB_CHANNELS {
          data[c * plane + offset] = pixel[c] as f32 / 255.0;
        }
      }
    }

    let letterbox = Letterbox {
      scale,
      pad_x: pad_x as f32,
      pad_y: pad_y as f32,
      source_width: src_w,
      source_height: src_h,
    };

    (Self { data, size: side }, letterbox)
  }

  pub fn shape(&self) -> [usize; 4] {
    [1, RGB_CHANNELS, self.size, self.size]
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn into_vec(self) -> Vec<f32> {
    self.data.into_vec()
  }
}

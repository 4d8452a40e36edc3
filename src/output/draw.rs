// 该文件是 Lispa （叶片病虫害识别） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use ab_glyph::{FontRef, InvalidFont, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};

use crate::{fusion::AggregatedFindings, model::Finding};

const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_TEXT_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
// 不同来源的颜色在色环上错开
const PALETTE_SIZE: usize = 8;

pub struct Draw<'a> {
  font: FontRef<'a>,
  scale: PxScale,
  colors: Vec<Rgb<u8>>,
}

impl Draw<'static> {
  pub fn new() -> Result<Self, InvalidFont> {
    let font = FontRef::try_from_slice(include_bytes!("../../assets/DejaVuSans.ttf"))?;
    let colors = (0..PALETTE_SIZE)
      .map(|i| hsv_to_rgb((i as f32 / PALETTE_SIZE as f32) * 360.0, 0.8, 0.9))
      .collect();
    Ok(Self {
      font,
      scale: PxScale::from(LABEL_FONT_SIZE),
      colors,
    })
  }
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

impl Draw<'_> {
  pub fn color_of(&self, origin_index: usize) -> Rgb<u8> {
    self.colors[origin_index % self.colors.len()]
  }

  /// 在图像上绘制全部带区域的检测结果，同一来源使用同一颜色
  pub fn draw_findings(&self, image: &mut RgbImage, findings: &AggregatedFindings) {
    let origins = findings.origins();
    for finding in findings {
      let index = finding
        .origin()
        .and_then(|o| origins.iter().position(|x| *x == o))
        .unwrap_or(0);
      self.draw_finding(image, finding, self.color_of(index));
    }
  }

  fn draw_finding(&self, image: &mut RgbImage, finding: &Finding, color: Rgb<u8>) {
    let Some(bbox) = finding.region() else {
      return;
    };
    let (w, h) = (image.width() as f32, image.height() as f32);
    let x_min = ((bbox[0] * w).floor() as i32).clamp(0, w as i32 - 1);
    let y_min = ((bbox[1] * h).floor() as i32).clamp(0, h as i32 - 1);
    let x_max = ((bbox[2] * w).ceil() as i32).clamp(0, w as i32 - 1);
    let y_max = ((bbox[3] * h).ceil() as i32).clamp(0, h as i32 - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    for t in 0..BOX_THICKNESS {
      let width = x_max - x_min - 2 * t;
      let height = y_max - y_min - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let caption = match finding.origin() {
      Some(origin) => format!("{}: {} {}", origin, finding.label(), finding.confidence()),
      None => format!("{} {}", finding.label(), finding.confidence()),
    };
    let (text_w, text_h) = text_size(self.scale, &self.font, &caption);
    let label_h = text_h as i32 + 2 * LABEL_TEXT_PADDING;
    let label_x = x_min;
    let label_y = if y_min >= label_h { y_min - label_h } else { y_min };
    let label_w = (text_w as i32 + 2 * LABEL_TEXT_PADDING).min(w as i32 - label_x);

    if label_w > 0 && label_h > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_w as u32, label_h as u32);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        TEXT_COLOR,
        label_x + LABEL_TEXT_PADDING,
        label_y + LABEL_TEXT_PADDING,
        self.scale,
        &self.font,
        &caption,
      );
    }
  }
}

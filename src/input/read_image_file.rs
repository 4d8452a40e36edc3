// 该文件是 Lispa （叶片病虫害识别） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::ImageFrame};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 单张图像输入，迭代一次后结束
pub struct ImageFileInput {
  source: String,
  image: Option<RgbImage>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch);
    }

    let path = urlencoding::decode(url.path())
      .map(|p| p.into_owned())
      .unwrap_or_else(|_| url.path().to_string());
    Self::open(path)
  }
}

impl ImageFileInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    info!(
      "读取图像文件: {} ({}x{})",
      path.display(),
      image.width(),
      image.height()
    );
    Ok(Self {
      source: path.display().to_string(),
      image: Some(image.into_rgb8()),
    })
  }

  /// 从内存中的编码图像构建，例如上传的 JPEG/PNG
  pub fn from_bytes(source: impl Into<String>, bytes: &[u8]) -> Result<Self, ImageFileInputError> {
    let image = image::load_from_memory(bytes)?;
    Ok(Self {
      source: source.into(),
      image: Some(image.into_rgb8()),
    })
  }

  pub fn source(&self) -> &str {
    &self.source
  }
}

impl Iterator for ImageFileInput {
  type Item = ImageFrame;

  fn next(&mut self) -> Option<Self::Item> {
    self
      .image
      .take()
      .map(|image| ImageFrame::new(self.source.clone(), image))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn reads_png_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("folha.png");
    RgbImage::from_pixel(8, 4, Rgb([0, 200, 0])).save(&path).unwrap();

    let url = Url::parse(&format!("image:{}", path.display())).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();
    let frame = input.next().unwrap();
    assert_eq!(frame.dimensions(), (8, 4));
    assert!(input.next().is_none());
  }

  #[test]
  fn undecodable_bytes_are_rejected() {
    assert!(matches!(
      ImageFileInput::from_bytes("upload", b"not an image"),
      Err(ImageFileInputError::ImageLoadError(_))
    ));
  }

  #[test]
  fn missing_file_is_io_error() {
    assert!(matches!(
      ImageFileInput::open("/nonexistent/folha.jpg"),
      Err(ImageFileInputError::IoError(_))
    ));
  }
}

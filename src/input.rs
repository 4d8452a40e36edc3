// 该文件是 Lispa （叶片病虫害识别） 项目的一部分。
// src/input.rs - 图像输入
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

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::ImageFrame};

mod read_image_file;

pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("无效的输入地址: {0}")]
  InvalidUrl(#[from] url::ParseError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  ReadImageFile(ImageFileInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ImageFileInput::SCHEME => Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?)),
      other => Err(InputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Iterator for InputWrapper {
  type Item = ImageFrame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::ReadImageFile(input) => input.next(),
    }
  }
}

/// 命令行输入参数转换为 URL；没有方案的参数视为图像文件路径
pub fn input_url(arg: &str) -> Result<Url, InputError> {
  match Url::parse(arg) {
    // 单字母方案是 Windows 盘符
    Ok(url) if url.scheme().len() > 1 => Ok(url),
    _ => Ok(Url::parse(&format!("{}:{}", ImageFileInput::SCHEME, arg))?),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bare_paths_become_image_urls() {
    assert_eq!(input_url("folha.jpg").unwrap().scheme(), "image");
    assert_eq!(input_url("/tmp/folha.jpg").unwrap().path(), "/tmp/folha.jpg");
    assert_eq!(input_url("image:folha.jpg").unwrap().path(), "folha.jpg");
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("v4l:///dev/video0").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch(_))
    ));
  }
}

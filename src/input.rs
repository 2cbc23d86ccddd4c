// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input.rs - 帧来源
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

use crate::{FromUrl, FromUrlWithScheme, frame::YuvFrame};

mod raw_yuv_file;
pub use self::raw_yuv_file::{RawYuvFileInput, RawYuvFileInputError};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError, yuv_frame_from_rgb};

/// 来源产生的一帧；前置摄像头的帧需要水平翻转
#[derive(Debug, Clone)]
pub struct CapturedFrame {
  pub frame: YuvFrame,
  pub mirror: bool,
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("YUV 文件输入错误: {0}")]
  RawYuvFileInputError(#[from] RawYuvFileInputError),
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  RawYuvFile(RawYuvFileInput),
  #[cfg(feature = "read_image_file")]
  ImageFile(ImageFileInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() == RawYuvFileInput::SCHEME {
      return Ok(InputWrapper::RawYuvFile(RawYuvFileInput::from_url(url)?));
    }
    #[cfg(feature = "read_image_file")]
    {
      if url.scheme() == ImageFileInput::SCHEME {
        return Ok(InputWrapper::ImageFile(ImageFileInput::from_url(url)?));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl Iterator for InputWrapper {
  type Item = CapturedFrame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::RawYuvFile(input) => input.next(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageFile(input) => input.next(),
    }
  }
}

// 该文件是 Shanan （山南西风） 项目的一部分。
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{PixelFormat, Plane, YuvFrame, chroma_dimensions},
  input::CapturedFrame,
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 读取一张图像并作为单个 I420 帧输出
pub struct ImageFileInput {
  frame: Option<YuvFrame>,
  mirror: bool,
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

    let mirror = url.query_pairs().any(|(k, v)| k == "mirror" && v != "false");
    let image = ImageReader::open(url.path())?.decode()?.into_rgb8();
    info!("读取图像: {}x{}", image.width(), image.height());

    Ok(ImageFileInput {
      frame: Some(yuv_frame_from_rgb(&image)),
      mirror,
    })
  }
}

impl Iterator for ImageFileInput {
  type Item = CapturedFrame;

  fn next(&mut self) -> Option<Self::Item> {
    let mirror = self.mirror;
    self
      .frame
      .take()
      .map(|frame| CapturedFrame { frame, mirror })
  }
}

fn luma(r: i32, g: i32, b: i32) -> u8 {
  (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16).clamp(0, 255) as u8
}

fn chroma_u(r: i32, g: i32, b: i32) -> u8 {
  (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128).clamp(0, 255) as u8
}

fn chroma_v(r: i32, g: i32, b: i32) -> u8 {
  (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128).clamp(0, 255) as u8
}

/// BT.601 有限范围 RGB → I420，色度取 2x2 邻域的平均值
pub fn yuv_frame_from_rgb(image: &RgbImage) -> YuvFrame {
  let (width, height) = (image.width() as usize, image.height() as usize);
  let (cw, ch) = chroma_dimensions(width, height);

  let mut y = Vec::with_capacity(width * height);
  for pixel in image.pixels() {
    let [r, g, b] = pixel.0.map(i32::from);
    y.push(luma(r, g, b));
  }

  let mut u = Vec::with_capacity(cw * ch);
  let mut v = Vec::with_capacity(cw * ch);
  for cy in 0..ch {
    for cx in 0..cw {
      let (mut r, mut g, mut b, mut n) = (0i32, 0i32, 0i32, 0i32);
      for py in (2 * cy)..(2 * cy + 2).min(height) {
        for px in (2 * cx)..(2 * cx + 2).min(width) {
          let [pr, pg, pb] = image.get_pixel(px as u32, py as u32).0;
          r += i32::from(pr);
          g += i32::from(pg);
          b += i32::from(pb);
          n += 1;
        }
      }
      let (r, g, b) = ((r + n / 2) / n, (g + n / 2) / n, (b + n / 2) / n);
      u.push(chroma_u(r, g, b));
      v.push(chroma_v(r, g, b));
    }
  }

  YuvFrame::new(
    width,
    height,
    PixelFormat::Yuv420,
    Plane::packed(y, width),
    Plane::packed(u, cw),
    Plane::packed(v, cw),
  )
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// src/convert.rs - YUV 4:2:0 到 RGBA 的颜色空间转换
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

//! # 颜色空间转换
//!
//! 相机给出的 4:2:0 帧由三个独立的平面组成，每个平面有各自的行步长与像素步长。
//! 转换分两步：
//!
//! 1. 按 **Y、V、U** 的顺序把三个平面打包进一块连续的暂存缓冲区，
//!    色度部分按 NV21 约定交错存放（先 V 后 U）；
//! 2. 转换上下文按 BT.601 有限范围系数，以定点查表方式把 NV21 数据写成 RGBA。
//!
//! 暂存缓冲区按帧尺寸复用，尺寸变化时才重新分配。转换器持有跨调用的内部状态，
//! 所以 `convert` 需要 `&mut self`，调用方必须保证单一所有者。

use thiserror::Error;
use tracing::debug;

use crate::frame::{DenseImage, PixelFormat, Plane, YuvFrame, chroma_dimensions};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConvertError {
  #[error("不支持的图像格式: {0}")]
  UnsupportedFormat(String),
  #[error("输出图像尺寸不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  OutputSizeMismatch {
    expected: (usize, usize),
    actual: (usize, usize),
  },
}

/// NV21 -> RGBA 定点转换上下文，查找表只在创建时计算一次
struct Nv21Context {
  luma: [i32; 256],
  red_v: [i32; 256],
  green_u: [i32; 256],
  green_v: [i32; 256],
  blue_u: [i32; 256],
}

impl Nv21Context {
  fn new() -> Self {
    let mut ctx = Self {
      luma: [0; 256],
      red_v: [0; 256],
      green_u: [0; 256],
      green_v: [0; 256],
      blue_u: [0; 256],
    };
    for i in 0..256i32 {
      let idx = i as usize;
      ctx.luma[idx] = 298 * (i - 16);
      ctx.red_v[idx] = 409 * (i - 128);
      ctx.green_u[idx] = -100 * (i - 128);
      ctx.green_v[idx] = -208 * (i - 128);
      ctx.blue_u[idx] = 516 * (i - 128);
    }
    ctx
  }

  #[inline]
  fn pixel(&self, y: u8, u: u8, v: u8) -> [u8; 4] {
    let c = self.luma[y as usize] + 128;
    let r = (c + self.red_v[v as usize]) >> 8;
    let g = (c + self.green_u[u as usize] + self.green_v[v as usize]) >> 8;
    let b = (c + self.blue_u[u as usize]) >> 8;
    [clip(r), clip(g), clip(b), u8::MAX]
  }

  /// `nv21` 为 Y 平面后接交错 VU 平面
  fn run(&self, nv21: &[u8], width: usize, height: usize, output: &mut [u8]) {
    let (cw, _) = chroma_dimensions(width, height);
    let luma_len = width * height;
    for row in 0..height {
      let chroma_row = luma_len + (row / 2) * cw * 2;
      let luma_row = row * width;
      for col in 0..width {
        let vu = chroma_row + (col / 2) * 2;
        let rgba = self.pixel(nv21[luma_row + col], nv21[vu + 1], nv21[vu]);
        let out = (luma_row + col) * 4;
        output[out..out + 4].copy_from_slice(&rgba);
      }
    }
  }
}

#[inline]
fn clip(value: i32) -> u8 {
  value.clamp(0, 255) as u8
}

pub struct YuvToRgbaConverter {
  context: Nv21Context,
  scratch: Vec<u8>,
  geometry: Option<(usize, usize)>,
  allocations: usize,
}

impl Default for YuvToRgbaConverter {
  fn default() -> Self {
    Self::new()
  }
}

impl YuvToRgbaConverter {
  pub fn new() -> Self {
    Self {
      context: Nv21Context::new(),
      scratch: Vec::new(),
      geometry: None,
      allocations: 0,
    }
  }

  /// 暂存缓冲区被（重新）分配的次数
  pub fn scratch_allocations(&self) -> usize {
    self.allocations
  }

  /// 将 `frame` 转换为 RGBA 并写入调用方持有的 `output`
  pub fn convert(&mut self, frame: &YuvFrame, output: &mut DenseImage) -> Result<(), ConvertError> {
    check_layout(frame)?;

    let (width, height) = (frame.width(), frame.height());
    if (output.width(), output.height()) != (width, height) {
      return Err(ConvertError::OutputSizeMismatch {
        expected: (width, height),
        actual: (output.width(), output.height()),
      });
    }

    self.prepare_scratch(width, height);
    pack_nv21(frame, &mut self.scratch);
    self.context.run(&self.scratch, width, height, output.as_mut());
    Ok(())
  }

  fn prepare_scratch(&mut self, width: usize, height: usize) {
    if self.geometry == Some((width, height)) {
      return;
    }
    let (cw, ch) = chroma_dimensions(width, height);
    let total = width * height + 2 * cw * ch;
    debug!("重新分配 YUV 暂存缓冲区: {}x{}, {} 字节", width, height, total);
    self.scratch = vec![0u8; total];
    self.geometry = Some((width, height));
    self.allocations += 1;
  }
}

fn check_layout(frame: &YuvFrame) -> Result<(), ConvertError> {
  if frame.format() != PixelFormat::Yuv420 {
    return Err(ConvertError::UnsupportedFormat(format!(
      "{:?}, 仅支持 Yuv420",
      frame.format()
    )));
  }

  let (width, height) = (frame.width(), frame.height());
  if width == 0 || height == 0 {
    return Err(ConvertError::UnsupportedFormat(format!(
      "帧尺寸为空: {}x{}",
      width, height
    )));
  }

  let (cw, ch) = chroma_dimensions(width, height);
  check_plane("Y", frame.y(), width, height)?;
  check_plane("U", frame.u(), cw, ch)?;
  check_plane("V", frame.v(), cw, ch)?;
  Ok(())
}

fn check_plane(name: &str, plane: &Plane, width: usize, height: usize) -> Result<(), ConvertError> {
  let row_span = (width - 1)
    .checked_mul(plane.pixel_stride())
    .and_then(|span| span.checked_add(1));
  if plane.pixel_stride() == 0 || row_span.is_none_or(|span| plane.row_stride() < span) {
    return Err(ConvertError::UnsupportedFormat(format!(
      "{} 平面步长无效: 行步长 {}, 像素步长 {}",
      name,
      plane.row_stride(),
      plane.pixel_stride()
    )));
  }
  let required = plane.required_len(width, height).ok_or_else(|| {
    ConvertError::UnsupportedFormat(format!(
      "{} 平面步长溢出: 行步长 {}, 像素步长 {}",
      name,
      plane.row_stride(),
      plane.pixel_stride()
    ))
  })?;
  if plane.data().len() < required {
    return Err(ConvertError::UnsupportedFormat(format!(
      "{} 平面数据不足: 需要 {} 字节, 实际 {} 字节",
      name,
      required,
      plane.data().len()
    )));
  }
  Ok(())
}

/// 按 Y、V、U 的顺序打包，色度交错存放
fn pack_nv21(frame: &YuvFrame, scratch: &mut [u8]) {
  let (width, height) = (frame.width(), frame.height());
  let (cw, ch) = chroma_dimensions(width, height);

  let y = frame.y();
  for row in 0..height {
    let dst = &mut scratch[row * width..(row + 1) * width];
    if y.pixel_stride() == 1 {
      let start = row * y.row_stride();
      dst.copy_from_slice(&y.data()[start..start + width]);
    } else {
      for (col, out) in dst.iter_mut().enumerate() {
        *out = y.sample(col, row);
      }
    }
  }

  let (u, v) = (frame.u(), frame.v());
  let chroma = &mut scratch[width * height..];
  for row in 0..ch {
    for col in 0..cw {
      let idx = (row * cw + col) * 2;
      chroma[idx] = v.sample(col, row);
      chroma[idx + 1] = u.sample(col, row);
    }
  }
}

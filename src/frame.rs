// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - 相机帧、稠密图像与张量定义
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

const RGBA_CHANNELS: usize = 4;

/// 相机帧像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
  /// 4:2:0 平面格式，色度平面宽高均为亮度的一半
  Yuv420,
  /// 4:2:2 平面格式，仅水平方向下采样
  Yuv422,
  /// 4:4:4 平面格式，不下采样
  Yuv444,
}

/// 单个分量平面
#[derive(Debug, Clone)]
pub struct Plane {
  data: Vec<u8>,
  row_stride: usize,
  pixel_stride: usize,
}

impl Plane {
  pub fn new(data: Vec<u8>, row_stride: usize, pixel_stride: usize) -> Self {
    Self {
      data,
      row_stride,
      pixel_stride,
    }
  }

  /// 紧密排列的平面（像素步长为 1，行步长等于宽度）
  pub fn packed(data: Vec<u8>, width: usize) -> Self {
    Self::new(data, width, 1)
  }

  pub fn data(&self) -> &[u8] {
    &self.data
  }

  pub fn row_stride(&self) -> usize {
    self.row_stride
  }

  pub fn pixel_stride(&self) -> usize {
    self.pixel_stride
  }

  /// 覆盖 `width x height` 个样本所需的最少字节数，步长过大溢出时为 `None`
  pub fn required_len(&self, width: usize, height: usize) -> Option<usize> {
    if width == 0 || height == 0 {
      return Some(0);
    }
    let last_row = (height - 1).checked_mul(self.row_stride)?;
    let last_col = (width - 1).checked_mul(self.pixel_stride)?;
    last_row.checked_add(last_col)?.checked_add(1)
  }

  #[inline]
  pub(crate) fn sample(&self, x: usize, y: usize) -> u8 {
    self.data[y * self.row_stride + x * self.pixel_stride]
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum I420Error {
  #[error("I420 数据长度不匹配: 期望 {expected}, 实际 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("帧尺寸无效: {0}x{1}")]
  InvalidDimensions(usize, usize),
}

/// 相机回调产生的 YUV 平面帧，每次处理后即丢弃
#[derive(Debug, Clone)]
pub struct YuvFrame {
  width: usize,
  height: usize,
  format: PixelFormat,
  y: Plane,
  u: Plane,
  v: Plane,
}

impl YuvFrame {
  pub fn new(width: usize, height: usize, format: PixelFormat, y: Plane, u: Plane, v: Plane) -> Self {
    Self {
      width,
      height,
      format,
      y,
      u,
      v,
    }
  }

  /// 将紧密排列的 I420 缓冲区（Y、U、V 依次存放）拆分为三个平面
  pub fn from_i420(width: usize, height: usize, data: &[u8]) -> Result<Self, I420Error> {
    if width == 0 || height == 0 {
      return Err(I420Error::InvalidDimensions(width, height));
    }
    let (cw, ch) = chroma_dimensions(width, height);
    let luma = width * height;
    let chroma = cw * ch;
    let expected = i420_len(width, height);
    if data.len() != expected {
      return Err(I420Error::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self::new(
      width,
      height,
      PixelFormat::Yuv420,
      Plane::packed(data[..luma].to_vec(), width),
      Plane::packed(data[luma..luma + chroma].to_vec(), cw),
      Plane::packed(data[luma + chroma..].to_vec(), cw),
    ))
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn format(&self) -> PixelFormat {
    self.format
  }

  pub fn y(&self) -> &Plane {
    &self.y
  }

  pub fn u(&self) -> &Plane {
    &self.u
  }

  pub fn v(&self) -> &Plane {
    &self.v
  }
}

/// 4:2:0 色度平面的尺寸（奇数边向上取整）
pub fn chroma_dimensions(width: usize, height: usize) -> (usize, usize) {
  (width.div_ceil(2), height.div_ceil(2))
}

/// 紧密排列的 I420 帧字节数
pub fn i420_len(width: usize, height: usize) -> usize {
  let (cw, ch) = chroma_dimensions(width, height);
  width * height + 2 * cw * ch
}

/// 紧密排列的 RGBA 图像，行步长恒为 `width * 4`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseImage {
  width: usize,
  height: usize,
  data: Box<[u8]>,
}

impl DenseImage {
  pub fn new(width: usize, height: usize) -> Self {
    Self {
      width,
      height,
      data: vec![0u8; width * height * RGBA_CHANNELS].into_boxed_slice(),
    }
  }

  pub fn from_raw(width: usize, height: usize, data: Vec<u8>) -> Option<Self> {
    if data.len() != width * height * RGBA_CHANNELS {
      return None;
    }
    Some(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  /// 尺寸变化时才重新分配
  pub fn ensure_size(&mut self, width: usize, height: usize) {
    if self.width != width || self.height != height {
      *self = Self::new(width, height);
    }
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGBA_CHANNELS
  }

  pub fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
    let offset = (y * self.width + x) * RGBA_CHANNELS;
    [
      self.data[offset],
      self.data[offset + 1],
      self.data[offset + 2],
      self.data[offset + 3],
    ]
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }
}

impl AsMut<[u8]> for DenseImage {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("张量数据长度不匹配: 形状 {shape:?} 需要 {expected} 个元素, 实际 {actual}")]
pub struct TensorShapeError {
  pub shape: Vec<usize>,
  pub expected: usize,
  pub actual: usize,
}

/// 32 位浮点张量，数据长度恒等于形状各维之积
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  shape: Vec<usize>,
  data: Vec<f32>,
}

impl Tensor {
  pub fn zeros(shape: &[usize]) -> Self {
    Self {
      shape: shape.to_vec(),
      data: vec![0.0; shape.iter().product()],
    }
  }

  pub fn from_vec(shape: &[usize], data: Vec<f32>) -> Result<Self, TensorShapeError> {
    let expected = shape.iter().product();
    if data.len() != expected {
      return Err(TensorShapeError {
        shape: shape.to_vec(),
        expected,
        actual: data.len(),
      });
    }
    Ok(Self {
      shape: shape.to_vec(),
      data,
    })
  }

  /// 复用已有分配，调整为新的形状
  pub fn reshape(&mut self, shape: &[usize]) {
    if self.shape != shape {
      self.shape.clear();
      self.shape.extend_from_slice(shape);
      self.data.resize(shape.iter().product(), 0.0);
    }
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn as_mut_slice(&mut self) -> &mut [f32] {
    &mut self.data
  }
}

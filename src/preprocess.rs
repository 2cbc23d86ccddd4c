// 该文件是 Shanan （山南西风） 项目的一部分。
// src/preprocess.rs - 张量预处理
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

use crate::frame::{DenseImage, Tensor};

const TENSOR_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PreprocessError {
  #[error("目标尺寸无效: {0}x{1}")]
  InvalidTargetSize(usize, usize),
  #[error("输入图像为空")]
  EmptyImage,
}

/// 一个输出坐标在某一轴上的两个采样点及其权重
#[derive(Debug, Clone, Copy, PartialEq)]
struct Tap {
  i0: usize,
  i1: usize,
  w0: f32,
  w1: f32,
}

impl Tap {
  /// 以 `len` 为轴长做镜像：索引翻转，权重互换
  fn reflect(self, len: usize) -> Self {
    Self {
      i0: len - 1 - self.i1,
      i1: len - 1 - self.i0,
      w0: self.w1,
      w1: self.w0,
    }
  }
}

/// 半像素中心对齐的双线性采样表。
/// 后半段由前半段镜像得到，因此 `taps[n - 1 - x] == taps[x].reflect(src_len)`，
/// 先翻转再缩放与先缩放再翻转逐位一致。
fn bilinear_taps(src_len: usize, dst_len: usize, taps: &mut Vec<Tap>) {
  taps.clear();
  let scale = src_len as f32 / dst_len as f32;
  let last = (src_len - 1) as f32;

  for x in 0..dst_len {
    let tap = if 2 * x + 1 < dst_len {
      let pos = ((x as f32 + 0.5) * scale - 0.5).clamp(0.0, last);
      let i0 = pos.floor() as usize;
      let w1 = pos - i0 as f32;
      Tap {
        i0,
        i1: (i0 + 1).min(src_len - 1),
        w0: 1.0 - w1,
        w1,
      }
    } else if 2 * x + 1 == dst_len {
      // 中心列正好落在源图中心
      let c = (src_len - 1) / 2;
      if src_len % 2 == 1 {
        Tap { i0: c, i1: c, w0: 1.0, w1: 0.0 }
      } else {
        Tap { i0: c, i1: c + 1, w0: 0.5, w1: 0.5 }
      }
    } else {
      taps[dst_len - 1 - x].reflect(src_len)
    };
    taps.push(tap);
  }
}

/// 将稠密图像缩放并归一化为 `[1, H, W, 3]` 的输入张量
pub struct TensorPreprocessor {
  tensor: Tensor,
  x_taps: Vec<Tap>,
  y_taps: Vec<Tap>,
}

impl Default for TensorPreprocessor {
  fn default() -> Self {
    Self::new()
  }
}

impl TensorPreprocessor {
  pub fn new() -> Self {
    Self {
      tensor: Tensor::zeros(&[1, 0, 0, TENSOR_CHANNELS]),
      x_taps: Vec::new(),
      y_taps: Vec::new(),
    }
  }

  /// 双线性缩放到目标尺寸，直接写入浮点张量；`mirror` 为真时水平翻转。
  /// 翻转与缩放的先后顺序不影响结果。返回的张量缓冲区在调用之间复用。
  pub fn preprocess(
    &mut self,
    image: &DenseImage,
    target_w: usize,
    target_h: usize,
    mirror: bool,
  ) -> Result<&Tensor, PreprocessError> {
    if target_w == 0 || target_h == 0 {
      return Err(PreprocessError::InvalidTargetSize(target_w, target_h));
    }
    if image.width() == 0 || image.height() == 0 {
      return Err(PreprocessError::EmptyImage);
    }

    self.tensor.reshape(&[1, target_h, target_w, TENSOR_CHANNELS]);

    if (image.width(), image.height()) == (target_w, target_h) {
      fill_tensor(
        self.tensor.as_mut_slice(),
        image.as_bytes(),
        target_w,
        target_h,
        mirror,
      );
    } else {
      bilinear_taps(image.width(), target_w, &mut self.x_taps);
      bilinear_taps(image.height(), target_h, &mut self.y_taps);
      resample(
        self.tensor.as_mut_slice(),
        image.as_bytes(),
        image.width(),
        &self.x_taps,
        &self.y_taps,
        mirror,
      );
    }

    Ok(&self.tensor)
  }
}

/// RGBA 字节 -> [0, 1] 浮点 RGB，丢弃 alpha 通道
fn fill_tensor(out: &mut [f32], rgba: &[u8], width: usize, height: usize, mirror: bool) {
  for y in 0..height {
    for x in 0..width {
      let src_x = if mirror { width - 1 - x } else { x };
      let src = (y * width + src_x) * 4;
      let dst = (y * width + x) * TENSOR_CHANNELS;
      for c in 0..TENSOR_CHANNELS {
        out[dst + c] = rgba[src + c] as f32 / 255.0;
      }
    }
  }
}

/// 按采样表做双线性插值，先水平后垂直，最后归一化
fn resample(
  out: &mut [f32],
  rgba: &[u8],
  src_w: usize,
  x_taps: &[Tap],
  y_taps: &[Tap],
  mirror: bool,
) {
  let dst_w = x_taps.len();
  let sample = |row: usize, tap: &Tap, c: usize| {
    let base = row * src_w;
    rgba[(base + tap.i0) * 4 + c] as f32 * tap.w0 + rgba[(base + tap.i1) * 4 + c] as f32 * tap.w1
  };

  for (y, ty) in y_taps.iter().enumerate() {
    for x in 0..dst_w {
      let tx = if mirror {
        &x_taps[dst_w - 1 - x]
      } else {
        &x_taps[x]
      };
      let dst = (y * dst_w + x) * TENSOR_CHANNELS;
      for c in 0..TENSOR_CHANNELS {
        let top = sample(ty.i0, tx, c);
        let bottom = sample(ty.i1, tx, c);
        out[dst + c] = (top * ty.w0 + bottom * ty.w1) / 255.0;
      }
    }
  }
}

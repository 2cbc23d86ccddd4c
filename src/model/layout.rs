// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/layout.rs - 输出张量布局协商
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
use tracing::debug;

/// 4 个边框坐标 + 至少 1 个类别
const MIN_CHANNELS: usize = 5;
const BOX_COORDS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
  #[error("输出张量维数应为 3, 实际形状 {0:?}")]
  UnexpectedRank(Vec<usize>),
  #[error("无法推断输出布局: 形状 {0:?} 中没有大小不小于 5 的通道轴")]
  AmbiguousOutputLayout(Vec<usize>),
}

/// 通道轴的选择方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutStrategy {
  /// 第一个大小不小于 5 的非批次轴视为通道轴
  #[default]
  FirstWideAxis,
  /// 固定为 `[1, C, N]`
  ChannelsFirst,
  /// 固定为 `[1, N, C]`
  BoxesFirst,
}

/// 输出张量 `[1, C, N]` 或 `[1, N, C]` 的解释方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLayout {
  channels_axis: usize,
  channels: usize,
  boxes: usize,
}

impl OutputLayout {
  pub fn channels_axis(&self) -> usize {
    self.channels_axis
  }

  pub fn box_axis(&self) -> usize {
    if self.channels_axis == 1 { 2 } else { 1 }
  }

  /// C = 4 + 类别数
  pub fn channels(&self) -> usize {
    self.channels
  }

  /// N，候选框数量
  pub fn boxes(&self) -> usize {
    self.boxes
  }

  pub fn num_classes(&self) -> usize {
    self.channels - BOX_COORDS
  }

  /// 通道轴在前时数据按通道连续存放
  pub fn is_channel_major(&self) -> bool {
    self.channels_axis == 1
  }

  /// 第 `row` 个候选框第 `channel` 个通道在扁平缓冲区中的偏移
  #[inline]
  pub fn offset(&self, row: usize, channel: usize) -> usize {
    if self.is_channel_major() {
      channel * self.boxes + row
    } else {
      row * self.channels + channel
    }
  }

  pub fn len(&self) -> usize {
    self.channels * self.boxes
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// 按默认策略协商输出布局
pub fn negotiate_layout(shape: &[usize]) -> Result<OutputLayout, LayoutError> {
  LayoutStrategy::default().negotiate(shape)
}

impl LayoutStrategy {
  pub fn negotiate(&self, shape: &[usize]) -> Result<OutputLayout, LayoutError> {
    if shape.len() != 3 {
      return Err(LayoutError::UnexpectedRank(shape.to_vec()));
    }

    let channels_axis = match self {
      LayoutStrategy::FirstWideAxis => (1..3)
        .find(|&axis| shape[axis] >= MIN_CHANNELS)
        .ok_or_else(|| LayoutError::AmbiguousOutputLayout(shape.to_vec()))?,
      LayoutStrategy::ChannelsFirst => 1,
      LayoutStrategy::BoxesFirst => 2,
    };

    if shape[channels_axis] < MIN_CHANNELS {
      return Err(LayoutError::AmbiguousOutputLayout(shape.to_vec()));
    }

    let box_axis = if channels_axis == 1 { 2 } else { 1 };
    let layout = OutputLayout {
      channels_axis,
      channels: shape[channels_axis],
      boxes: shape[box_axis],
    };
    debug!(
      "输出布局: 通道轴 {}, C={}, N={}, 类别数 {}",
      channels_axis,
      layout.channels,
      layout.boxes,
      layout.num_classes()
    );
    Ok(layout)
  }
}

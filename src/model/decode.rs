// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/decode.rs - 输出张量解码
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

use super::{BoundingBox, Detection, Labels, OutputLayout};
use crate::frame::Tensor;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
  #[error("输出数据长度不匹配: 期望 {expected}, 实际 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 把原始输出张量解释为 N 行 C 列的候选表，逐行解码
#[derive(Debug, Clone)]
pub struct OutputDecoder {
  layout: OutputLayout,
  labels: Labels,
}

impl OutputDecoder {
  pub fn new(layout: OutputLayout, labels: Labels) -> Self {
    Self { layout, labels }
  }

  pub fn layout(&self) -> &OutputLayout {
    &self.layout
  }

  pub fn labels(&self) -> &Labels {
    &self.labels
  }

  /// 解码得到张量像素坐标下、尚未抑制的候选检测
  pub fn decode(&self, output: &Tensor, threshold: f32) -> Result<Vec<Detection>, DecodeError> {
    let mut detections = Vec::new();
    self.decode_into(output.as_slice(), threshold, &mut detections)?;
    Ok(detections)
  }

  /// 与 [`OutputDecoder::decode`] 相同，结果追加到 `out`，便于复用分配
  pub fn decode_into(
    &self,
    output: &[f32],
    threshold: f32,
    out: &mut Vec<Detection>,
  ) -> Result<(), DecodeError> {
    let layout = &self.layout;
    if output.len() != layout.len() {
      return Err(DecodeError::LengthMismatch {
        expected: layout.len(),
        actual: output.len(),
      });
    }

    let before = out.len();
    for row in 0..layout.boxes() {
      let at = |channel: usize| output[layout.offset(row, channel)];

      // 取最大类别分数，相同分数保留编号最小者
      let mut confidence = f32::NEG_INFINITY;
      let mut class_id = 0usize;
      for channel in 4..layout.channels() {
        let score = at(channel);
        if score > confidence {
          confidence = score;
          class_id = channel - 4;
        }
      }

      if !(confidence >= threshold) {
        continue;
      }

      out.push(Detection {
        bbox: BoundingBox::from_center(at(0), at(1), at(2), at(3)),
        label: self.labels.name_or_placeholder(class_id),
        class_id,
        confidence,
      });
    }

    debug!("解码得到 {} 个候选框", out.len() - before);
    Ok(())
  }
}

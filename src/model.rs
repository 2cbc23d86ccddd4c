// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型边界、检测结果与标签
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

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::Tensor;

mod decode;
mod layout;
mod nms;
#[cfg(feature = "onnx")]
mod onnx;

pub use self::decode::{DecodeError, OutputDecoder};
pub use self::layout::{LayoutError, LayoutStrategy, OutputLayout, negotiate_layout};
pub use self::nms::{iou, suppress};
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxEngine, OnnxLoader, OnnxLoaderError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
  #[error("模型加载失败: {0}")]
  ModelLoadFailed(String),
  #[error("模型执行失败: {0}")]
  ModelExecutionFailed(String),
}

/// 推理能力边界：给定与输入形状一致的张量，同步返回一个输出张量
pub trait InferenceEngine: Send {
  fn input_shape(&self) -> Result<Vec<usize>, EngineError>;
  fn output_shape(&self) -> Result<Vec<usize>, EngineError>;
  fn run(&mut self, input: &Tensor, output: &mut Tensor) -> Result<(), EngineError>;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
  fn input_shape(&self) -> Result<Vec<usize>, EngineError> {
    (**self).input_shape()
  }

  fn output_shape(&self) -> Result<Vec<usize>, EngineError> {
    (**self).output_shape()
  }

  fn run(&mut self, input: &Tensor, output: &mut Tensor) -> Result<(), EngineError> {
    (**self).run(input, output)
  }
}

/// 从模型字节创建推理引擎
pub trait EngineLoader {
  type Engine: InferenceEngine;

  fn load(&self, model: &[u8]) -> Result<Self::Engine, EngineError>;
}

/// 角点形式的边界框 (left, top, right, bottom)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl BoundingBox {
  pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
    Self {
      left,
      top,
      right,
      bottom,
    }
  }

  /// 由中心形式 (cx, cy, w, h) 转换，不做裁剪
  pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
    Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
  }

  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  /// 横坐标除以 `width`，纵坐标除以 `height`
  pub fn normalize(&self, width: f32, height: f32) -> Self {
    Self::new(
      self.left / width,
      self.top / height,
      self.right / width,
      self.bottom / height,
    )
  }

  pub fn clamp_unit(&self) -> Self {
    Self::new(
      self.left.clamp(0.0, 1.0),
      self.top.clamp(0.0, 1.0),
      self.right.clamp(0.0, 1.0),
      self.bottom.clamp(0.0, 1.0),
    )
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub bbox: BoundingBox,
  pub label: String,
  pub class_id: usize,
  pub confidence: f32,
}

/// 经过抑制的检测集合，按置信度降序排列
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionSet {
  items: Vec<Detection>,
}

impl DetectionSet {
  pub(crate) fn from_sorted(items: Vec<Detection>) -> Self {
    Self { items }
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }

  pub fn as_slice(&self) -> &[Detection] {
    &self.items
  }

  pub fn into_vec(self) -> Vec<Detection> {
    self.items
  }

  pub(crate) fn map_boxes(&mut self, f: impl Fn(&BoundingBox) -> BoundingBox) {
    for item in self.items.iter_mut() {
      item.bbox = f(&item.bbox);
    }
  }
}

impl<'a> IntoIterator for &'a DetectionSet {
  type Item = &'a Detection;
  type IntoIter = std::slice::Iter<'a, Detection>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.iter()
  }
}

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("标签文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签列表为空")]
  Empty,
}

/// 按类别编号索引的只读标签表
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Labels {
  names: Box<[String]>,
}

impl Labels {
  pub fn new<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      names: names.into_iter().map(Into::into).collect(),
    }
  }

  /// 每行一个标签；行尾的 `\r` 会被去掉，末尾换行之后的空行不计入
  pub fn parse(text: &str) -> Self {
    Self::new(text.lines().map(|line| line.trim_end_matches('\r')))
  }

  pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, LabelError> {
    let text = std::fs::read_to_string(path)?;
    let labels = Self::parse(&text);
    if labels.is_empty() {
      return Err(LabelError::Empty);
    }
    Ok(labels)
  }

  pub fn get(&self, class_id: usize) -> Option<&str> {
    self.names.get(class_id).map(String::as_str)
  }

  /// 越界编号返回占位名 `Class_<id>`
  pub fn name_or_placeholder(&self, class_id: usize) -> String {
    match self.get(class_id) {
      Some(name) => name.to_string(),
      None => format!("Class_{}", class_id),
    }
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
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

use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::{Tensor as OrtTensor, ValueType};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Tensor,
  model::{EngineError, EngineLoader, InferenceEngine},
};

const DEFAULT_THREADS: usize = 4;

#[derive(Error, Debug)]
pub enum OnnxLoaderError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch { expected: String, actual: String },
  #[error("参数 {0} 无效: {1}")]
  InvalidParameter(String, String),
}

/// 形如 `onnx:///path/to/model.onnx?threads=4` 的后端配置
#[derive(Debug, Clone)]
pub struct OnnxLoader {
  model_path: String,
  threads: usize,
}

impl FromUrlWithScheme for OnnxLoader {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxLoader {
  type Error = OnnxLoaderError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxLoaderError::SchemeMismatch {
        expected: Self::SCHEME.to_string(),
        actual: url.scheme().to_string(),
      });
    }

    let mut threads = DEFAULT_THREADS;
    for (k, v) in url.query_pairs() {
      if k == "threads" {
        threads = v
          .parse()
          .map_err(|_| OnnxLoaderError::InvalidParameter(k.to_string(), v.to_string()))?;
      }
    }

    Ok(OnnxLoader {
      model_path: url.path().to_string(),
      threads,
    })
  }
}

impl OnnxLoader {
  pub fn model_path(&self) -> &str {
    &self.model_path
  }

  pub fn threads(mut self, threads: usize) -> Self {
    self.threads = threads;
    self
  }
}

pub struct OnnxEngine {
  session: Session,
  input_shape: Option<Vec<usize>>,
  output_shape: Option<Vec<usize>>,
}

impl EngineLoader for OnnxLoader {
  type Engine = OnnxEngine;

  fn load(&self, model: &[u8]) -> Result<Self::Engine, EngineError> {
    info!("创建 ONNX 推理会话, CPU 线程数: {}", self.threads);
    debug!(
      "模型大小: {:.2} MB",
      model.len() as f64 / (1024.0 * 1024.0)
    );
    let session = Session::builder()
      .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
      .and_then(|b| b.with_intra_threads(self.threads))
      .and_then(|b| b.commit_from_memory(model))
      .map_err(|e| EngineError::ModelLoadFailed(e.to_string()))?;

    let input_shape = session.inputs.first().and_then(|i| static_dims(&i.input_type));
    let output_shape = session
      .outputs
      .first()
      .and_then(|o| static_dims(&o.output_type));

    Ok(OnnxEngine {
      session,
      input_shape,
      output_shape,
    })
  }
}

/// 只接受全部维度已知的张量
fn static_dims(value_type: &ValueType) -> Option<Vec<usize>> {
  match value_type {
    ValueType::Tensor { shape, .. } => shape.iter().map(|&d| usize::try_from(d).ok()).collect(),
    _ => None,
  }
}

impl InferenceEngine for OnnxEngine {
  fn input_shape(&self) -> Result<Vec<usize>, EngineError> {
    self
      .input_shape
      .clone()
      .ok_or_else(|| EngineError::ModelExecutionFailed("模型输入不是固定形状的张量".to_string()))
  }

  fn output_shape(&self) -> Result<Vec<usize>, EngineError> {
    self
      .output_shape
      .clone()
      .ok_or_else(|| EngineError::ModelExecutionFailed("模型输出不是固定形状的张量".to_string()))
  }

  fn run(&mut self, input: &Tensor, output: &mut Tensor) -> Result<(), EngineError> {
    let failed = |e: ort::Error| EngineError::ModelExecutionFailed(e.to_string());

    let value = OrtTensor::from_array((input.shape().to_vec(), input.as_slice().to_vec()))
      .map_err(failed)?;
    let outputs = self.session.run(ort::inputs![value]).map_err(failed)?;
    let (_, data) = outputs[0].try_extract_tensor::<f32>().map_err(failed)?;

    if data.len() != output.len() {
      return Err(EngineError::ModelExecutionFailed(format!(
        "输出长度 {} 与声明形状 {:?} 不一致",
        data.len(),
        output.shape()
      )));
    }
    output.as_mut_slice().copy_from_slice(data);
    Ok(())
  }
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// src/pipeline.rs - 检测流水线
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

//! # 检测流水线
//!
//! 单帧处理顺序：颜色转换 → 张量预处理 → 推理 → 输出解码 → 非极大值抑制 →
//! 坐标归一化 → 交给结果接收端。
//!
//! 生命周期为 `Uninitialized → Ready → Closed`。初始化失败会通过接收端的
//! `on_error` 报告一次，并保持 `Uninitialized`；单帧错误只丢弃该帧，
//! 流水线仍为 `Ready`。

use std::path::Path;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  convert::{ConvertError, YuvToRgbaConverter},
  frame::{DenseImage, Tensor, YuvFrame},
  model::{
    DecodeError, DetectionSet, EngineError, EngineLoader, InferenceEngine, LabelError, Labels,
    LayoutError, LayoutStrategy, OutputDecoder, OutputLayout, suppress,
  },
  output::DetectionSink,
  preprocess::{PreprocessError, TensorPreprocessor},
};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.6;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.5;

const INPUT_CHANNELS: usize = 3;

/// 归一化之后对框坐标的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoxClamp {
  /// 保留超出 [0, 1] 的坐标
  #[default]
  Unclamped,
  /// 各坐标裁剪到 [0, 1]
  UnitSquare,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
  confidence_threshold: f32,
  iou_threshold: f32,
  box_clamp: BoxClamp,
  layout_strategy: LayoutStrategy,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      box_clamp: BoxClamp::default(),
      layout_strategy: LayoutStrategy::default(),
    }
  }
}

impl PipelineConfig {
  pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
    self.iou_threshold = threshold;
    self
  }

  pub fn with_box_clamp(mut self, box_clamp: BoxClamp) -> Self {
    self.box_clamp = box_clamp;
    self
  }

  pub fn with_layout_strategy(mut self, strategy: LayoutStrategy) -> Self {
    self.layout_strategy = strategy;
    self
  }

  pub fn confidence_threshold(&self) -> f32 {
    self.confidence_threshold
  }

  pub fn iou_threshold(&self) -> f32 {
    self.iou_threshold
  }

  pub fn box_clamp(&self) -> BoxClamp {
    self.box_clamp
  }

  pub fn layout_strategy(&self) -> LayoutStrategy {
    self.layout_strategy
  }

  /// 两个阈值都必须落在开区间 (0, 1) 内
  pub fn validate(&self) -> Result<(), SetupError> {
    for (name, value) in [
      ("confidence_threshold", self.confidence_threshold),
      ("iou_threshold", self.iou_threshold),
    ] {
      if !(value > 0.0 && value < 1.0) {
        return Err(SetupError::InvalidConfig(format!(
          "{} 必须位于 (0, 1) 之间, 实际为 {}",
          name, value
        )));
      }
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
  Uninitialized,
  Ready,
  Closed,
}

/// 初始化阶段的错误，流水线保持 `Uninitialized`
#[derive(Error, Debug)]
pub enum SetupError {
  #[error("配置无效: {0}")]
  InvalidConfig(String),
  #[error("当前状态 {0:?} 下不能初始化")]
  InvalidState(PipelineState),
  #[error("推理引擎错误: {0}")]
  Engine(#[from] EngineError),
  #[error("不支持的模型输入形状: {0:?}")]
  UnsupportedInputShape(Vec<usize>),
  #[error("输出布局错误: {0}")]
  Layout(#[from] LayoutError),
  #[error("标签错误: {0}")]
  Labels(#[from] LabelError),
  #[error("模型文件读取错误: {0}")]
  ModelRead(#[from] std::io::Error),
}

/// 单帧错误，只丢弃当前帧
#[derive(Error, Debug, PartialEq)]
pub enum FrameError {
  #[error("颜色转换失败: {0}")]
  Convert(#[from] ConvertError),
  #[error("预处理失败: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("推理失败: {0}")]
  Engine(#[from] EngineError),
  #[error("输出解码失败: {0}")]
  Decode(#[from] DecodeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
  /// 结果已交给接收端，附带检测数
  Delivered(usize),
  /// 出错，错误已交给接收端
  Failed,
  /// 流水线未就绪，帧被忽略
  Skipped,
}

struct Session<E> {
  engine: E,
  decoder: OutputDecoder,
  input_w: usize,
  input_h: usize,
  output: Tensor,
}

enum Stage<E> {
  Uninitialized,
  Ready(Session<E>),
  Closed,
}

/// 跨帧复用的中间缓冲区
struct Scratch {
  converter: YuvToRgbaConverter,
  preprocessor: TensorPreprocessor,
  image: DenseImage,
}

impl Scratch {
  fn process<E: InferenceEngine>(
    &mut self,
    session: &mut Session<E>,
    config: &PipelineConfig,
    frame: &YuvFrame,
    mirror: bool,
  ) -> Result<DetectionSet, FrameError> {
    self.image.ensure_size(frame.width(), frame.height());
    self.converter.convert(frame, &mut self.image)?;

    let input = self
      .preprocessor
      .preprocess(&self.image, session.input_w, session.input_h, mirror)?;
    session.engine.run(input, &mut session.output)?;

    let candidates = session
      .decoder
      .decode(&session.output, config.confidence_threshold)?;
    debug!("候选框数: {}", candidates.len());
    let mut detections = suppress(candidates, config.iou_threshold);

    let (w, h) = (session.input_w as f32, session.input_h as f32);
    match config.box_clamp {
      BoxClamp::Unclamped => detections.map_boxes(|b| b.normalize(w, h)),
      BoxClamp::UnitSquare => detections.map_boxes(|b| b.normalize(w, h).clamp_unit()),
    }
    Ok(detections)
  }
}

/// 由调用方持有的检测流水线句柄
pub struct DetectionPipeline<E> {
  stage: Stage<E>,
  scratch: Scratch,
  sink: Box<dyn DetectionSink>,
  config: PipelineConfig,
}

impl<E: InferenceEngine> DetectionPipeline<E> {
  pub fn new<S: DetectionSink + 'static>(config: PipelineConfig, sink: S) -> Self {
    Self {
      stage: Stage::Uninitialized,
      scratch: Scratch {
        converter: YuvToRgbaConverter::new(),
        preprocessor: TensorPreprocessor::new(),
        image: DenseImage::new(0, 0),
      },
      sink: Box::new(sink),
      config,
    }
  }

  pub fn state(&self) -> PipelineState {
    match self.stage {
      Stage::Uninitialized => PipelineState::Uninitialized,
      Stage::Ready(_) => PipelineState::Ready,
      Stage::Closed => PipelineState::Closed,
    }
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  /// 模型输入尺寸 (宽, 高)，仅在 `Ready` 时可用
  pub fn input_size(&self) -> Option<(usize, usize)> {
    match &self.stage {
      Stage::Ready(session) => Some((session.input_w, session.input_h)),
      _ => None,
    }
  }

  pub fn output_layout(&self) -> Option<&OutputLayout> {
    match &self.stage {
      Stage::Ready(session) => Some(session.decoder.layout()),
      _ => None,
    }
  }

  pub fn init<L>(&mut self, loader: &L, model: &[u8], labels: Labels) -> Result<(), SetupError>
  where
    L: EngineLoader<Engine = E>,
  {
    match self.setup(loader, model, labels) {
      Ok(session) => {
        info!(
          "流水线就绪, 模型输入: {}x{}, 输出形状: {:?}",
          session.input_w,
          session.input_h,
          session.output.shape()
        );
        self.stage = Stage::Ready(session);
        Ok(())
      }
      Err(e) => Err(self.report_setup(e)),
    }
  }

  /// 从文件读取模型与标签后初始化
  pub fn init_from_paths<L, P, Q>(
    &mut self,
    loader: &L,
    model_path: P,
    labels_path: Q,
  ) -> Result<(), SetupError>
  where
    L: EngineLoader<Engine = E>,
    P: AsRef<Path>,
    Q: AsRef<Path>,
  {
    let loaded = self.check_uninitialized().and_then(|()| {
      info!("读取模型文件: {}", model_path.as_ref().display());
      let model = std::fs::read(model_path.as_ref())?;
      info!("读取标签文件: {}", labels_path.as_ref().display());
      let labels = Labels::from_path(labels_path.as_ref())?;
      Ok((model, labels))
    });

    match loaded {
      Ok((model, labels)) => self.init(loader, &model, labels),
      Err(e) => Err(self.report_setup(e)),
    }
  }

  fn check_uninitialized(&self) -> Result<(), SetupError> {
    match self.state() {
      PipelineState::Uninitialized => Ok(()),
      state => Err(SetupError::InvalidState(state)),
    }
  }

  fn setup<L>(&self, loader: &L, model: &[u8], labels: Labels) -> Result<Session<E>, SetupError>
  where
    L: EngineLoader<Engine = E>,
  {
    self.check_uninitialized()?;
    self.config.validate()?;

    let engine = loader.load(model)?;

    let input_shape = engine.input_shape()?;
    let dims = match input_shape[..] {
      [1, h, w, INPUT_CHANNELS] if h > 0 && w > 0 => Some((h, w)),
      _ => None,
    };
    let Some((input_h, input_w)) = dims else {
      return Err(SetupError::UnsupportedInputShape(input_shape));
    };

    let output_shape = engine.output_shape()?;
    let layout = self.config.layout_strategy.negotiate(&output_shape)?;
    info!(
      "输出布局: 通道轴 {}, 通道数 {}, 候选框数 {}",
      layout.channels_axis(),
      layout.channels(),
      layout.boxes()
    );
    if labels.len() != layout.num_classes() {
      warn!(
        "标签数 {} 与模型类别数 {} 不一致",
        labels.len(),
        layout.num_classes()
      );
    }

    Ok(Session {
      engine,
      decoder: OutputDecoder::new(layout, labels),
      input_w,
      input_h,
      output: Tensor::zeros(&output_shape),
    })
  }

  fn report_setup(&mut self, e: SetupError) -> SetupError {
    error!("流水线初始化失败: {}", e);
    self.sink.on_error(&e.to_string());
    e
  }

  /// 处理一帧。只有 `Ready` 状态下才会执行，其余状态直接跳过。
  pub fn detect(&mut self, frame: &YuvFrame, mirror: bool) -> FrameOutcome {
    let Stage::Ready(session) = &mut self.stage else {
      debug!("流水线未就绪, 跳过该帧");
      return FrameOutcome::Skipped;
    };

    let started = Instant::now();
    match self.scratch.process(session, &self.config, frame, mirror) {
      Ok(detections) => {
        let elapsed_millis = started.elapsed().as_millis() as u64;
        debug!("检测完成: {} 个目标, 耗时 {}ms", detections.len(), elapsed_millis);
        self.sink.on_results(&detections, elapsed_millis);
        FrameOutcome::Delivered(detections.len())
      }
      Err(e) => {
        error!("帧处理失败: {}", e);
        self.sink.on_error(&e.to_string());
        FrameOutcome::Failed
      }
    }
  }

  /// 释放推理引擎，可重复调用
  pub fn close(&mut self) {
    match std::mem::replace(&mut self.stage, Stage::Closed) {
      Stage::Ready(session) => {
        info!("关闭流水线, 释放推理引擎");
        drop(session);
      }
      Stage::Uninitialized => debug!("流水线未初始化, 直接关闭"),
      Stage::Closed => {}
    }
  }
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/common/mod.rs - 集成测试用的脚本化推理引擎
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

#![allow(dead_code)]

use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

use shanan_live::frame::{Tensor, YuvFrame, i420_len};
use shanan_live::model::{EngineError, EngineLoader, InferenceEngine};

pub const INPUT_W: usize = 64;
pub const INPUT_H: usize = 64;

/// 引擎与测试之间共享的脚本
#[derive(Default)]
pub struct Script {
  pub output: Vec<f32>,
  pub fail_next: bool,
  pub last_input: Option<Vec<f32>>,
  pub runs: usize,
}

/// `run` 开始时发送 started，然后阻塞直到收到 release
pub struct Gate {
  pub started: Sender<()>,
  pub release: Receiver<()>,
}

pub struct ScriptedEngine {
  input_shape: Vec<usize>,
  output_shape: Vec<usize>,
  script: Arc<Mutex<Script>>,
  gate: Option<Gate>,
  dropped: Option<Sender<Option<String>>>,
}

impl InferenceEngine for ScriptedEngine {
  fn input_shape(&self) -> Result<Vec<usize>, EngineError> {
    Ok(self.input_shape.clone())
  }

  fn output_shape(&self) -> Result<Vec<usize>, EngineError> {
    Ok(self.output_shape.clone())
  }

  fn run(&mut self, input: &Tensor, output: &mut Tensor) -> Result<(), EngineError> {
    if let Some(gate) = &self.gate {
      gate.started.send(()).unwrap();
      gate.release.recv().unwrap();
    }

    let mut script = self.script.lock().unwrap();
    script.runs += 1;
    script.last_input = Some(input.as_slice().to_vec());
    if script.fail_next {
      script.fail_next = false;
      return Err(EngineError::ModelExecutionFailed("脚本注入的失败".to_string()));
    }
    output.as_mut_slice().copy_from_slice(&script.output);
    Ok(())
  }
}

impl Drop for ScriptedEngine {
  fn drop(&mut self) {
    if let Some(tx) = &self.dropped {
      let _ = tx.send(std::thread::current().name().map(str::to_string));
    }
  }
}

pub struct ScriptedLoader {
  pub input_shape: Vec<usize>,
  pub output_shape: Vec<usize>,
  pub script: Arc<Mutex<Script>>,
  pub gate: Mutex<Option<Gate>>,
  pub dropped: Option<Sender<Option<String>>>,
  pub fail_load: bool,
}

impl ScriptedLoader {
  pub fn new(output_shape: &[usize], output: Vec<f32>) -> Self {
    Self {
      input_shape: vec![1, INPUT_H, INPUT_W, 3],
      output_shape: output_shape.to_vec(),
      script: Arc::new(Mutex::new(Script {
        output,
        ..Script::default()
      })),
      gate: Mutex::new(None),
      dropped: None,
      fail_load: false,
    }
  }

  pub fn with_input_shape(mut self, shape: &[usize]) -> Self {
    self.input_shape = shape.to_vec();
    self
  }

  pub fn with_gate(self, gate: Gate) -> Self {
    *self.gate.lock().unwrap() = Some(gate);
    self
  }

  pub fn with_drop_notifier(mut self, tx: Sender<Option<String>>) -> Self {
    self.dropped = Some(tx);
    self
  }

  pub fn failing(mut self) -> Self {
    self.fail_load = true;
    self
  }
}

impl EngineLoader for ScriptedLoader {
  type Engine = ScriptedEngine;

  fn load(&self, _model: &[u8]) -> Result<ScriptedEngine, EngineError> {
    if self.fail_load {
      return Err(EngineError::ModelLoadFailed("模型字节无效".to_string()));
    }
    Ok(ScriptedEngine {
      input_shape: self.input_shape.clone(),
      output_shape: self.output_shape.clone(),
      script: Arc::clone(&self.script),
      gate: self.gate.lock().unwrap().take(),
      dropped: self.dropped.clone(),
    })
  }
}

/// 每行是一个候选框的全部通道，按通道优先排列
pub fn channel_major(rows: &[Vec<f32>]) -> Vec<f32> {
  let boxes = rows.len();
  let channels = rows[0].len();
  let mut data = vec![0.0; boxes * channels];
  for (j, row) in rows.iter().enumerate() {
    for (i, value) in row.iter().enumerate() {
      data[i * boxes + j] = *value;
    }
  }
  data
}

/// 每行是一个候选框的全部通道，按候选框优先排列
pub fn box_major(rows: &[Vec<f32>]) -> Vec<f32> {
  rows.concat()
}

/// (cx, cy, w, h) 之后跟各类别分数
pub fn row(bbox: [f32; 4], scores: &[f32]) -> Vec<f32> {
  let mut values = bbox.to_vec();
  values.extend_from_slice(scores);
  values
}

pub fn gray_frame(width: usize, height: usize) -> YuvFrame {
  YuvFrame::from_i420(width, height, &vec![128; i420_len(width, height)]).unwrap()
}

pub fn labels() -> shanan_live::model::Labels {
  shanan_live::model::Labels::new(["person", "bicycle", "car", "motorcycle", "airplane"])
}

pub fn assert_close(actual: f32, expected: f32) {
  assert!(
    (actual - expected).abs() < 1e-5,
    "期望 {}, 实际 {}",
    expected,
    actual
  );
}

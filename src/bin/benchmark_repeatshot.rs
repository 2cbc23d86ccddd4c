// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 单帧重复检测耗时统计
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use shanan_live::{
  DetectionPipeline, FromUrl, PipelineConfig,
  input::InputWrapper,
  model::OnnxLoader,
  output::OutputWrapper,
  task::{OneShotTask, RepeatShotTask, Task},
};

/// 对单帧重复检测并统计平均耗时
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型，如 onnx:///models/yolov8n.onnx?threads=4
  #[arg(long, value_name = "MODEL")]
  model: Url,
  /// 标签文件
  #[arg(long, value_name = "LABELS")]
  labels: PathBuf,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  input: Url,
  /// 输出
  #[arg(long, value_name = "OUTPUT", default_value = "log://")]
  output: Url,
  /// 重复次数，为 1 时只检测一次
  #[arg(long, default_value_t = 1000)]
  repeat: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出: {}", args.output);

  let loader = OnnxLoader::from_url(&args.model)?;
  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let mut pipeline = DetectionPipeline::new(PipelineConfig::default(), output);
  pipeline.init_from_paths(&loader, loader.model_path(), &args.labels)?;

  if args.repeat <= 1 {
    OneShotTask.run_task(input, pipeline)?;
  } else {
    RepeatShotTask::default()
      .with_repeat_times(args.repeat)
      .run_task(input, pipeline)?;
  }

  Ok(())
}

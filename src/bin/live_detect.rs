// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/live_detect.rs - 连续帧检测
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
use std::time::Duration;
use std::{process, thread};

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use url::Url;

use shanan_live::{
  BoxClamp, DetectionPipeline, FromUrl, PipelineConfig,
  input::InputWrapper,
  model::{LayoutStrategy, OnnxLoader},
  output::OutputWrapper,
  pipeline::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_IOU_THRESHOLD},
  task::{ContinuousTask, Task},
};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Layout {
  Auto,
  ChannelsFirst,
  BoxesFirst,
}

impl From<Layout> for LayoutStrategy {
  fn from(layout: Layout) -> Self {
    match layout {
      Layout::Auto => LayoutStrategy::FirstWideAxis,
      Layout::ChannelsFirst => LayoutStrategy::ChannelsFirst,
      Layout::BoxesFirst => LayoutStrategy::BoxesFirst,
    }
  }
}

/// 连续帧目标检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型，如 onnx:///models/yolov8n.onnx?threads=4
  #[arg(long, value_name = "MODEL")]
  model: Url,
  /// 标签文件，每行一个类别名
  #[arg(long, value_name = "LABELS")]
  labels: PathBuf,
  /// 输入来源，如 yuv:///tmp/cam.yuv?width=640&height=480
  #[arg(long, value_name = "SOURCE")]
  input: Url,
  /// 输出，如 log:// 或 folder:///tmp/records
  #[arg(long, value_name = "OUTPUT", default_value = "log://")]
  output: Url,
  /// 置信度阈值
  #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
  confidence: f32,
  /// NMS IoU 阈值
  #[arg(long, default_value_t = DEFAULT_IOU_THRESHOLD)]
  nms_threshold: f32,
  /// 将框坐标裁剪到 [0, 1]
  #[arg(long)]
  clamp: bool,
  /// 输出张量布局
  #[arg(long, value_enum, default_value = "auto")]
  layout: Layout,
  /// 最大帧数
  #[arg(long, value_name = "FRAME_NUMBER")]
  frame_number: Option<usize>,
  /// 按指定帧率提交帧
  #[arg(long)]
  fps: Option<f64>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("标签文件: {}", args.labels.display());
  info!("输入来源: {}", args.input);
  info!("输出: {}", args.output);

  let loader = OnnxLoader::from_url(&args.model)?;
  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let config = PipelineConfig::default()
    .with_confidence_threshold(args.confidence)
    .with_iou_threshold(args.nms_threshold)
    .with_box_clamp(if args.clamp {
      BoxClamp::UnitSquare
    } else {
      BoxClamp::Unclamped
    })
    .with_layout_strategy(args.layout.into());

  let mut pipeline = DetectionPipeline::new(config, output);
  pipeline.init_from_paths(&loader, loader.model_path(), &args.labels)?;

  let (tx, rx) = std::sync::mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      process::exit(1);
    });
  })?;

  ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .with_frame_interval(
      args
        .fps
        .filter(|fps| *fps > 0.0)
        .map(|fps| Duration::from_secs_f64(1.0 / fps)),
    )
    .with_stop_signal(rx)
    .run_task(input, pipeline)?;

  Ok(())
}

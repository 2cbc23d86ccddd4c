// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/worker.rs - 检测线程与任务测试
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

mod common;

use std::sync::mpsc;
use std::time::Duration;

use common::*;
use shanan_live::{
  DetectionPipeline, PipelineConfig,
  input::CapturedFrame,
  model::DetectionSet,
  output::{ChannelSink, DetectionEvent, DetectionSink},
  task::{ContinuousTask, DetectionWorker, OneShotTask, RepeatShotTask, Task},
};

fn car_loader() -> ScriptedLoader {
  let rows = vec![
    row([32.0, 32.0, 12.8, 12.8], &[0.0, 0.0, 0.9, 0.0, 0.0]),
    row([10.0, 10.0, 4.0, 4.0], &[0.1, 0.0, 0.0, 0.0, 0.0]),
  ];
  ScriptedLoader::new(&[1, 9, 2], channel_major(&rows))
}

fn frames(count: usize) -> Vec<CapturedFrame> {
  (0..count)
    .map(|_| CapturedFrame {
      frame: gray_frame(8, 8),
      mirror: false,
    })
    .collect()
}

#[test]
fn busy_worker_keeps_only_the_latest_frame() {
  let (started_tx, started_rx) = mpsc::channel();
  let (release_tx, release_rx) = mpsc::channel();
  let loader = car_loader().with_gate(Gate {
    started: started_tx,
    release: release_rx,
  });

  let (sink, rx) = ChannelSink::channel();
  let mut pipeline = DetectionPipeline::new(PipelineConfig::default(), sink);
  pipeline.init(&loader, b"model", labels()).unwrap();
  let worker = DetectionWorker::spawn(pipeline).unwrap();

  assert!(!worker.submit(gray_frame(8, 8), false));
  started_rx.recv().unwrap();

  // 第一帧仍在推理中
  assert!(!worker.submit(gray_frame(8, 8), false));
  assert!(worker.submit(gray_frame(8, 8), false));
  assert_eq!(worker.stats().dropped, 1);

  release_tx.send(()).unwrap();
  started_rx.recv().unwrap();
  release_tx.send(()).unwrap();

  for _ in 0..2 {
    assert!(matches!(
      rx.recv_timeout(Duration::from_secs(5)),
      Ok(DetectionEvent::Results(_))
    ));
  }
  worker.drain();

  let stats = worker.shutdown().unwrap();
  assert_eq!(stats.delivered, 2);
  assert_eq!(stats.dropped, 1);
  assert_eq!(loader.script.lock().unwrap().runs, 2);
}

#[test]
fn shutdown_releases_engine_on_worker_thread() {
  let (dropped_tx, dropped_rx) = mpsc::channel();
  let loader = car_loader().with_drop_notifier(dropped_tx);

  let (sink, _rx) = ChannelSink::channel();
  let mut pipeline = DetectionPipeline::new(PipelineConfig::default(), sink);
  pipeline.init(&loader, b"model", labels()).unwrap();
  let worker = DetectionWorker::spawn(pipeline).unwrap();

  worker.submit(gray_frame(8, 8), false);
  worker.drain();
  let stats = worker.shutdown().unwrap();

  assert_eq!(stats.processed(), 1);
  assert_eq!(
    dropped_rx.try_recv().unwrap().as_deref(),
    Some("detection-worker")
  );
}

/// 第一次收到结果时 panic，之后转交给内部回调
struct PanicOnceSink {
  panicked: bool,
  inner: ChannelSink,
}

impl DetectionSink for PanicOnceSink {
  fn on_results(&mut self, detections: &DetectionSet, elapsed_millis: u64) {
    if !self.panicked {
      self.panicked = true;
      panic!("回调崩溃");
    }
    self.inner.on_results(detections, elapsed_millis);
  }

  fn on_error(&mut self, message: &str) {
    self.inner.on_error(message);
  }
}

#[test]
fn panicking_sink_fails_the_frame_without_hanging_drain() {
  let loader = car_loader();
  let (inner, rx) = ChannelSink::channel();
  let sink = PanicOnceSink {
    panicked: false,
    inner,
  };
  let mut pipeline = DetectionPipeline::new(PipelineConfig::default(), sink);
  pipeline.init(&loader, b"model", labels()).unwrap();
  let worker = DetectionWorker::spawn(pipeline).unwrap();

  worker.submit(gray_frame(8, 8), false);
  worker.drain();
  assert_eq!(worker.stats().failed, 1);

  // 线程仍然可用
  worker.submit(gray_frame(8, 8), false);
  worker.drain();
  assert!(matches!(
    rx.recv_timeout(Duration::from_secs(5)),
    Ok(DetectionEvent::Results(_))
  ));

  let stats = worker.shutdown().unwrap();
  assert_eq!(stats.failed, 1);
  assert_eq!(stats.delivered, 1);
}

#[test]
fn uninitialized_pipeline_on_worker_skips_frames() {
  let (sink, rx) = ChannelSink::channel();
  let pipeline: DetectionPipeline<ScriptedEngine> =
    DetectionPipeline::new(PipelineConfig::default(), sink);
  let worker = DetectionWorker::spawn(pipeline).unwrap();

  worker.submit(gray_frame(8, 8), false);
  worker.drain();
  let stats = worker.shutdown().unwrap();

  assert_eq!(stats.skipped, 1);
  assert!(rx.try_recv().is_err());
}

#[test]
fn one_shot_task_processes_first_frame() {
  let loader = car_loader();
  let (sink, rx) = ChannelSink::channel();
  let mut pipeline = DetectionPipeline::new(PipelineConfig::default(), sink);
  pipeline.init(&loader, b"model", labels()).unwrap();

  OneShotTask
    .run_task(frames(3).into_iter(), pipeline)
    .unwrap();

  assert!(matches!(rx.try_recv(), Ok(DetectionEvent::Results(_))));
  assert!(rx.try_recv().is_err());
}

#[test]
fn one_shot_task_without_frames_fails() {
  let loader = car_loader();
  let (sink, _rx) = ChannelSink::channel();
  let mut pipeline = DetectionPipeline::new(PipelineConfig::default(), sink);
  pipeline.init(&loader, b"model", labels()).unwrap();

  assert!(OneShotTask.run_task(frames(0).into_iter(), pipeline).is_err());
}

#[test]
fn repeat_shot_task_reuses_the_first_frame() {
  let loader = car_loader();
  let (sink, rx) = ChannelSink::channel();
  let mut pipeline = DetectionPipeline::new(PipelineConfig::default(), sink);
  pipeline.init(&loader, b"model", labels()).unwrap();

  RepeatShotTask::default()
    .with_repeat_times(5)
    .run_task(frames(1).into_iter(), pipeline)
    .unwrap();

  assert_eq!(rx.try_iter().count(), 5);
}

#[test]
fn continuous_task_processes_the_last_frame() {
  let loader = car_loader();
  let (sink, rx) = ChannelSink::channel();
  let mut pipeline = DetectionPipeline::new(PipelineConfig::default(), sink);
  pipeline.init(&loader, b"model", labels()).unwrap();

  ContinuousTask::default()
    .run_task(frames(4).into_iter(), pipeline)
    .unwrap();

  let delivered = rx.try_iter().count();
  assert!((1..=4).contains(&delivered));
}

#[test]
fn continuous_task_honors_frame_limit() {
  let loader = car_loader();
  let (sink, rx) = ChannelSink::channel();
  let mut pipeline = DetectionPipeline::new(PipelineConfig::default(), sink);
  pipeline.init(&loader, b"model", labels()).unwrap();

  ContinuousTask::default()
    .with_frame_number(Some(2))
    .with_frame_interval(Some(Duration::from_millis(1)))
    .run_task(frames(10).into_iter(), pipeline)
    .unwrap();

  assert!(rx.try_iter().count() <= 2);
  assert!(loader.script.lock().unwrap().runs <= 2);
}

#[test]
fn continuous_task_stops_on_signal() {
  let loader = car_loader();
  let (sink, _rx) = ChannelSink::channel();
  let mut pipeline = DetectionPipeline::new(PipelineConfig::default(), sink);
  pipeline.init(&loader, b"model", labels()).unwrap();

  let (stop_tx, stop_rx) = mpsc::channel();
  stop_tx.send(()).unwrap();
  ContinuousTask::default()
    .with_stop_signal(stop_rx)
    .run_task(frames(10).into_iter(), pipeline)
    .unwrap();

  assert!(loader.script.lock().unwrap().runs <= 1);
}

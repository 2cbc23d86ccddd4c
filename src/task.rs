// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 检测线程与任务
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

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tracing::{debug, error, info, warn};

use crate::{
  frame::YuvFrame,
  input::CapturedFrame,
  model::InferenceEngine,
  pipeline::{DetectionPipeline, FrameOutcome},
};

/// 检测线程的累计统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
  pub delivered: u64,
  pub failed: u64,
  pub skipped: u64,
  /// 尚未处理就被新帧替换的帧数
  pub dropped: u64,
}

impl WorkerStats {
  pub fn processed(&self) -> u64 {
    self.delivered + self.failed + self.skipped
  }

  fn record(&mut self, outcome: FrameOutcome) {
    match outcome {
      FrameOutcome::Delivered(_) => self.delivered += 1,
      FrameOutcome::Failed => self.failed += 1,
      FrameOutcome::Skipped => self.skipped += 1,
    }
  }
}

#[derive(Default)]
struct Slot {
  pending: Option<(YuvFrame, bool)>,
  busy: bool,
  shutdown: bool,
  stats: WorkerStats,
}

#[derive(Default)]
struct Shared {
  slot: Mutex<Slot>,
  ready: Condvar,
  idle: Condvar,
}

impl Shared {
  fn lock(&self) -> MutexGuard<'_, Slot> {
    self.slot.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// 持有流水线的专用检测线程。
///
/// 待处理槽深度为 1：线程忙时提交的新帧会替换尚未处理的旧帧，
/// 结果回调都在该线程上执行。
pub struct DetectionWorker {
  shared: Arc<Shared>,
  handle: Option<JoinHandle<()>>,
}

impl DetectionWorker {
  pub fn spawn<E>(pipeline: DetectionPipeline<E>) -> std::io::Result<Self>
  where
    E: InferenceEngine + 'static,
  {
    let shared = Arc::new(Shared::default());
    let worker_shared = Arc::clone(&shared);
    let handle = thread::Builder::new()
      .name("detection-worker".to_string())
      .spawn(move || worker_loop(pipeline, &worker_shared))?;

    Ok(Self {
      shared,
      handle: Some(handle),
    })
  }

  /// 提交一帧，不阻塞。返回 `true` 表示替换了尚未处理的帧。
  pub fn submit(&self, frame: YuvFrame, mirror: bool) -> bool {
    let mut slot = self.shared.lock();
    if slot.shutdown {
      debug!("检测线程已停止, 丢弃提交的帧");
      return false;
    }
    let replaced = slot.pending.replace((frame, mirror)).is_some();
    if replaced {
      slot.stats.dropped += 1;
      debug!("检测线程忙, 替换未处理的帧");
    }
    drop(slot);
    self.shared.ready.notify_one();
    replaced
  }

  pub fn stats(&self) -> WorkerStats {
    self.shared.lock().stats
  }

  /// 阻塞直到待处理的帧全部处理完
  pub fn drain(&self) {
    let mut slot = self.shared.lock();
    while (slot.pending.is_some() || slot.busy) && !slot.shutdown {
      slot = self
        .shared
        .idle
        .wait(slot)
        .unwrap_or_else(PoisonError::into_inner);
    }
  }

  /// 停止循环，在检测线程上关闭流水线并等待线程结束
  pub fn shutdown(mut self) -> anyhow::Result<WorkerStats> {
    self.stop()?;
    Ok(self.stats())
  }

  fn stop(&mut self) -> anyhow::Result<()> {
    {
      let mut slot = self.shared.lock();
      slot.shutdown = true;
      if slot.pending.take().is_some() {
        slot.stats.dropped += 1;
      }
    }
    self.shared.ready.notify_one();

    if let Some(handle) = self.handle.take() {
      handle.join().map_err(|_| anyhow!("检测线程异常退出"))?;
    }
    Ok(())
  }
}

impl Drop for DetectionWorker {
  fn drop(&mut self) {
    if self.handle.is_some() {
      if let Err(e) = self.stop() {
        warn!("{}", e);
      }
    }
  }
}

/// 检测线程以任何方式退出时都标记停止并唤醒 `drain` 的等待者
struct ExitGuard<'a>(&'a Shared);

impl Drop for ExitGuard<'_> {
  fn drop(&mut self) {
    {
      let mut slot = self.0.lock();
      slot.shutdown = true;
      slot.busy = false;
    }
    self.0.idle.notify_all();
  }
}

fn worker_loop<E: InferenceEngine>(mut pipeline: DetectionPipeline<E>, shared: &Shared) {
  info!("检测线程启动");
  let _guard = ExitGuard(shared);
  loop {
    let job = {
      let mut slot = shared.lock();
      loop {
        if slot.shutdown {
          break None;
        }
        if let Some(job) = slot.pending.take() {
          slot.busy = true;
          break Some(job);
        }
        slot = shared
          .ready
          .wait(slot)
          .unwrap_or_else(PoisonError::into_inner);
      }
    };

    let Some((frame, mirror)) = job else {
      break;
    };
    // 引擎或结果回调 panic 时该帧记为失败，线程继续服务
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| pipeline.detect(&frame, mirror)))
      .unwrap_or_else(|payload| {
        error!("检测帧时发生 panic: {}", panic_message(payload.as_ref()));
        FrameOutcome::Failed
      });
    {
      let mut slot = shared.lock();
      slot.stats.record(outcome);
      slot.busy = false;
    }
    shared.idle.notify_all();
  }
  pipeline.close();
  info!("检测线程退出");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
  payload
    .downcast_ref::<&str>()
    .copied()
    .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
    .unwrap_or("未知原因")
}

pub trait Task<I, E>: Sized {
  type Error;
  fn run_task(self, input: I, pipeline: DetectionPipeline<E>) -> Result<(), Self::Error>;
}

/// 处理第一帧后退出
pub struct OneShotTask;

impl<I, E> Task<I, E> for OneShotTask
where
  I: Iterator<Item = CapturedFrame>,
  E: InferenceEngine,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut pipeline: DetectionPipeline<E>) -> Result<(), Self::Error> {
    info!("开始任务...");
    let captured = input.next().ok_or_else(|| anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始检测...");
    let now = Instant::now();
    let outcome = pipeline.detect(&captured.frame, captured.mirror);
    info!("检测完成，耗时: {:.2?}", now.elapsed());
    pipeline.close();

    match outcome {
      FrameOutcome::Delivered(_) => Ok(()),
      FrameOutcome::Failed => Err(anyhow!("帧处理失败")),
      FrameOutcome::Skipped => Err(anyhow!("流水线未就绪")),
    }
  }
}

/// 对同一帧重复检测，统计平均耗时
pub struct RepeatShotTask {
  repeat_times: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { repeat_times: 1000 }
  }
}

impl RepeatShotTask {
  const WARMUP: usize = 2;

  pub fn with_repeat_times(mut self, repeat_times: usize) -> Self {
    self.repeat_times = repeat_times.max(1);
    self
  }
}

impl<I, E> Task<I, E> for RepeatShotTask
where
  I: Iterator<Item = CapturedFrame>,
  E: InferenceEngine,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut pipeline: DetectionPipeline<E>) -> Result<(), Self::Error> {
    info!("开始任务...");
    let captured = input.next().ok_or_else(|| anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始检测...");
    let mut times = Vec::with_capacity(self.repeat_times);
    for i in 0..self.repeat_times {
      let now = Instant::now();
      let outcome = pipeline.detect(&captured.frame, captured.mirror);
      let elapsed = now.elapsed();
      debug!("({})检测完成，耗时: {:.2?}", i, elapsed);
      if matches!(outcome, FrameOutcome::Delivered(_)) {
        times.push(elapsed);
      }
    }
    pipeline.close();

    if times.is_empty() {
      return Err(anyhow!("没有成功处理的帧"));
    }
    let warmup = Self::WARMUP.min(times.len() - 1);
    let measured = &times[warmup..];
    warn!(
      "平均检测时间: {:.2?} ({} 次)",
      measured.iter().sum::<Duration>() / measured.len() as u32,
      measured.len()
    );

    Ok(())
  }
}

/// 把输入的帧持续提交给检测线程，直到输入结束、达到帧数或收到停止信号
#[derive(Default)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  frame_interval: Option<Duration>,
  stop_signal: Option<Receiver<()>>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 两次提交之间的间隔，用于按相机帧率回放文件
  pub fn with_frame_interval(mut self, frame_interval: Option<Duration>) -> Self {
    self.frame_interval = frame_interval;
    self
  }

  pub fn with_stop_signal(mut self, stop_signal: Receiver<()>) -> Self {
    self.stop_signal = Some(stop_signal);
    self
  }

  fn stop_requested(&self) -> bool {
    self
      .stop_signal
      .as_ref()
      .map(|rx| rx.try_recv().is_ok())
      .unwrap_or(false)
  }
}

impl<I, E> Task<I, E> for ContinuousTask
where
  I: Iterator<Item = CapturedFrame>,
  E: InferenceEngine + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, pipeline: DetectionPipeline<E>) -> Result<(), Self::Error> {
    info!("开始任务...");
    let worker = DetectionWorker::spawn(pipeline)?;

    let mut frame_index = 0usize;
    let mut interrupted = false;
    for captured in input {
      frame_index += 1;
      debug!("提交第 {} 帧图像", frame_index);
      worker.submit(captured.frame, captured.mirror);

      if self.frame_number.map(|n| frame_index >= n).unwrap_or(false) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if self.stop_requested() {
        warn!("中断信号接收，退出任务循环");
        interrupted = true;
        break;
      }
      if let Some(interval) = self.frame_interval {
        thread::sleep(interval);
      }
    }

    if !interrupted {
      worker.drain();
    }

    let stats = worker.shutdown()?;
    info!(
      "任务完成: 提交 {} 帧, 输出 {} 帧, 失败 {} 帧, 丢弃 {} 帧",
      frame_index, stats.delivered, stats.failed, stats.dropped
    );
    Ok(())
  }
}

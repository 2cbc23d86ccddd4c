// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output.rs - 检测结果输出
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

use std::sync::mpsc::{self, Receiver, Sender};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::FromUrl;
#[cfg(feature = "directory_record")]
use crate::FromUrlWithScheme;
use crate::model::DetectionSet;

/// 结果接收端，回调在工作线程上执行
pub trait DetectionSink: Send {
  fn on_results(&mut self, detections: &DetectionSet, elapsed_millis: u64);
  fn on_error(&mut self, message: &str);
}

impl<S: DetectionSink + ?Sized> DetectionSink for Box<S> {
  fn on_results(&mut self, detections: &DetectionSet, elapsed_millis: u64) {
    (**self).on_results(detections, elapsed_millis)
  }

  fn on_error(&mut self, message: &str) {
    (**self).on_error(message)
  }
}

/// 单帧的不可变处理结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
  pub detections: DetectionSet,
  pub elapsed_millis: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetectionEvent {
  Results(DetectionReport),
  Error(String),
}

/// 以日志形式输出每帧摘要
#[derive(Debug, Default)]
pub struct LogSink;

impl DetectionSink for LogSink {
  fn on_results(&mut self, detections: &DetectionSet, elapsed_millis: u64) {
    info!("检测数: {} | 耗时: {}ms", detections.len(), elapsed_millis);
    for det in detections {
      debug!(
        "  - {}: {:.2}% at ({:.3}, {:.3}, {:.3}, {:.3})",
        det.label,
        det.confidence * 100.0,
        det.bbox.left,
        det.bbox.top,
        det.bbox.right,
        det.bbox.bottom
      );
    }
  }

  fn on_error(&mut self, message: &str) {
    error!("错误: {}", message);
  }
}

/// 把每帧结果作为消息发送给其他线程，由接收方决定如何转交给界面
pub struct ChannelSink {
  tx: Sender<DetectionEvent>,
}

impl ChannelSink {
  pub fn new(tx: Sender<DetectionEvent>) -> Self {
    Self { tx }
  }

  pub fn channel() -> (Self, Receiver<DetectionEvent>) {
    let (tx, rx) = mpsc::channel();
    (Self::new(tx), rx)
  }

  fn send(&self, event: DetectionEvent) {
    if self.tx.send(event).is_err() {
      debug!("结果接收方已关闭，丢弃消息");
    }
  }
}

impl DetectionSink for ChannelSink {
  fn on_results(&mut self, detections: &DetectionSet, elapsed_millis: u64) {
    self.send(DetectionEvent::Results(DetectionReport {
      detections: detections.clone(),
      elapsed_millis,
    }));
  }

  fn on_error(&mut self, message: &str) {
    self.send(DetectionEvent::Error(message.to_string()));
  }
}

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{RecordSink, RecordSinkError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  RecordSinkError(#[from] RecordSinkError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  Log(LogSink),
  #[cfg(feature = "directory_record")]
  Record(RecordSink),
}

const LOG_SCHEME: &str = "log";

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      LOG_SCHEME => Ok(OutputWrapper::Log(LogSink)),
      #[cfg(feature = "directory_record")]
      RecordSink::SCHEME => Ok(OutputWrapper::Record(RecordSink::from_url(url)?)),
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl DetectionSink for OutputWrapper {
  fn on_results(&mut self, detections: &DetectionSet, elapsed_millis: u64) {
    match self {
      OutputWrapper::Log(sink) => sink.on_results(detections, elapsed_millis),
      #[cfg(feature = "directory_record")]
      OutputWrapper::Record(sink) => sink.on_results(detections, elapsed_millis),
    }
  }

  fn on_error(&mut self, message: &str) {
    match self {
      OutputWrapper::Log(sink) => sink.on_error(message),
      #[cfg(feature = "directory_record")]
      OutputWrapper::Record(sink) => sink.on_error(message),
    }
  }
}

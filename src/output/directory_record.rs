// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::{Datelike, Utc};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, model::DetectionSet, output::DetectionSink};

const RECORD_FILE: &str = "detections.jsonl";

#[derive(Error, Debug)]
pub enum RecordSinkError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 按日期分目录，每帧追加一行 JSON 记录
pub struct RecordSink {
  directory: PathBuf,
  label_with_name: bool,
  always: bool,
  frame_counter: u64,
}

impl FromUrlWithScheme for RecordSink {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for RecordSink {
  type Error = RecordSinkError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(RecordSinkError::SchemeMismatch);
    }

    let label_with_name = !uri.query_pairs().any(|(k, v)| k == "record" && v == "id");
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(RecordSink {
      directory: PathBuf::from(uri.path()),
      label_with_name,
      always,
      frame_counter: 0,
    })
  }
}

impl RecordSink {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      label_with_name: true,
      always: false,
      frame_counter: 0,
    }
  }

  /// 没有检测结果的帧也记录
  pub fn always(mut self, always: bool) -> Self {
    self.always = always;
    self
  }

  pub fn label_with_name(mut self, label_with_name: bool) -> Self {
    self.label_with_name = label_with_name;
    self
  }

  fn record_path(&self) -> Result<PathBuf, RecordSinkError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;
    Ok(directory.join(RECORD_FILE))
  }

  fn append(&self, record: &Value) -> Result<(), RecordSinkError> {
    let path = self.record_path()?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    serde_json::to_writer(&mut file, record)?;
    file.write_all(b"\n")?;
    Ok(())
  }

  fn results_record(&self, detections: &DetectionSet, elapsed_millis: u64) -> Value {
    let items: Vec<Value> = detections
      .iter()
      .map(|det| {
        let label = if self.label_with_name {
          json!(det.label)
        } else {
          json!(det.class_id)
        };
        json!({
          "label": label,
          "score": det.confidence,
          "bbox": [det.bbox.left, det.bbox.top, det.bbox.right, det.bbox.bottom],
        })
      })
      .collect();

    json!({
      "frame": self.frame_counter,
      "timestamp": Utc::now().to_rfc3339(),
      "elapsed_ms": elapsed_millis,
      "detections": items,
    })
  }
}

impl DetectionSink for RecordSink {
  fn on_results(&mut self, detections: &DetectionSet, elapsed_millis: u64) {
    self.frame_counter += 1;
    if !self.always && detections.is_empty() {
      return;
    }
    let record = self.results_record(detections, elapsed_millis);
    if let Err(e) = self.append(&record) {
      error!("写入检测记录失败: {}", e);
    }
  }

  fn on_error(&mut self, message: &str) {
    self.frame_counter += 1;
    let record = json!({
      "frame": self.frame_counter,
      "timestamp": Utc::now().to_rfc3339(),
      "error": message,
    });
    if let Err(e) = self.append(&record) {
      error!("写入错误记录失败: {}", e);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{BoundingBox, Detection};
  use crate::model::suppress;

  fn read_records(root: &std::path::Path) -> Vec<Value> {
    let mut records = Vec::new();
    for year in std::fs::read_dir(root).unwrap() {
      for month in std::fs::read_dir(year.unwrap().path()).unwrap() {
        for day in std::fs::read_dir(month.unwrap().path()).unwrap() {
          let text = std::fs::read_to_string(day.unwrap().path().join(RECORD_FILE)).unwrap();
          for line in text.lines() {
            records.push(serde_json::from_str(line).unwrap());
          }
        }
      }
    }
    records
  }

  #[test]
  fn records_results_and_errors() {
    let dir = tempfile::tempdir().unwrap();
    let mut sink = RecordSink::new(dir.path());

    let set = suppress(
      vec![Detection {
        bbox: BoundingBox::new(0.1, 0.2, 0.3, 0.4),
        label: "cat".to_string(),
        class_id: 15,
        confidence: 0.75,
      }],
      0.5,
    );
    sink.on_results(&DetectionSet::default(), 3);
    sink.on_results(&set, 5);
    sink.on_error("推理失败");

    let records = read_records(dir.path());
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["frame"], 2);
    assert_eq!(records[0]["elapsed_ms"], 5);
    assert_eq!(records[0]["detections"][0]["label"], "cat");
    assert_eq!(records[1]["error"], "推理失败");
  }

  #[test]
  fn from_url_reads_options() {
    let url = Url::parse("folder:///tmp/records?record=id&always").unwrap();
    let sink = RecordSink::from_url(&url).unwrap();
    assert!(!sink.label_with_name);
    assert!(sink.always);
    assert_eq!(sink.directory, PathBuf::from("/tmp/records"));
  }
}

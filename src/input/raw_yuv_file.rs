// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/raw_yuv_file.rs - 原始 I420 帧文件输入
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

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};

use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{YuvFrame, i420_len},
  input::CapturedFrame,
};

#[derive(Error, Debug)]
pub enum RawYuvFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("缺少参数: {0}")]
  MissingParameter(&'static str),
  #[error("参数 {0} 无效: {1}")]
  InvalidParameter(String, String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 按顺序读取紧密排列的 I420 帧，如 `yuv:///tmp/cam.yuv?width=640&height=480&mirror`
pub struct RawYuvFileInput {
  reader: BufReader<File>,
  width: usize,
  height: usize,
  mirror: bool,
  buffer: Vec<u8>,
}

impl FromUrlWithScheme for RawYuvFileInput {
  const SCHEME: &'static str = "yuv";
}

impl FromUrl for RawYuvFileInput {
  type Error = RawYuvFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(RawYuvFileInputError::SchemeMismatch);
    }

    let mut width = None;
    let mut height = None;
    let mut mirror = false;
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "width" => width = Some(parse_dimension(&k, &v)?),
        "height" => height = Some(parse_dimension(&k, &v)?),
        "mirror" => mirror = v != "false",
        _ => warn!("忽略未知参数: {}={}", k, v),
      }
    }
    let width = width.ok_or(RawYuvFileInputError::MissingParameter("width"))?;
    let height = height.ok_or(RawYuvFileInputError::MissingParameter("height"))?;

    let file = File::open(url.path())?;
    Ok(RawYuvFileInput {
      reader: BufReader::new(file),
      width,
      height,
      mirror,
      buffer: vec![0u8; i420_len(width, height)],
    })
  }
}

fn parse_dimension(key: &str, value: &str) -> Result<usize, RawYuvFileInputError> {
  match value.parse::<usize>() {
    Ok(n) if n > 0 => Ok(n),
    _ => Err(RawYuvFileInputError::InvalidParameter(
      key.to_string(),
      value.to_string(),
    )),
  }
}

impl RawYuvFileInput {
  pub fn width(&self) -> usize {
    self.width
  }

  pub fn height(&self) -> usize {
    self.height
  }
}

impl Iterator for RawYuvFileInput {
  type Item = CapturedFrame;

  fn next(&mut self) -> Option<Self::Item> {
    match self.reader.read_exact(&mut self.buffer) {
      Ok(()) => {}
      Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
        debug!("YUV 文件读取结束");
        return None;
      }
      Err(e) => {
        error!("读取 YUV 帧失败: {}", e);
        return None;
      }
    }

    match YuvFrame::from_i420(self.width, self.height, &self.buffer) {
      Ok(frame) => Some(CapturedFrame {
        frame,
        mirror: self.mirror,
      }),
      Err(e) => {
        error!("YUV 帧拆分失败: {}", e);
        None
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use super::*;

  #[test]
  fn reads_whole_frames_and_stops_at_partial_tail() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let frame_len = i420_len(4, 2);
    let mut data: Vec<u8> = (0..2 * frame_len).map(|i| i as u8).collect();
    data.extend_from_slice(&[0, 1, 2]);
    file.write_all(&data).unwrap();

    let url = Url::parse(&format!(
      "yuv://{}?width=4&height=2&mirror",
      file.path().display()
    ))
    .unwrap();
    let input = RawYuvFileInput::from_url(&url).unwrap();
    let frames: Vec<CapturedFrame> = input.collect();

    assert_eq!(frames.len(), 2);
    assert!(frames[0].mirror);
    assert_eq!(frames[1].frame.y().data()[0], frame_len as u8);
  }

  #[test]
  fn missing_dimension_is_rejected() {
    let url = Url::parse("yuv:///tmp/none.yuv?width=4").unwrap();
    assert!(matches!(
      RawYuvFileInput::from_url(&url),
      Err(RawYuvFileInputError::MissingParameter("height"))
    ));
  }

  #[test]
  fn zero_dimension_is_rejected() {
    let url = Url::parse("yuv:///tmp/none.yuv?width=0&height=4").unwrap();
    assert!(matches!(
      RawYuvFileInput::from_url(&url),
      Err(RawYuvFileInputError::InvalidParameter(_, _))
    ));
  }
}

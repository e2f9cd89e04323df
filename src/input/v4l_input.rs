// 该文件是 Chongshi （虫识） 项目的一部分。
// src/input/v4l_input.rs - V4L2 摄像头拍照输入
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

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;
use v4l::{
  FourCC, buffer::Type, io::mmap::Stream, io::traits::CaptureStream, prelude::*, video::Capture,
};

use crate::{FromUrl, FromUrlWithScheme, url_path};

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const BUFFER_COUNT: u32 = 4;

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无效参数: {0}")]
  InvalidParameter(String),
  #[error("无法打开设备 {0}: {1}")]
  DeviceError(String, std::io::Error),
  #[error("捕获失败: {0}")]
  CaptureError(std::io::Error),
  #[error("设备不支持 YUYV 格式")]
  UnsupportedPixelFormat,
  #[error("缓冲区大小不匹配: 期望 {expected}, 实际 {actual}")]
  BufferSizeMismatch { expected: usize, actual: usize },
}

/// 摄像头拍照，每次迭代抓取一帧
///
/// 参数: `v4l:///dev/video0?width=640&height=480&frames=1`，
/// `frames` 为 0 表示持续拍摄。
pub struct V4lInput {
  device: Device,
  width: u32,
  height: u32,
  frames: usize,
  captured: usize,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

fn parse_param<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, V4lInputError> {
  value
    .parse()
    .map_err(|_| V4lInputError::InvalidParameter(format!("{}={}", key, value)))
}

impl FromUrl for V4lInput {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemeMismatch(url.scheme().to_string()));
    }

    let path = url_path(url);
    let device_path = if path.is_empty() || path == "/" {
      DEFAULT_DEVICE.to_string()
    } else {
      path
    };

    let mut width = DEFAULT_WIDTH;
    let mut height = DEFAULT_HEIGHT;
    let mut frames = 1;
    for (k, v) in url.query_pairs() {
      match &*k {
        "width" => width = parse_param(&k, &v)?,
        "height" => height = parse_param(&k, &v)?,
        "frames" => frames = parse_param(&k, &v)?,
        _ => {}
      }
    }

    Self::open(&device_path, width, height, frames)
  }
}

impl V4lInput {
  pub fn open(
    device_path: &str,
    width: u32,
    height: u32,
    frames: usize,
  ) -> Result<Self, V4lInputError> {
    let device = Device::with_path(device_path)
      .map_err(|e| V4lInputError::DeviceError(device_path.to_string(), e))?;

    let mut format = device
      .format()
      .map_err(|e| V4lInputError::DeviceError(device_path.to_string(), e))?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device
      .set_format(&format)
      .map_err(|e| V4lInputError::DeviceError(device_path.to_string(), e))?;
    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(V4lInputError::UnsupportedPixelFormat);
    }

    info!(
      "打开摄像头 {}: {}x{}",
      device_path, format.width, format.height
    );
    Ok(Self {
      device,
      width: format.width,
      height: format.height,
      frames,
      captured: 0,
    })
  }

  fn capture(&self) -> Result<RgbImage, V4lInputError> {
    let mut stream = Stream::with_buffers(&self.device, Type::VideoCapture, BUFFER_COUNT)
      .map_err(V4lInputError::CaptureError)?;
    let (buffer, meta) = stream.next().map_err(V4lInputError::CaptureError)?;
    debug!("捕获帧: 序号 {}, {} 字节", meta.sequence, buffer.len());
    yuyv_to_rgb(buffer, self.width, self.height)
  }
}

/// YUYV 4:2:2 → RGB，每 4 字节两个像素
pub(crate) fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, V4lInputError> {
  let expected = (width * height * 2) as usize;
  if yuyv.len() < expected {
    return Err(V4lInputError::BufferSizeMismatch {
      expected,
      actual: yuyv.len(),
    });
  }

  let mut rgb = Vec::with_capacity((width * height * 3) as usize);
  for chunk in yuyv[..expected].chunks_exact(4) {
    let u = chunk[1] as f32 - 128.0;
    let v = chunk[3] as f32 - 128.0;
    for y in [chunk[0] as f32, chunk[2] as f32] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  RgbImage::from_raw(width, height, rgb).ok_or(V4lInputError::BufferSizeMismatch {
    expected,
    actual: yuyv.len(),
  })
}

impl Iterator for V4lInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    if self.frames != 0 && self.captured >= self.frames {
      return None;
    }
    match self.capture() {
      Ok(image) => {
        self.captured += 1;
        Some(image)
      }
      Err(e) => {
        error!("摄像头拍照失败: {}", e);
        None
      }
    }
  }
}

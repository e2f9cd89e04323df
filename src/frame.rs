// 该文件是 Chongshi （虫识） 项目的一部分。
// src/frame.rs - 图像与张量数据定义
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

use image::{DynamicImage, GenericImageView, ImageBuffer, Rgb, RgbImage, RgbaImage};

pub const RGB_CHANNELS: usize = 3;

/// 像素来源：任何能按坐标给出 RGB 值的图像
pub trait PixelSource {
  fn width(&self) -> u32;
  fn height(&self) -> u32;
  fn rgb(&self, x: u32, y: u32) -> [u8; 3];

  fn is_empty(&self) -> bool {
    self.width() == 0 || self.height() == 0
  }

  fn to_rgb_image(&self) -> RgbImage {
    ImageBuffer::from_fn(self.width(), self.height(), |x, y| Rgb(self.rgb(x, y)))
  }
}

impl PixelSource for RgbImage {
  fn width(&self) -> u32 {
    self.dimensions().0
  }

  fn height(&self) -> u32 {
    self.dimensions().1
  }

  fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
    self.get_pixel(x, y).0
  }

  fn to_rgb_image(&self) -> RgbImage {
    self.clone()
  }
}

impl PixelSource for RgbaImage {
  fn width(&self) -> u32 {
    self.dimensions().0
  }

  fn height(&self) -> u32 {
    self.dimensions().1
  }

  // 忽略 alpha 通道
  fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
    let pixel = self.get_pixel(x, y);
    [pixel[0], pixel[1], pixel[2]]
  }
}

impl PixelSource for DynamicImage {
  fn width(&self) -> u32 {
    GenericImageView::width(self)
  }

  fn height(&self) -> u32 {
    GenericImageView::height(self)
  }

  fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
    let pixel = self.get_pixel(x, y);
    [pixel[0], pixel[1], pixel[2]]
  }

  fn to_rgb_image(&self) -> RgbImage {
    self.to_rgb8()
  }
}

/// NHWC 张量形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorShape {
  pub batch: usize,
  pub height: usize,
  pub width: usize,
  pub channels: usize,
}

impl TensorShape {
  pub fn nhwc(batch: usize, height: usize, width: usize, channels: usize) -> Self {
    Self {
      batch,
      height,
      width,
      channels,
    }
  }

  /// `[1, size, size, 3]`
  pub fn square_rgb(size: usize) -> Self {
    Self::nhwc(1, size, size, RGB_CHANNELS)
  }

  /// 从推理后端给出的维度构造形状，动态批次维（<= 0）按 1 处理
  pub fn from_dims(dims: &[i64]) -> Option<Self> {
    if dims.len() != 4 {
      return None;
    }
    let batch = if dims[0] <= 0 { 1 } else { dims[0] as usize };
    let rest = [dims[1], dims[2], dims[3]];
    if rest.iter().any(|&d| d <= 0) {
      return None;
    }
    Some(Self::nhwc(
      batch,
      rest[0] as usize,
      rest[1] as usize,
      rest[2] as usize,
    ))
  }

  pub fn element_count(&self) -> usize {
    self.batch * self.height * self.width * self.channels
  }

  /// 单批次、正方形、三通道时返回边长
  pub fn square_size(&self) -> Option<u32> {
    if self.batch == 1 && self.height == self.width && self.channels == RGB_CHANNELS && self.height > 0 {
      u32::try_from(self.height).ok()
    } else {
      None
    }
  }
}

impl std::fmt::Display for TensorShape {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "[{}, {}, {}, {}]",
      self.batch, self.height, self.width, self.channels
    )
  }
}

/// 归一化后的模型输入，NHWC 排列，取值 [0, 1]
#[derive(Debug, Clone)]
pub struct NormalizedInput {
  shape: TensorShape,
  data: Box<[f32]>,
}

impl NormalizedInput {
  pub(crate) fn from_parts(shape: TensorShape, data: Vec<f32>) -> Self {
    debug_assert_eq!(shape.element_count(), data.len());
    Self {
      shape,
      data: data.into_boxed_slice(),
    }
  }

  pub fn shape(&self) -> &TensorShape {
    &self.shape
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }
}

/// 模型原始输出，每个类别一个分数
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScoreVector {
  scores: Box<[f32]>,
}

impl ScoreVector {
  pub fn as_slice(&self) -> &[f32] {
    &self.scores
  }

  pub fn len(&self) -> usize {
    self.scores.len()
  }

  pub fn is_empty(&self) -> bool {
    self.scores.is_empty()
  }
}

impl From<Vec<f32>> for ScoreVector {
  fn from(scores: Vec<f32>) -> Self {
    Self {
      scores: scores.into_boxed_slice(),
    }
  }
}

impl From<&[f32]> for ScoreVector {
  fn from(scores: &[f32]) -> Self {
    Self {
      scores: scores.into(),
    }
  }
}

// 该文件是 Chongshi （虫识） 项目的一部分。
// src/preprocess.rs - 图像归一化
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

use image::imageops::FilterType;
use thiserror::Error;
use tracing::debug;

use crate::frame::{NormalizedInput, PixelSource, RGB_CHANNELS, TensorShape};

const PIXEL_MAX: f32 = 255.0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
  #[error("无效图像: 尺寸为 {0}x{1}")]
  InvalidImage(u32, u32),
  #[error("目标尺寸必须为正整数")]
  InvalidTargetSize,
  #[error("不支持的模型输入形状: {0}")]
  UnsupportedShape(TensorShape),
}

/// 将任意分辨率的图像拉伸到 `target_size × target_size`，
/// 并按行优先、RGB 交错的顺序写出 [0, 1] 范围的浮点数据。
///
/// 不保持宽高比。
pub fn normalize<P: PixelSource + ?Sized>(
  image: &P,
  target_size: u32,
) -> Result<NormalizedInput, NormalizeError> {
  if image.is_empty() {
    return Err(NormalizeError::InvalidImage(image.width(), image.height()));
  }
  if target_size == 0 {
    return Err(NormalizeError::InvalidTargetSize);
  }

  debug!(
    "归一化图像: {}x{} -> {}x{}",
    image.width(),
    image.height(),
    target_size,
    target_size
  );

  let rgb = image.to_rgb_image();
  let resized = if rgb.dimensions() == (target_size, target_size) {
    rgb
  } else {
    image::imageops::resize(&rgb, target_size, target_size, FilterType::Triangle)
  };

  let size = target_size as usize;
  let mut data = Vec::with_capacity(size * size * RGB_CHANNELS);
  for y in 0..target_size {
    for x in 0..target_size {
      let pixel = resized.get_pixel(x, y);
      for c in 0..RGB_CHANNELS {
        data.push(pixel[c] as f32 / PIXEL_MAX);
      }
    }
  }

  Ok(NormalizedInput::from_parts(TensorShape::square_rgb(size), data))
}

/// 按模型声明的输入形状归一化，形状必须是 `[1, S, S, 3]`
pub fn normalize_for<P: PixelSource + ?Sized>(
  image: &P,
  shape: &TensorShape,
) -> Result<NormalizedInput, NormalizeError> {
  let size = shape
    .square_size()
    .ok_or(NormalizeError::UnsupportedShape(*shape))?;
  normalize(image, size)
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  #[test]
  fn output_length_matches_square_shape() {
    let image = RgbImage::from_fn(37, 21, |x, y| Rgb([(x * 7) as u8, (y * 11) as u8, 200]));
    let input = normalize(&image, 8).unwrap();
    assert_eq!(input.len(), 8 * 8 * 3);
    assert_eq!(input.shape(), &TensorShape::square_rgb(8));
    assert!(input.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
  }

  #[test]
  fn channels_are_interleaved_row_major() {
    let mut image = RgbImage::new(2, 2);
    image.put_pixel(0, 0, Rgb([255, 0, 0]));
    image.put_pixel(1, 0, Rgb([0, 255, 0]));
    image.put_pixel(0, 1, Rgb([0, 0, 255]));
    image.put_pixel(1, 1, Rgb([51, 102, 153]));

    let input = normalize(&image, 2).unwrap();
    let expected = [
      1.0, 0.0, 0.0, //
      0.0, 1.0, 0.0, //
      0.0, 0.0, 1.0, //
      0.2, 0.4, 0.6,
    ];
    for (got, want) in input.as_slice().iter().zip(expected) {
      assert!((got - want).abs() < 1e-6, "{got} != {want}");
    }
  }

  #[test]
  fn input_image_is_not_modified() {
    let image = RgbImage::from_pixel(5, 3, Rgb([9, 8, 7]));
    let before = image.clone();
    let _ = normalize(&image, 4).unwrap();
    assert_eq!(image, before);
  }

  #[test]
  fn zero_sized_image_is_invalid() {
    let image = RgbImage::new(0, 0);
    assert_eq!(
      normalize(&image, 4).unwrap_err(),
      NormalizeError::InvalidImage(0, 0)
    );
  }

  #[test]
  fn zero_target_size_is_rejected() {
    let image = RgbImage::new(3, 3);
    assert_eq!(
      normalize(&image, 0).unwrap_err(),
      NormalizeError::InvalidTargetSize
    );
  }

  #[test]
  fn channel_first_shape_is_unsupported() {
    let image = RgbImage::new(3, 3);
    let shape = TensorShape::nhwc(1, 3, 224, 224);
    assert!(matches!(
      normalize_for(&image, &shape),
      Err(NormalizeError::UnsupportedShape(_))
    ));
  }
}

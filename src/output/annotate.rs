// 该文件是 Chongshi （虫识） 项目的一部分。
// src/output/annotate.rs - 识别结果标注
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

use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut},
  rect::Rect,
};

use crate::interpret::Assessment;

const BANNER_RATIO: u32 = 8; // 横幅高度 = 图像高度 / 8
const MIN_BANNER_HEIGHT: u32 = 4;
const BAR_MARGIN: u32 = 2;

const HEALTHY_COLOR: [u8; 3] = [46, 160, 67]; // 绿色
const DETECTED_COLOR: [u8; 3] = [218, 54, 51]; // 红色
const LOW_CONFIDENCE_COLOR: [u8; 3] = [230, 160, 20]; // 橙色
const FAILED_COLOR: [u8; 3] = [110, 110, 110]; // 灰色
const BAR_COLOR: [u8; 3] = [255, 255, 255];

/// 在图像底部绘制结果横幅与置信度条
pub struct Annotate {
  banner_ratio: u32,
  min_banner_height: u32,
  bar_margin: u32,
}

impl Default for Annotate {
  fn default() -> Self {
    Self {
      banner_ratio: BANNER_RATIO,
      min_banner_height: MIN_BANNER_HEIGHT,
      bar_margin: BAR_MARGIN,
    }
  }
}

pub fn verdict_color(assessment: &Assessment) -> [u8; 3] {
  match assessment {
    Assessment::Failed => FAILED_COLOR,
    Assessment::LowConfidence { .. } => LOW_CONFIDENCE_COLOR,
    Assessment::Healthy { .. } => HEALTHY_COLOR,
    Assessment::Detected { .. } => DETECTED_COLOR,
  }
}

impl Annotate {
  fn banner_height(&self, image_height: u32) -> u32 {
    (image_height / self.banner_ratio)
      .max(self.min_banner_height)
      .min(image_height)
  }

  pub fn annotate(&self, frame: &RgbImage, assessment: &Assessment) -> RgbImage {
    let mut image = frame.clone();
    self.annotate_mut(&mut image, assessment);
    image
  }

  pub fn annotate_mut(&self, image: &mut RgbImage, assessment: &Assessment) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return;
    }

    let banner = self.banner_height(height);
    let top = height - banner;
    let color = Rgb(verdict_color(assessment));
    draw_filled_rect_mut(
      image,
      Rect::at(0, top as i32).of_size(width, banner),
      color,
    );

    // 横幅太小时只画底色
    let margin = self.bar_margin;
    if width <= margin * 2 || banner <= margin * 2 {
      return;
    }
    let track_width = width - margin * 2;
    let track_height = banner - margin * 2;
    let track = Rect::at(margin as i32, (top + margin) as i32).of_size(track_width, track_height);
    draw_hollow_rect_mut(image, track, Rgb(BAR_COLOR));

    let ratio = (assessment.confidence_percent() / 100.0).clamp(0.0, 1.0);
    let filled = (track_width as f32 * ratio).round() as u32;
    if filled > 0 {
      draw_filled_rect_mut(
        image,
        Rect::at(margin as i32, (top + margin) as i32).of_size(filled, track_height),
        Rgb(BAR_COLOR),
      );
    }
  }
}

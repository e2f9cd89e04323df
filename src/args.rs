// 该文件是 Chongshi （虫识） 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::Parser;
use tracing::info;
use url::Url;

use crate::interpret::{DEFAULT_DISPLAY_THRESHOLD, DisplayPolicy};

/// Chongshi 病虫害识别参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，方案选择推理后端，例如 onnx:///models/pest_detector.onnx
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 标签清单（JSON，包含 idx_to_class 字段）
  #[arg(long, value_name = "LABELS")]
  pub labels: PathBuf,

  /// 采集来源: image:///a.jpg, folder:///captures, v4l:///dev/video0
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出: log://, image:///out.png, folder:///records?always
  #[arg(long, value_name = "OUTPUT", default_value = "log://")]
  pub output: Url,

  /// 展示阈值（百分比），置信度不高于该值时提示重拍
  #[arg(long, value_name = "PERCENT", default_value_t = DEFAULT_DISPLAY_THRESHOLD)]
  pub threshold: f32,

  /// 连续模式下最多处理的图像数量
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}

impl Args {
  pub fn policy(&self) -> DisplayPolicy {
    DisplayPolicy::with_threshold(self.threshold)
  }

  pub fn log(&self) {
    info!("模型: {}", self.model);
    info!("标签清单: {}", self.labels.display());
    info!("采集来源: {}", self.input);
    info!("输出: {}", self.output);
    info!("展示阈值: {:.1}%", self.threshold);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_apply() {
    let args = Args::try_parse_from([
      "chongshi",
      "--model",
      "onnx:///models/pest_detector.onnx",
      "--labels",
      "/models/class_info.json",
      "--input",
      "image:///captures/leaf.jpg",
    ])
    .unwrap();
    assert_eq!(args.output.scheme(), "log");
    assert_eq!(args.policy(), DisplayPolicy::default());
    assert!(args.frame_number.is_none());
  }
}

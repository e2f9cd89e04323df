// 该文件是 Chongshi （虫识） 项目的一部分。
// src/output/save_image_file.rs - 保存标注后的图像
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  interpret::{ClassificationResult, DisplayPolicy},
  output::{Render, annotate::Annotate, policy_from_url},
  url_path,
};

pub struct SaveImageFileOutput {
  path: PathBuf,
  policy: DisplayPolicy,
  annotate: Annotate,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无效参数: {0}")]
  InvalidParameter(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let policy = policy_from_url(uri).map_err(SaveImageFileError::InvalidParameter)?;
    Ok(SaveImageFileOutput::new(url_path(uri)).with_policy(policy))
  }
}

impl SaveImageFileOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      policy: DisplayPolicy::default(),
      annotate: Annotate::default(),
    }
  }

  pub fn with_policy(mut self, policy: DisplayPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn save_image(&self, image: &RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;
    info!("保存图像到文件: {}", self.path.display());
    Ok(())
  }
}

impl Render<RgbImage, ClassificationResult> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(
    &self,
    frame: &RgbImage,
    result: &ClassificationResult,
  ) -> Result<(), Self::Error> {
    let assessment = self.policy.assess(result);
    let image = self.annotate.annotate(frame, &assessment);
    self.save_image(&image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out/nested/leaf.png");
    let output = SaveImageFileOutput::new(&path);
    output
      .render_result(
        &RgbImage::new(16, 16),
        &ClassificationResult::new("Healthy", 90.0),
      )
      .unwrap();

    let saved = image::open(&path).unwrap().to_rgb8();
    assert_eq!(saved.dimensions(), (16, 16));
    assert_eq!(
      saved.get_pixel(0, 15).0,
      crate::output::annotate::verdict_color(&crate::Assessment::Healthy {
        label: "Healthy".to_string(),
        confidence_percent: 90.0,
      })
    );
  }

  #[test]
  fn url_threshold_is_applied() {
    let url = Url::parse("image:///tmp/out.png?threshold=95").unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();
    assert_eq!(output.policy.threshold_percent, 95.0);
    assert_eq!(output.path(), Path::new("/tmp/out.png"));
  }
}

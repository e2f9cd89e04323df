// 该文件是 Chongshi （虫识） 项目的一部分。
// src/output/directory_record.rs - 按日期归档的识别记录
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

use std::{
  path::{Path, PathBuf},
  sync::atomic::{AtomicU16, Ordering},
};

use chrono::{DateTime, Datelike, Utc};
use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  FromUrl, FromUrlWithScheme,
  interpret::{Assessment, ClassificationResult, DisplayPolicy},
  output::{Render, annotate::Annotate, policy_from_url},
  url_path,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无效参数: {0}")]
  InvalidParameter(String),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 与图像同名的 `.json` 记录
#[derive(Debug, Clone, Serialize)]
pub struct CaptureRecord {
  #[serde(flatten)]
  pub result: ClassificationResult,
  pub verdict: &'static str,
  pub message: String,
  pub timestamp: DateTime<Utc>,
}

impl CaptureRecord {
  pub fn new(
    result: &ClassificationResult,
    assessment: &Assessment,
    timestamp: DateTime<Utc>,
  ) -> Self {
    Self {
      result: result.clone(),
      verdict: assessment.verdict(),
      message: assessment.to_string(),
      timestamp,
    }
  }
}

/// `folder:///records?always&annotate`
///
/// 默认只归档可报告的结果；`always` 时失败与低置信度结果也归档，
/// `annotate` 时保存标注后的图像而不是原图。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  policy: DisplayPolicy,
  annotate: Option<Annotate>,
  frame_counter: AtomicU16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let policy = policy_from_url(uri).map_err(DirectoryRecordOutputError::InvalidParameter)?;
    let always = uri.query_pairs().any(|(k, _)| k == "always");
    let annotate = uri.query_pairs().any(|(k, _)| k == "annotate");

    Ok(
      DirectoryRecordOutput::new(url_path(uri))
        .with_policy(policy)
        .always(always)
        .annotated(annotate),
    )
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      policy: DisplayPolicy::default(),
      annotate: None,
      frame_counter: AtomicU16::new(0),
      always: false,
    }
  }

  pub fn with_policy(mut self, policy: DisplayPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn always(mut self, always: bool) -> Self {
    self.always = always;
    self
  }

  pub fn annotated(mut self, annotate: bool) -> Self {
    self.annotate = annotate.then(Annotate::default);
    self
  }

  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  /// `<目录>/<年>/<月>/<日>/<时-分-秒>-<序号>.png`
  fn frame_path(&self, now: &DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  fn save(
    &self,
    path: &Path,
    frame: &RgbImage,
    record: &CaptureRecord,
    assessment: &Assessment,
  ) -> Result<(), DirectoryRecordOutputError> {
    match &self.annotate {
      Some(annotate) => annotate.annotate(frame, assessment).save(path)?,
      None => frame.save(path)?,
    }
    std::fs::write(
      path.with_extension("json"),
      serde_json::to_string_pretty(record)?,
    )?;
    Ok(())
  }
}

impl Render<RgbImage, ClassificationResult> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(
    &self,
    frame: &RgbImage,
    result: &ClassificationResult,
  ) -> Result<(), Self::Error> {
    let assessment = self.policy.assess(result);
    if !self.always && !assessment.is_reportable() {
      debug!("结果不可报告，跳过归档: {}", assessment.verdict());
      return Ok(());
    }

    let now = Utc::now();
    let path = self.frame_path(&now)?;
    let record = CaptureRecord::new(result, &assessment, now);
    self.save(&path, frame, &record, &assessment)?;
    info!("归档识别记录: {}", path.display());
    Ok(())
  }
}

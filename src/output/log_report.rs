// 该文件是 Chongshi （虫识） 项目的一部分。
// src/output/log_report.rs - 终端报告输出
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
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  interpret::{Assessment, ClassificationResult, DisplayPolicy},
  output::{Render, policy_from_url},
};

#[derive(Error, Debug)]
pub enum LogOutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无效参数: {0}")]
  InvalidParameter(String),
}

/// 把展示文本打印到标准输出，`?json` 时改为每行一个 JSON 对象
#[derive(Default)]
pub struct LogOutput {
  policy: DisplayPolicy,
  json: bool,
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = LogOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(LogOutputError::SchemeMismatch(url.scheme().to_string()));
    }
    let policy = policy_from_url(url).map_err(LogOutputError::InvalidParameter)?;
    let json = url.query_pairs().any(|(k, _)| k == "json");
    Ok(Self { policy, json })
  }
}

impl LogOutput {
  pub fn with_policy(mut self, policy: DisplayPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn report(&self, result: &ClassificationResult) -> String {
    let assessment = self.policy.assess(result);
    if self.json {
      json!({
        "label": result.label,
        "confidence_percent": result.confidence_percent,
        "verdict": assessment.verdict(),
        "message": assessment.to_string(),
      })
      .to_string()
    } else {
      assessment.to_string()
    }
  }
}

impl Render<RgbImage, ClassificationResult> for LogOutput {
  type Error = LogOutputError;

  fn render_result(
    &self,
    frame: &RgbImage,
    result: &ClassificationResult,
  ) -> Result<(), Self::Error> {
    let assessment = self.policy.assess(result);
    match &assessment {
      Assessment::Failed | Assessment::LowConfidence { .. } => {
        warn!("{}x{} 图像: {}", frame.width(), frame.height(), assessment)
      }
      _ => info!("{}x{} 图像: {}", frame.width(), frame.height(), assessment),
    }
    println!("{}", self.report(result));
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn plain_report_is_display_text() {
    let output = LogOutput::default();
    let result = ClassificationResult::new("Leaf Blight", 83.04);
    assert_eq!(
      output.report(&result),
      "Pest/Disease Detected: Leaf Blight (Confidence: 83.0%)"
    );
  }

  #[test]
  fn json_report_carries_verdict() {
    let url = Url::parse("log://?json&threshold=90").unwrap();
    let output = LogOutput::from_url(&url).unwrap();
    let report = output.report(&ClassificationResult::new("Healthy", 83.0));
    let value: serde_json::Value = serde_json::from_str(&report).unwrap();
    assert_eq!(value["verdict"], "low_confidence");
    assert_eq!(value["label"], "Healthy");
  }

  #[test]
  fn failed_result_has_null_label() {
    let url = Url::parse("log://?json").unwrap();
    let output = LogOutput::from_url(&url).unwrap();
    let value: serde_json::Value =
      serde_json::from_str(&output.report(&ClassificationResult::failed())).unwrap();
    assert!(value["label"].is_null());
    assert_eq!(value["verdict"], "failed");
  }
}

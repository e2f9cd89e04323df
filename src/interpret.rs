// 该文件是 Chongshi （虫识） 项目的一部分。
// src/interpret.rs - 分类结果解释
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

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{frame::ScoreVector, labels::LabelTable};

pub const DEFAULT_DISPLAY_THRESHOLD: f32 = 20.0;
const HEALTHY_MARKER: &str = "healthy";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterpretError {
  #[error("分数向量为空")]
  EmptyScoreVector,
  #[error("分数向量中没有有效数值")]
  NoValidScore,
}

/// 一次分类的结果，`label` 为 `None` 表示失败
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
  pub label: Option<String>,
  pub confidence_percent: f32,
}

impl ClassificationResult {
  pub fn new(label: impl Into<String>, confidence_percent: f32) -> Self {
    Self {
      label: Some(label.into()),
      confidence_percent,
    }
  }

  /// `(None, 0.0)`
  pub fn failed() -> Self {
    Self {
      label: None,
      confidence_percent: 0.0,
    }
  }

  pub fn is_failed(&self) -> bool {
    self.label.is_none()
  }
}

/// 最大值下标，并列时取第一个；NaN 不参与比较
pub fn argmax(scores: &[f32]) -> Option<usize> {
  let mut best: Option<(usize, f32)> = None;
  for (index, &score) in scores.iter().enumerate() {
    if score.is_nan() {
      continue;
    }
    match best {
      Some((_, top)) if score <= top => {}
      _ => best = Some((index, score)),
    }
  }
  best.map(|(index, _)| index)
}

pub fn interpret(
  scores: &ScoreVector,
  labels: &LabelTable,
) -> Result<ClassificationResult, InterpretError> {
  if scores.is_empty() {
    return Err(InterpretError::EmptyScoreVector);
  }

  let index = argmax(scores.as_slice()).ok_or(InterpretError::NoValidScore)?;
  let score = scores.as_slice()[index];

  if !labels.covers(scores.len()) {
    warn!(
      "标签数量 {} 与模型输出长度 {} 不一致",
      labels.len(),
      scores.len()
    );
  }

  let label = labels.get(index);
  debug!("最高分类别: {} ({}), 分数 {:.4}", index, label, score);
  Ok(ClassificationResult::new(label, score * 100.0))
}

/// 展示层对一次结果的判断
#[derive(Debug, Clone, PartialEq)]
pub enum Assessment {
  /// 无法分析图像
  Failed,
  /// 置信度不足，建议重拍
  LowConfidence { label: String, confidence_percent: f32 },
  Healthy { label: String, confidence_percent: f32 },
  /// 检测到病虫害
  Detected { label: String, confidence_percent: f32 },
}

impl Assessment {
  pub fn verdict(&self) -> &'static str {
    match self {
      Assessment::Failed => "failed",
      Assessment::LowConfidence { .. } => "low_confidence",
      Assessment::Healthy { .. } => "healthy",
      Assessment::Detected { .. } => "detected",
    }
  }

  pub fn confidence_percent(&self) -> f32 {
    match self {
      Assessment::Failed => 0.0,
      Assessment::LowConfidence {
        confidence_percent, ..
      }
      | Assessment::Healthy {
        confidence_percent, ..
      }
      | Assessment::Detected {
        confidence_percent, ..
      } => *confidence_percent,
    }
  }

  pub fn is_reportable(&self) -> bool {
    matches!(self, Assessment::Healthy { .. } | Assessment::Detected { .. })
  }
}

impl std::fmt::Display for Assessment {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Assessment::Failed => write!(f, "Could not analyze image, please try another photo"),
      Assessment::LowConfidence { .. } => write!(
        f,
        "Unable to detect with confidence, try another photo with better lighting or focus"
      ),
      Assessment::Healthy {
        label,
        confidence_percent,
      } => write!(
        f,
        "Healthy Crop Detected: {} (Confidence: {:.1}%)",
        label, confidence_percent
      ),
      Assessment::Detected {
        label,
        confidence_percent,
      } => write!(
        f,
        "Pest/Disease Detected: {} (Confidence: {:.1}%)",
        label, confidence_percent
      ),
    }
  }
}

/// 展示阈值策略，置信度严格大于阈值时才报告结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayPolicy {
  pub threshold_percent: f32,
}

impl Default for DisplayPolicy {
  fn default() -> Self {
    Self {
      threshold_percent: DEFAULT_DISPLAY_THRESHOLD,
    }
  }
}

impl DisplayPolicy {
  pub fn with_threshold(threshold_percent: f32) -> Self {
    Self { threshold_percent }
  }

  pub fn assess(&self, result: &ClassificationResult) -> Assessment {
    let Some(label) = result.label.clone() else {
      return Assessment::Failed;
    };
    let confidence_percent = result.confidence_percent;

    if confidence_percent <= self.threshold_percent {
      Assessment::LowConfidence {
        label,
        confidence_percent,
      }
    } else if is_healthy_label(&label) {
      Assessment::Healthy {
        label,
        confidence_percent,
      }
    } else {
      Assessment::Detected {
        label,
        confidence_percent,
      }
    }
  }
}

pub fn is_healthy_label(label: &str) -> bool {
  label.to_lowercase().contains(HEALTHY_MARKER)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn argmax_prefers_first_of_equal_maxima() {
    assert_eq!(argmax(&[0.1, 0.7, 0.7, 0.2]), Some(1));
    assert_eq!(argmax(&[0.5]), Some(0));
    assert_eq!(argmax(&[]), None);
  }

  #[test]
  fn argmax_skips_nan() {
    assert_eq!(argmax(&[f32::NAN, 0.2, 0.1]), Some(1));
    assert_eq!(argmax(&[f32::NAN]), None);
  }

  #[test]
  fn argmax_handles_negative_logits() {
    assert_eq!(argmax(&[-3.0, -1.5, -2.0]), Some(1));
  }

  #[test]
  fn empty_scores_are_rejected() {
    let labels = LabelTable::from_labels(["Healthy"]);
    assert_eq!(
      interpret(&ScoreVector::default(), &labels),
      Err(InterpretError::EmptyScoreVector)
    );
  }

  #[test]
  fn confidence_is_score_times_hundred() {
    let labels = LabelTable::from_labels(["Healthy", "Blight"]);
    let result = interpret(&ScoreVector::from(vec![0.12, 0.83]), &labels).unwrap();
    assert_eq!(result.label.as_deref(), Some("Blight"));
    assert!((result.confidence_percent - 83.0).abs() < 1e-4);
  }

  #[test]
  fn index_beyond_table_is_unknown() {
    let labels = LabelTable::from_labels(["Healthy"]);
    let result = interpret(&ScoreVector::from(vec![0.1, 0.9]), &labels).unwrap();
    assert_eq!(result.label.as_deref(), Some("Unknown"));
  }

  #[test]
  fn policy_uses_strict_threshold() {
    let policy = DisplayPolicy::default();
    let at = ClassificationResult::new("Aphid", 20.0);
    let above = ClassificationResult::new("Aphid", 20.5);
    assert!(matches!(policy.assess(&at), Assessment::LowConfidence { .. }));
    assert!(matches!(policy.assess(&above), Assessment::Detected { .. }));
  }

  #[test]
  fn healthy_labels_are_recognised_case_insensitively() {
    let policy = DisplayPolicy::with_threshold(50.0);
    let result = ClassificationResult::new("Tomato___HEALTHY", 91.0);
    let assessment = policy.assess(&result);
    assert_eq!(assessment.verdict(), "healthy");
    assert_eq!(
      assessment.to_string(),
      "Healthy Crop Detected: Tomato___HEALTHY (Confidence: 91.0%)"
    );
  }

  #[test]
  fn failed_result_is_failed_assessment() {
    let assessment = DisplayPolicy::default().assess(&ClassificationResult::failed());
    assert_eq!(assessment, Assessment::Failed);
    assert!(!assessment.is_reportable());
    assert_eq!(assessment.confidence_percent(), 0.0);
  }
}

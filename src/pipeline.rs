// 该文件是 Chongshi （虫识） 项目的一部分。
// src/pipeline.rs - 病虫害识别流水线
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
  panic::{AssertUnwindSafe, catch_unwind},
  sync::Arc,
};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  engine::InferenceEngine,
  frame::PixelSource,
  interpret::{Assessment, ClassificationResult, DisplayPolicy, InterpretError, interpret},
  labels::{LabelManifest, LabelTable},
  model::{ClassifyError, Model, ModelSource, PestClassifier},
  preprocess::{NormalizeError, normalize_for},
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("无效图像: {0}")]
  InvalidImage(NormalizeError),
  #[error("模型加载失败: {0}")]
  ModelLoad(ClassifyError),
  #[error("分类失败: {0}")]
  ClassificationFailed(String),
  #[error("分数向量为空")]
  EmptyScoreVector,
}

impl From<ClassifyError> for PipelineError {
  fn from(err: ClassifyError) -> Self {
    match err {
      ClassifyError::ModelReadError(..) | ClassifyError::ModelLoadError(_) => {
        PipelineError::ModelLoad(err)
      }
      other => PipelineError::ClassificationFailed(other.to_string()),
    }
  }
}

impl From<NormalizeError> for PipelineError {
  fn from(err: NormalizeError) -> Self {
    match err {
      NormalizeError::InvalidImage(..) => PipelineError::InvalidImage(err),
      other => PipelineError::ClassificationFailed(other.to_string()),
    }
  }
}

impl From<InterpretError> for PipelineError {
  fn from(err: InterpretError) -> Self {
    match err {
      InterpretError::EmptyScoreVector => PipelineError::EmptyScoreVector,
      other => PipelineError::ClassificationFailed(other.to_string()),
    }
  }
}

enum LabelSource {
  Manifest(LabelManifest),
  Table(Arc<LabelTable>),
}

/// 采集 → 归一化 → 推理 → 解释
pub struct PestPipeline<E: InferenceEngine> {
  classifier: PestClassifier<E>,
  labels: LabelSource,
  policy: DisplayPolicy,
}

pub struct PestPipelineBuilder<E: InferenceEngine> {
  engine: E,
  model: ModelSource,
  labels: Option<LabelSource>,
  policy: DisplayPolicy,
}

impl<E: InferenceEngine> PestPipelineBuilder<E> {
  /// 从打包的清单加载标签（进程内只加载一次）
  pub fn labels(mut self, manifest: impl Into<LabelManifest>) -> Self {
    self.labels = Some(LabelSource::Manifest(manifest.into()));
    self
  }

  pub fn label_table(mut self, table: LabelTable) -> Self {
    self.labels = Some(LabelSource::Table(Arc::new(table)));
    self
  }

  pub fn policy(mut self, policy: DisplayPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn build(self) -> PestPipeline<E> {
    PestPipeline {
      classifier: PestClassifier::new(self.engine, self.model),
      labels: self
        .labels
        .unwrap_or_else(|| LabelSource::Table(Arc::new(LabelTable::unknown()))),
      policy: self.policy,
    }
  }
}

impl<E: InferenceEngine> PestPipeline<E> {
  pub fn builder(engine: E, model: impl Into<ModelSource>) -> PestPipelineBuilder<E> {
    PestPipelineBuilder {
      engine,
      model: model.into(),
      labels: None,
      policy: DisplayPolicy::default(),
    }
  }

  pub fn classifier(&self) -> &PestClassifier<E> {
    &self.classifier
  }

  pub fn policy(&self) -> &DisplayPolicy {
    &self.policy
  }

  pub fn labels(&self) -> Arc<LabelTable> {
    match &self.labels {
      LabelSource::Manifest(manifest) => manifest.shared(),
      LabelSource::Table(table) => table.clone(),
    }
  }

  /// 执行一次完整识别，任何阶段失败都立即返回
  pub fn try_classify<P: PixelSource + ?Sized>(
    &self,
    image: &P,
  ) -> Result<ClassificationResult, PipelineError> {
    if image.is_empty() {
      return Err(PipelineError::InvalidImage(NormalizeError::InvalidImage(
        image.width(),
        image.height(),
      )));
    }

    let now = std::time::Instant::now();
    let scores = {
      let mut model = self.classifier.load()?;
      let input = normalize_for(image, &model.input_shape())?;
      self.classifier.classify(&mut model, &input)?
    };

    let labels = self.labels();
    let result = interpret(&scores, &labels)?;
    info!(
      "识别完成: {} ({:.1}%), 耗时: {:.2?}",
      result.label.as_deref().unwrap_or("-"),
      result.confidence_percent,
      now.elapsed()
    );
    Ok(result)
  }

  /// 执行一次识别，失败统一转换为 `(None, 0.0)`，不会向调用方抛出错误
  pub fn classify<P: PixelSource + ?Sized>(&self, image: &P) -> ClassificationResult {
    match catch_unwind(AssertUnwindSafe(|| self.try_classify(image))) {
      Ok(Ok(result)) => result,
      Ok(Err(e)) => {
        error!("无法分析图像: {}", e);
        ClassificationResult::failed()
      }
      Err(_) => {
        error!("无法分析图像: 推理过程中发生 panic");
        ClassificationResult::failed()
      }
    }
  }

  pub fn classify_and_assess<P: PixelSource + ?Sized>(
    &self,
    image: &P,
  ) -> (ClassificationResult, Assessment) {
    let result = self.classify(image);
    let assessment = self.policy.assess(&result);
    debug!("展示判断: {}", assessment.verdict());
    (result, assessment)
  }
}

impl<E: InferenceEngine> Model for PestPipeline<E> {
  type Input = RgbImage;
  type Output = ClassificationResult;
  type Error = std::convert::Infallible;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    Ok(self.classify(input))
  }
}

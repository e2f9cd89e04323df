// 该文件是 Chongshi （虫识） 项目的一部分。
// src/model.rs - 分类模型调用
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
  path::PathBuf,
  sync::{Arc, OnceLock},
};

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl,
  engine::{InferenceEngine, ModelGuard},
  frame::{NormalizedInput, ScoreVector, TensorShape},
  url_path,
};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum ClassifyError {
  #[error("模型文件读取错误 {0}: {1}")]
  ModelReadError(PathBuf, std::io::Error),
  #[error("模型加载错误: {0}")]
  ModelLoadError(BoxError),
  #[error("输入形状不匹配: 模型需要 {expected}, 实际为 {actual}")]
  ShapeMismatch {
    expected: TensorShape,
    actual: TensorShape,
  },
  #[error("推理错误: {0}")]
  InferenceError(BoxError),
}

/// 模型资源：文件路径或内存中的字节
#[derive(Debug, Clone)]
pub enum ModelSource {
  File(PathBuf),
  Bytes(Arc<[u8]>),
}

impl From<PathBuf> for ModelSource {
  fn from(path: PathBuf) -> Self {
    ModelSource::File(path)
  }
}

impl From<Vec<u8>> for ModelSource {
  fn from(bytes: Vec<u8>) -> Self {
    ModelSource::Bytes(bytes.into())
  }
}

/// 任何方案的 URL 都按路径解析，方案本身用来选择推理后端
impl FromUrl for ModelSource {
  type Error = std::convert::Infallible;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    Ok(ModelSource::File(PathBuf::from(url_path(url))))
  }
}

/// 病虫害分类器：持有推理引擎与模型资源
///
/// 模型字节只读取一次；句柄在每次分类时获取，结束后释放。
pub struct PestClassifier<E: InferenceEngine> {
  engine: E,
  source: ModelSource,
  bytes: OnceLock<Arc<[u8]>>,
}

impl<E: InferenceEngine> PestClassifier<E> {
  pub fn new(engine: E, source: impl Into<ModelSource>) -> Self {
    Self {
      engine,
      source: source.into(),
      bytes: OnceLock::new(),
    }
  }

  pub fn engine(&self) -> &E {
    &self.engine
  }

  fn model_bytes(&self) -> Result<Arc<[u8]>, ClassifyError> {
    if let Some(bytes) = self.bytes.get() {
      return Ok(bytes.clone());
    }

    let bytes: Arc<[u8]> = match &self.source {
      ModelSource::Bytes(bytes) => bytes.clone(),
      ModelSource::File(path) => {
        info!("加载模型文件: {}", path.display());
        std::fs::read(path)
          .map_err(|e| ClassifyError::ModelReadError(path.clone(), e))?
          .into()
      }
    };
    Ok(self.bytes.get_or_init(|| bytes).clone())
  }

  /// 获取模型句柄，守卫离开作用域时释放
  pub fn load(&self) -> Result<ModelGuard<'_, E>, ClassifyError> {
    let bytes = self.model_bytes()?;
    ModelGuard::load(&self.engine, &bytes).map_err(|e| ClassifyError::ModelLoadError(Box::new(e)))
  }

  /// 在已加载的模型上执行一次前向推理
  pub fn classify(
    &self,
    model: &mut ModelGuard<'_, E>,
    input: &NormalizedInput,
  ) -> Result<ScoreVector, ClassifyError> {
    let expected = model.input_shape();
    if *input.shape() != expected {
      return Err(ClassifyError::ShapeMismatch {
        expected,
        actual: *input.shape(),
      });
    }

    debug!("执行模型推理");
    let now = std::time::Instant::now();
    let scores = model
      .run(input)
      .map_err(|e| ClassifyError::InferenceError(Box::new(e)))?;
    debug!("推理完成，耗时: {:.2?}", now.elapsed());

    let num_classes = model.num_classes();
    if num_classes != 0 && scores.len() != num_classes {
      warn!(
        "模型输出长度 {} 与声明的类别数 {} 不一致",
        scores.len(),
        num_classes
      );
    }
    Ok(scores)
  }
}

impl<E: InferenceEngine> Model for PestClassifier<E> {
  type Input = NormalizedInput;
  type Output = ScoreVector;
  type Error = ClassifyError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let mut model = self.load()?;
    self.classify(&mut model, input)
  }
}

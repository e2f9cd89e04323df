// 该文件是 Chongshi （虫识） 项目的一部分。
// src/engine/onnx.rs - ONNX Runtime 推理后端
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

use ndarray::Array4;
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::{Value, ValueType};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  engine::{InferenceEngine, ModelHandle},
  frame::{NormalizedInput, ScoreVector, TensorShape},
};

const ONNX_DEFAULT_THREADS: usize = 2;

#[derive(Error, Debug)]
pub enum OnnxEngineError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无效参数 {0}: {1}")]
  InvalidParameter(String, String),
  #[error("模型加载错误: {0}")]
  ModelLoadError(String),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("输入张量错误: {0}")]
  InputError(String),
  #[error("ONNX Runtime 错误: {0}")]
  RuntimeError(String),
}

/// ONNX Runtime 引擎，只在 CPU 上运行
#[derive(Debug, Clone)]
pub struct OnnxEngine {
  intra_threads: usize,
}

impl Default for OnnxEngine {
  fn default() -> Self {
    Self {
      intra_threads: ONNX_DEFAULT_THREADS,
    }
  }
}

impl OnnxEngine {
  pub fn intra_threads(mut self, threads: usize) -> Self {
    self.intra_threads = threads.max(1);
    self
  }
}

impl FromUrlWithScheme for OnnxEngine {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxEngine {
  type Error = OnnxEngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxEngineError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let mut engine = OnnxEngine::default();
    for (k, v) in url.query_pairs() {
      if k == "threads" {
        let threads = v
          .parse::<usize>()
          .map_err(|e| OnnxEngineError::InvalidParameter(k.to_string(), e.to_string()))?;
        engine = engine.intra_threads(threads);
      }
    }
    Ok(engine)
  }
}

pub struct OnnxModel {
  session: Session,
  input_name: String,
  input_shape: TensorShape,
  num_classes: usize,
}

impl ModelHandle for OnnxModel {
  fn input_shape(&self) -> TensorShape {
    self.input_shape
  }

  fn num_classes(&self) -> usize {
    self.num_classes
  }
}

fn tensor_dims(value_type: &ValueType) -> Option<Vec<i64>> {
  match value_type {
    ValueType::Tensor { shape, .. } => Some(shape.to_vec()),
    _ => None,
  }
}

impl InferenceEngine for OnnxEngine {
  type Handle = OnnxModel;
  type Error = OnnxEngineError;

  fn load_model(&self, bytes: &[u8]) -> Result<OnnxModel, OnnxEngineError> {
    debug!(
      "模型大小: {:.2} MB",
      bytes.len() as f64 / (1024.0 * 1024.0)
    );

    let session = Session::builder()
      .map_err(|e| OnnxEngineError::ModelLoadError(e.to_string()))?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(|e| OnnxEngineError::ModelLoadError(e.to_string()))?
      .with_intra_threads(self.intra_threads)
      .map_err(|e| OnnxEngineError::ModelLoadError(e.to_string()))?
      .commit_from_memory(bytes)
      .map_err(|e| OnnxEngineError::ModelLoadError(e.to_string()))?;

    let input = session
      .inputs
      .first()
      .ok_or_else(|| OnnxEngineError::ModelInvalid("模型没有输入".to_string()))?;
    let input_name = input.name.clone();
    let input_shape = tensor_dims(&input.input_type)
      .and_then(|dims| TensorShape::from_dims(&dims))
      .ok_or_else(|| {
        OnnxEngineError::ModelInvalid(format!("无法识别的输入形状: {:?}", input.input_type))
      })?;

    let output = session
      .outputs
      .first()
      .ok_or_else(|| OnnxEngineError::ModelInvalid("模型没有输出".to_string()))?;
    let num_classes = tensor_dims(&output.output_type)
      .and_then(|dims| dims.last().copied())
      .filter(|&n| n > 0)
      .ok_or_else(|| {
        OnnxEngineError::ModelInvalid(format!("无法识别的输出形状: {:?}", output.output_type))
      })? as usize;

    info!(
      "ONNX 模型加载完成: 输入 {} {}, 类别数 {}",
      input_name, input_shape, num_classes
    );

    Ok(OnnxModel {
      session,
      input_name,
      input_shape,
      num_classes,
    })
  }

  fn run(
    &self,
    handle: &mut OnnxModel,
    input: &NormalizedInput,
  ) -> Result<ScoreVector, OnnxEngineError> {
    let shape = input.shape();
    let array = Array4::from_shape_vec(
      (shape.batch, shape.height, shape.width, shape.channels),
      input.as_slice().to_vec(),
    )
    .map_err(|e| OnnxEngineError::InputError(e.to_string()))?;
    let value = Value::from_array(array).map_err(|e| OnnxEngineError::InputError(e.to_string()))?;

    let outputs = handle
      .session
      .run(ort::inputs![handle.input_name.as_str() => value])
      .map_err(|e| OnnxEngineError::RuntimeError(e.to_string()))?;

    let (_, scores) = outputs[0]
      .try_extract_tensor::<f32>()
      .map_err(|e| OnnxEngineError::RuntimeError(e.to_string()))?;
    Ok(ScoreVector::from(scores))
  }
}

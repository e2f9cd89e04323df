// 该文件是 Chongshi （虫识） 项目的一部分。
// src/engine/rknpu_engine.rs - RKNPU 推理后端
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  engine::{InferenceEngine, ModelHandle},
  frame::{NormalizedInput, ScoreVector, TensorShape},
};

const RKNPU_NUM_INPUTS: u32 = 1;
const RKNPU_NUM_OUTPUTS: u32 = 1;
const RKNPU_DEFAULT_INPUT_SIZE: usize = 224;

#[derive(Error, Debug)]
pub enum RknpuEngineError {
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("无效参数 {0}: {1}")]
  InvalidParameter(String, String),
  #[error("输入长度不符: 模型配置为 {expected}, 实际为 {actual}")]
  InputSizeMismatch { expected: usize, actual: usize },
  #[error("输出长度不符: 配置的类别数为 {expected}, 模型输出 {actual}")]
  OutputSizeMismatch { expected: usize, actual: usize },
}

impl From<rknpu::Error> for RknpuEngineError {
  fn from(err: rknpu::Error) -> Self {
    RknpuEngineError::RknnError(err)
  }
}

impl RknpuEngineError {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    RknpuEngineError::ModelInvalid(msg.to_string(), e)
  }
}

/// RKNPU 引擎
///
/// RKNN 上下文不报告张量属性，输入边长写在配置里
/// （`rknpu:///model.rknn?size=224`），由句柄对外报告；类别数可选
/// （`classes=38`），未配置时为 0。配置与模型不符时，推理前后的长度检查会拒绝本次调用。
#[derive(Debug, Clone)]
pub struct RknpuEngine {
  input_size: usize,
  num_classes: usize,
}

impl Default for RknpuEngine {
  fn default() -> Self {
    Self {
      input_size: RKNPU_DEFAULT_INPUT_SIZE,
      num_classes: 0,
    }
  }
}

impl FromUrlWithScheme for RknpuEngine {
  const SCHEME: &'static str = "rknpu";
}

impl FromUrl for RknpuEngine {
  type Error = RknpuEngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RknpuEngineError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut engine = RknpuEngine::default();
    for (k, v) in url.query_pairs() {
      let parsed = || {
        v.parse::<usize>()
          .map_err(|e| RknpuEngineError::InvalidParameter(k.to_string(), e.to_string()))
      };
      match &*k {
        "size" => engine.input_size = parsed()?,
        "classes" => engine.num_classes = parsed()?,
        _ => {}
      }
    }
    if engine.input_size == 0 {
      return Err(RknpuEngineError::InvalidParameter(
        "size".to_string(),
        "必须为正整数".to_string(),
      ));
    }
    Ok(engine)
  }
}

pub struct RknpuModel {
  context: Context,
  input_shape: TensorShape,
  num_classes: usize,
}

impl ModelHandle for RknpuModel {
  fn input_shape(&self) -> TensorShape {
    self.input_shape
  }

  fn num_classes(&self) -> usize {
    self.num_classes
  }
}

impl InferenceEngine for RknpuEngine {
  type Handle = RknpuModel;
  type Error = RknpuEngineError;

  fn load_model(&self, bytes: &[u8]) -> Result<RknpuModel, RknpuEngineError> {
    debug!(
      "模型文件大小: {:.2} MB",
      bytes.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(bytes, InitFlags::default())?;

    let num_inputs = context
      .num_inputs()
      .map_err(|e| RknpuEngineError::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| RknpuEngineError::invalid("无法获取输出数量", e))?;

    if num_inputs != RKNPU_NUM_INPUTS || num_outputs != RKNPU_NUM_OUTPUTS {
      error!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        RKNPU_NUM_INPUTS, RKNPU_NUM_OUTPUTS, num_inputs, num_outputs
      );
      return Err(RknpuEngineError::invalid(
        &format!(
          "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
          RKNPU_NUM_INPUTS, RKNPU_NUM_OUTPUTS, num_inputs, num_outputs
        ),
        rknpu::Error::InvalidModel,
      ));
    }

    info!("模型加载完成");
    Ok(RknpuModel {
      context,
      input_shape: TensorShape::square_rgb(self.input_size),
      num_classes: self.num_classes,
    })
  }

  fn run(
    &self,
    handle: &mut RknpuModel,
    input: &NormalizedInput,
  ) -> Result<ScoreVector, RknpuEngineError> {
    check_input_len(&handle.input_shape, input.len())?;
    let bytes: Vec<u8> = input
      .as_slice()
      .iter()
      .flat_map(|v| v.to_ne_bytes())
      .collect();

    debug!("设置模型输入");
    handle
      .context
      .set_input(0, &bytes, TensorFormat::NHWC, TensorType::Float32)?;

    debug!("执行模型推理");
    handle.context.run()?;

    let output = handle.context.get_outputs()?;
    let scores = output.get_f32(0)?;
    check_output_len(handle.num_classes, scores.len())?;
    Ok(ScoreVector::from(scores))
  }
}

fn check_input_len(shape: &TensorShape, actual: usize) -> Result<(), RknpuEngineError> {
  let expected = shape.element_count();
  if expected != actual {
    error!("输入长度 {} 与配置的形状 {} 不符", actual, shape);
    return Err(RknpuEngineError::InputSizeMismatch { expected, actual });
  }
  Ok(())
}

/// 未配置类别数时不检查
fn check_output_len(num_classes: usize, actual: usize) -> Result<(), RknpuEngineError> {
  if num_classes != 0 && num_classes != actual {
    error!("模型输出 {} 个分数, 配置的类别数为 {}", actual, num_classes);
    return Err(RknpuEngineError::OutputSizeMismatch {
      expected: num_classes,
      actual,
    });
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn query_configures_size_and_classes() {
    let url = Url::parse("rknpu:///models/pest.rknn?size=160&classes=38").unwrap();
    let engine = RknpuEngine::from_url(&url).unwrap();
    assert_eq!(engine.input_size, 160);
    assert_eq!(engine.num_classes, 38);

    let url = Url::parse("rknpu:///models/pest.rknn?size=0").unwrap();
    assert!(matches!(
      RknpuEngine::from_url(&url),
      Err(RknpuEngineError::InvalidParameter(..))
    ));
  }

  #[test]
  fn input_length_must_match_configured_size() {
    let shape = TensorShape::square_rgb(224);
    assert!(check_input_len(&shape, 224 * 224 * 3).is_ok());
    assert!(matches!(
      check_input_len(&shape, 160 * 160 * 3),
      Err(RknpuEngineError::InputSizeMismatch {
        expected: 150528,
        actual: 76800
      })
    ));
  }

  #[test]
  fn output_length_checked_only_when_configured() {
    assert!(check_output_len(0, 17).is_ok());
    assert!(check_output_len(38, 38).is_ok());
    assert!(matches!(
      check_output_len(38, 10),
      Err(RknpuEngineError::OutputSizeMismatch {
        expected: 38,
        actual: 10
      })
    ));
  }
}

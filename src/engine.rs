// 该文件是 Chongshi （虫识） 项目的一部分。
// src/engine.rs - 推理引擎接口
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

use thiserror::Error;
use tracing::debug;

use crate::frame::{NormalizedInput, ScoreVector, TensorShape};

/// 已加载模型的句柄
pub trait ModelHandle {
  /// 模型声明的输入形状，`[1, H, W, 3]`
  fn input_shape(&self) -> TensorShape;
  /// 输出向量长度
  fn num_classes(&self) -> usize;
}

/// 设备端推理运行时
pub trait InferenceEngine {
  type Handle: ModelHandle;
  type Error: std::error::Error + Send + Sync + 'static;

  fn load_model(&self, bytes: &[u8]) -> Result<Self::Handle, Self::Error>;

  fn run(
    &self,
    handle: &mut Self::Handle,
    input: &NormalizedInput,
  ) -> Result<ScoreVector, Self::Error>;

  fn release(&self, handle: Self::Handle) {
    drop(handle);
  }
}

#[derive(Error, Debug)]
pub enum GuardError<E> {
  #[error("模型句柄已释放")]
  Released,
  #[error("推理错误: {0}")]
  Engine(#[source] E),
}

/// 作用域内持有模型句柄，离开作用域时交还给引擎释放
///
/// 输入形状与类别数在加载时读出，释放后仍可查询。
pub struct ModelGuard<'e, E: InferenceEngine> {
  engine: &'e E,
  handle: Option<E::Handle>,
  input_shape: TensorShape,
  num_classes: usize,
}

impl<'e, E: InferenceEngine> ModelGuard<'e, E> {
  pub fn load(engine: &'e E, bytes: &[u8]) -> Result<Self, E::Error> {
    let handle = engine.load_model(bytes)?;
    let input_shape = handle.input_shape();
    let num_classes = handle.num_classes();
    debug!("模型句柄已获取: 输入 {}, 类别数 {}", input_shape, num_classes);
    Ok(Self {
      engine,
      handle: Some(handle),
      input_shape,
      num_classes,
    })
  }

  pub fn input_shape(&self) -> TensorShape {
    self.input_shape
  }

  pub fn num_classes(&self) -> usize {
    self.num_classes
  }

  pub fn is_loaded(&self) -> bool {
    self.handle.is_some()
  }

  pub fn run(&mut self, input: &NormalizedInput) -> Result<ScoreVector, GuardError<E::Error>> {
    let handle = self.handle.as_mut().ok_or(GuardError::Released)?;
    self.engine.run(handle, input).map_err(GuardError::Engine)
  }

  /// 提前交还句柄，之后的推理返回 `Released`
  pub fn release(&mut self) {
    if let Some(handle) = self.handle.take() {
      self.engine.release(handle);
      debug!("模型句柄已释放");
    }
  }
}

impl<E: InferenceEngine> Drop for ModelGuard<'_, E> {
  fn drop(&mut self) {
    self.release();
  }
}

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxEngine, OnnxEngineError, OnnxModel};

#[cfg(feature = "rknpu")]
mod rknpu_engine;
#[cfg(feature = "rknpu")]
pub use self::rknpu_engine::{RknpuEngine, RknpuEngineError, RknpuModel};

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;

  struct Handle;

  impl ModelHandle for Handle {
    fn input_shape(&self) -> TensorShape {
      TensorShape::square_rgb(1)
    }

    fn num_classes(&self) -> usize {
      2
    }
  }

  #[derive(Default)]
  struct CountingEngine {
    released: AtomicUsize,
  }

  #[derive(Debug, thiserror::Error)]
  #[error("推理失败")]
  struct Failure;

  impl InferenceEngine for CountingEngine {
    type Handle = Handle;
    type Error = Failure;

    fn load_model(&self, _bytes: &[u8]) -> Result<Handle, Failure> {
      Ok(Handle)
    }

    fn run(&self, _handle: &mut Handle, _input: &NormalizedInput) -> Result<ScoreVector, Failure> {
      Err(Failure)
    }

    fn release(&self, _handle: Handle) {
      self.released.fetch_add(1, Ordering::SeqCst);
    }
  }

  #[test]
  fn released_guard_rejects_runs_and_releases_once() {
    let engine = CountingEngine::default();
    {
      let mut guard = ModelGuard::load(&engine, &[]).unwrap();
      assert!(guard.is_loaded());
      guard.release();
      assert!(!guard.is_loaded());
      assert_eq!(guard.input_shape(), TensorShape::square_rgb(1));
      let input = NormalizedInput::from_parts(TensorShape::square_rgb(1), vec![0.0; 3]);
      assert!(matches!(guard.run(&input), Err(GuardError::Released)));
    }
    assert_eq!(engine.released.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn guard_releases_after_failed_run() {
    let engine = CountingEngine::default();
    {
      let mut guard = ModelGuard::load(&engine, &[]).unwrap();
      assert_eq!(guard.num_classes(), 2);
      let input = NormalizedInput::from_parts(TensorShape::square_rgb(1), vec![0.0; 3]);
      assert!(matches!(guard.run(&input), Err(GuardError::Engine(Failure))));
    }
    assert_eq!(engine.released.load(Ordering::SeqCst), 1);
  }
}

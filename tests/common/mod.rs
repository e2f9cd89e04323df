// 该文件是 Chongshi （虫识） 项目的一部分。
// tests/common/mod.rs - 测试用推理引擎
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

#![allow(dead_code)]

use std::{
  sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use chongshi::{
  NormalizedInput, ScoreVector, TensorShape,
  engine::{InferenceEngine, ModelHandle},
};

pub struct MockHandle {
  shape: TensorShape,
  num_classes: usize,
}

impl ModelHandle for MockHandle {
  fn input_shape(&self) -> TensorShape {
    self.shape
  }

  fn num_classes(&self) -> usize {
    self.num_classes
  }
}

#[derive(Debug, thiserror::Error)]
pub enum MockError {
  #[error("模型损坏")]
  Corrupt,
  #[error("推理失败")]
  Runtime,
}

/// 按脚本返回固定分数的引擎，记录加载与释放次数
pub struct MockEngine {
  shape: TensorShape,
  scores: Vec<f32>,
  fail_load: bool,
  fail_run: bool,
  panic_run: bool,
  delay: Duration,
  pub loads: AtomicUsize,
  pub releases: AtomicUsize,
  pub last_input: Mutex<Option<Vec<f32>>>,
}

impl MockEngine {
  pub fn new(shape: TensorShape, scores: Vec<f32>) -> Self {
    Self {
      shape,
      scores,
      fail_load: false,
      fail_run: false,
      panic_run: false,
      delay: Duration::ZERO,
      loads: AtomicUsize::new(0),
      releases: AtomicUsize::new(0),
      last_input: Mutex::new(None),
    }
  }

  pub fn with_scores(scores: Vec<f32>) -> Self {
    Self::new(TensorShape::square_rgb(4), scores)
  }

  pub fn failing_load(mut self) -> Self {
    self.fail_load = true;
    self
  }

  pub fn failing_run(mut self) -> Self {
    self.fail_run = true;
    self
  }

  pub fn panicking_run(mut self) -> Self {
    self.panic_run = true;
    self
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn loads(&self) -> usize {
    self.loads.load(Ordering::SeqCst)
  }

  pub fn releases(&self) -> usize {
    self.releases.load(Ordering::SeqCst)
  }

  pub fn last_input(&self) -> Option<Vec<f32>> {
    self.last_input.lock().unwrap().clone()
  }
}

impl InferenceEngine for MockEngine {
  type Handle = MockHandle;
  type Error = MockError;

  fn load_model(&self, _bytes: &[u8]) -> Result<MockHandle, MockError> {
    self.loads.fetch_add(1, Ordering::SeqCst);
    if self.fail_load {
      return Err(MockError::Corrupt);
    }
    Ok(MockHandle {
      shape: self.shape,
      num_classes: self.scores.len(),
    })
  }

  fn run(&self, _handle: &mut MockHandle, input: &NormalizedInput) -> Result<ScoreVector, MockError> {
    *self.last_input.lock().unwrap() = Some(input.as_slice().to_vec());
    if !self.delay.is_zero() {
      std::thread::sleep(self.delay);
    }
    if self.panic_run {
      panic!("推理后端崩溃");
    }
    if self.fail_run {
      return Err(MockError::Runtime);
    }
    Ok(ScoreVector::from(self.scores.clone()))
  }

  fn release(&self, _handle: MockHandle) {
    self.releases.fetch_add(1, Ordering::SeqCst);
  }
}

/// 模型字节对测试引擎无意义，只需非空
pub fn model_bytes() -> Vec<u8> {
  vec![0x4f, 0x4e, 0x4e, 0x58]
}

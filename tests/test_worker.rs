// 该文件是 Chongshi （虫识） 项目的一部分。
// tests/test_worker.rs - 后台识别线程测试
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

mod common;

use std::{
  sync::{Arc, mpsc},
  time::Duration,
};

use chongshi::{
  ClassificationResult, LabelTable, PestPipeline,
  worker::{ClassifyWorker, WorkerError},
};
use image::{Rgb, RgbImage};

use common::{MockEngine, model_bytes};

fn capture() -> RgbImage {
  RgbImage::from_pixel(8, 8, Rgb([30, 140, 60]))
}

fn pipeline(engine: MockEngine) -> Arc<PestPipeline<MockEngine>> {
  Arc::new(
    PestPipeline::builder(engine, model_bytes())
      .label_table(LabelTable::from_labels(["Healthy", "Leaf Rust"]))
      .build(),
  )
}

#[test]
fn result_is_delivered_to_caller() {
  let worker = ClassifyWorker::spawn(pipeline(MockEngine::with_scores(vec![0.3, 0.7]))).unwrap();
  let result = worker.submit(capture()).unwrap().wait().unwrap();
  assert_eq!(result.label.as_deref(), Some("Leaf Rust"));
  assert!(!worker.is_busy());
}

#[test]
fn second_submit_while_busy_is_rejected() {
  let engine = MockEngine::with_scores(vec![0.9, 0.1]).with_delay(Duration::from_millis(300));
  let worker = ClassifyWorker::spawn(pipeline(engine)).unwrap();

  let pending = worker.submit(capture()).unwrap();
  assert!(worker.is_busy());
  assert!(matches!(worker.submit(capture()), Err(WorkerError::Busy)));

  let result = pending.wait().unwrap();
  assert_eq!(result.label.as_deref(), Some("Healthy"));

  // 结果送达前已清除忙碌标志
  assert!(worker.submit(capture()).is_ok());
}

#[test]
fn failures_arrive_as_failed_results() {
  let worker =
    ClassifyWorker::spawn(pipeline(MockEngine::with_scores(vec![0.5]).failing_load())).unwrap();
  let result = worker.submit(capture()).unwrap().wait().unwrap();
  assert_eq!(result, ClassificationResult::failed());
}

#[test]
fn callback_receives_result() {
  let worker = ClassifyWorker::spawn(pipeline(MockEngine::with_scores(vec![0.8, 0.2]))).unwrap();
  let (tx, rx) = mpsc::channel();
  worker
    .submit_with(capture(), move |result| {
      tx.send(result).unwrap();
    })
    .unwrap();
  let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
  assert_eq!(result.label.as_deref(), Some("Healthy"));
}

#[test]
fn pending_result_can_be_polled() {
  let engine = MockEngine::with_scores(vec![0.1, 0.9]).with_delay(Duration::from_millis(200));
  let worker = ClassifyWorker::spawn(pipeline(engine)).unwrap();
  let pending = worker.submit(capture()).unwrap();
  assert!(pending.try_result().unwrap().is_none());
  let result = pending.wait_timeout(Duration::from_secs(5)).unwrap();
  assert!((result.confidence_percent - 90.0).abs() < 1e-3);
}

#[test]
fn dropping_the_worker_finishes_in_flight_work() {
  let engine = MockEngine::with_scores(vec![0.6, 0.4]).with_delay(Duration::from_millis(100));
  let shared = pipeline(engine);
  let worker = ClassifyWorker::spawn(shared.clone()).unwrap();
  let pending = worker.submit(capture()).unwrap();
  drop(worker);

  assert_eq!(pending.wait().unwrap().label.as_deref(), Some("Healthy"));
  assert_eq!(shared.classifier().engine().releases(), 1);
}

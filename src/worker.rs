// 该文件是 Chongshi （虫识） 项目的一部分。
// src/worker.rs - 后台识别线程
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
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
  },
  thread::{self, JoinHandle},
  time::Duration,
};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{engine::InferenceEngine, interpret::ClassificationResult, pipeline::PestPipeline};

#[derive(Error, Debug)]
pub enum WorkerError {
  #[error("上一张图像仍在识别中")]
  Busy,
  #[error("识别线程已退出")]
  Closed,
  #[error("等待识别结果超时")]
  Timeout,
  #[error("无法创建识别线程: {0}")]
  SpawnError(#[from] std::io::Error),
}

type Reply = Box<dyn FnOnce(ClassificationResult) + Send>;

struct Job {
  image: RgbImage,
  reply: Reply,
}

/// 在后台线程上执行识别，调用方只收到最终结果
///
/// 同一时间只允许一个请求在执行，忙碌时提交会被拒绝。
pub struct ClassifyWorker {
  jobs: Option<Sender<Job>>,
  busy: Arc<AtomicBool>,
  thread: Option<JoinHandle<()>>,
}

impl ClassifyWorker {
  pub fn spawn<E>(pipeline: Arc<PestPipeline<E>>) -> Result<Self, WorkerError>
  where
    E: InferenceEngine + Send + Sync + 'static,
  {
    let (tx, rx) = mpsc::channel::<Job>();
    let busy = Arc::new(AtomicBool::new(false));
    let worker_busy = busy.clone();

    let thread = thread::Builder::new()
      .name("chongshi-classify".to_string())
      .spawn(move || {
        info!("识别线程启动");
        for job in rx {
          let result = pipeline.classify(&job.image);
          worker_busy.store(false, Ordering::Release);
          (job.reply)(result);
        }
        info!("识别线程退出");
      })?;

    Ok(Self {
      jobs: Some(tx),
      busy,
      thread: Some(thread),
    })
  }

  pub fn is_busy(&self) -> bool {
    self.busy.load(Ordering::Acquire)
  }

  /// 提交一张图像，结果在识别线程上交给回调
  pub fn submit_with<F>(&self, image: RgbImage, reply: F) -> Result<(), WorkerError>
  where
    F: FnOnce(ClassificationResult) + Send + 'static,
  {
    if self
      .busy
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      warn!("识别进行中，拒绝新的图像");
      return Err(WorkerError::Busy);
    }

    let jobs = self.jobs.as_ref().ok_or(WorkerError::Closed)?;
    debug!("提交图像: {}x{}", image.width(), image.height());
    let job = Job {
      image,
      reply: Box::new(reply),
    };
    if jobs.send(job).is_err() {
      self.busy.store(false, Ordering::Release);
      return Err(WorkerError::Closed);
    }
    Ok(())
  }

  /// 提交一张图像，返回可等待的结果
  pub fn submit(&self, image: RgbImage) -> Result<PendingResult, WorkerError> {
    let (tx, rx) = mpsc::channel();
    self.submit_with(image, move |result| {
      // 接收方已丢弃时直接放弃结果
      let _ = tx.send(result);
    })?;
    Ok(PendingResult { rx })
  }
}

impl Drop for ClassifyWorker {
  fn drop(&mut self) {
    self.jobs.take();
    if let Some(thread) = self.thread.take()
      && thread.join().is_err()
    {
      warn!("识别线程异常退出");
    }
  }
}

/// 尚未完成的识别请求
pub struct PendingResult {
  rx: Receiver<ClassificationResult>,
}

impl PendingResult {
  pub fn wait(self) -> Result<ClassificationResult, WorkerError> {
    self.rx.recv().map_err(|_| WorkerError::Closed)
  }

  pub fn wait_timeout(&self, timeout: Duration) -> Result<ClassificationResult, WorkerError> {
    self.rx.recv_timeout(timeout).map_err(|e| match e {
      RecvTimeoutError::Timeout => WorkerError::Timeout,
      RecvTimeoutError::Disconnected => WorkerError::Closed,
    })
  }

  pub fn try_result(&self) -> Result<Option<ClassificationResult>, WorkerError> {
    match self.rx.try_recv() {
      Ok(result) => Ok(Some(result)),
      Err(TryRecvError::Empty) => Ok(None),
      Err(TryRecvError::Disconnected) => Err(WorkerError::Closed),
    }
  }
}

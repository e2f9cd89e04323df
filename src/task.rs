// 该文件是 Chongshi （虫识） 项目的一部分。
// src/task.rs - 拍照识别任务
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
    Arc, OnceLock,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use tracing::{info, warn};

use crate::{model::Model, output::Render};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 只处理第一张采集图像
pub struct OneShotTask;

impl<F, D, ME, RE, I, M, O> Task<I, M, O> for OneShotTask
where
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有采集到图像"))?;
    info!("图像采集成功，开始识别...");
    let now = Instant::now();
    let result = model.infer(&frame)?;
    let inferred = now.elapsed();
    output.render_result(&frame, &result)?;
    info!(
      "识别耗时: {:.2?}, 含输出耗时: {:.2?}",
      inferred,
      now.elapsed()
    );

    Ok(())
  }
}

/// 依次处理每一张采集图像，同一时间只有一次识别在执行
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 进程内只安装一次 Ctrl-C 处理函数，之后的任务共用同一个中断标志
  fn interrupt_flag() -> Arc<AtomicBool> {
    static INTERRUPT: OnceLock<Arc<AtomicBool>> = OnceLock::new();
    INTERRUPT
      .get_or_init(|| {
        let flag = Arc::new(AtomicBool::new(false));
        let handler_flag = flag.clone();
        if let Err(e) = ctrlc::set_handler(move || {
          info!("收到中断信号，准备退出...");
          handler_flag.store(true, Ordering::SeqCst);
          thread::spawn(|| {
            thread::sleep(Duration::from_secs(30));
            warn!("强制退出程序");
            std::process::exit(1);
          });
        }) {
          warn!("无法设置 Ctrl-C 处理函数，任务只能按数量结束: {}", e);
        }
        flag
      })
      .clone()
  }
}

impl<F, D, ME, RE, I, M, O> Task<I, M, O> for ContinuousTask
where
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let interrupt = Self::interrupt_flag();
    // 上一次任务留下的中断不影响本次
    interrupt.store(false, Ordering::SeqCst);

    let mut frame_index = 0usize;
    let mut total = Duration::ZERO;
    for frame in input {
      frame_index += 1;
      info!("处理第 {} 张图像", frame_index);
      let now = Instant::now();
      let result = model.infer(&frame)?;
      output.render_result(&frame, &result)?;
      let elapsed = now.elapsed();
      total += elapsed;
      info!("第 {} 张完成，耗时: {:.2?}", frame_index, elapsed);

      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定数量 {}, 退出任务循环", frame_index);
        break;
      }
      if interrupt.swap(false, Ordering::SeqCst) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    if frame_index > 0 {
      info!(
        "共处理 {} 张图像，平均耗时: {:.2?}",
        frame_index,
        total / frame_index as u32
      );
    } else {
      warn!("没有采集到图像");
    }
    Ok(())
  }
}

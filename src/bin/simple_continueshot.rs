// 该文件是 Chongshi （虫识） 项目的一部分。
// src/bin/simple_continueshot.rs - 连续拍照识别（ONNX Runtime）
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

use anyhow::Result;
use clap::Parser;

use chongshi::{
  FromUrl, PestPipeline,
  args::Args,
  engine::OnnxEngine,
  input::InputWrapper,
  model::ModelSource,
  output::OutputWrapper,
  task::{ContinuousTask, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  args.log();

  let input = InputWrapper::from_url(&args.input)?;
  let engine = OnnxEngine::from_url(&args.model)?;
  let pipeline = PestPipeline::builder(engine, ModelSource::from_url(&args.model)?)
    .labels(args.labels.as_path())
    .policy(args.policy())
    .build();
  let output = OutputWrapper::from_url(&args.output)?.with_policy(args.policy());

  ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .run_task(input, pipeline, output)?;

  Ok(())
}

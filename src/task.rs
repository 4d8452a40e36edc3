// 该文件是 Lispa （叶片病虫害识别） 项目的一部分。
// src/task.rs - 分析任务
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

use std::future::Future;

use tracing::{error, info};

use crate::{
  advisory::Role,
  frame::ImageFrame,
  history::MessageHistory,
  output::Render,
  pipeline::{Analysis, AnalysisOutcome, InteractionError, Pipeline},
};

/// 一张图像的交互结果；失败的交互不写入消息记录
#[derive(Debug)]
pub struct Interaction {
  pub source: String,
  pub result: Result<Analysis, InteractionError>,
}

pub trait Task<I, O>: Sized {
  type Error;

  fn run_task(
    self,
    input: I,
    pipeline: &Pipeline,
    output: &O,
    history: &mut MessageHistory,
  ) -> impl Future<Output = Result<Vec<Interaction>, Self::Error>>;
}

async fn interact<O, RE>(
  frame: ImageFrame,
  pipeline: &Pipeline,
  output: &O,
  history: &mut MessageHistory,
) -> Interaction
where
  O: Render<ImageFrame, Analysis, Error = RE>,
  RE: std::error::Error + Send + Sync + 'static,
{
  info!("开始分析: {}", frame.source());
  let now = std::time::Instant::now();
  let result = pipeline.analyze(&frame).await;
  info!("分析完成, 耗时: {:.2?}", now.elapsed());

  match &result {
    Ok(analysis) => {
      if let AnalysisOutcome::Advised {
        prompt,
        recommendation,
        ..
      } = &analysis.outcome
      {
        history.push(Role::User, prompt.as_str());
        history.push(Role::Model, recommendation.text());
      }
      // 输出失败不影响本次交互结果
      if let Err(e) = output.render_result(&frame, analysis) {
        error!("{} 输出失败: {}", frame.source(), e);
      }
    }
    Err(e) => error!("{} 分析失败: {}", frame.source(), e),
  }

  Interaction {
    source: frame.source().to_string(),
    result,
  }
}

/// 只处理第一张图像
pub struct OneShotTask;

impl<I, O, RE> Task<I, O> for OneShotTask
where
  I: Iterator<Item = ImageFrame>,
  O: Render<ImageFrame, Analysis, Error = RE>,
  RE: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  async fn run_task(
    self,
    mut input: I,
    pipeline: &Pipeline,
    output: &O,
    history: &mut MessageHistory,
  ) -> Result<Vec<Interaction>, Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    Ok(vec![interact(frame, pipeline, output, history).await])
  }
}

/// 依次处理全部图像，共享同一个会话
#[derive(Default, Debug)]
pub struct SequenceTask {
  limit: Option<usize>,
}

impl SequenceTask {
  pub fn with_limit(mut self, limit: Option<usize>) -> Self {
    self.limit = limit;
    self
  }
}

impl<I, O, RE> Task<I, O> for SequenceTask
where
  I: Iterator<Item = ImageFrame>,
  O: Render<ImageFrame, Analysis, Error = RE>,
  RE: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  async fn run_task(
    self,
    input: I,
    pipeline: &Pipeline,
    output: &O,
    history: &mut MessageHistory,
  ) -> Result<Vec<Interaction>, Self::Error> {
    info!("开始任务...");
    let mut interactions = Vec::new();
    for (index, frame) in input.enumerate() {
      if self.limit.is_some_and(|n| index >= n) {
        info!("达到指定图像数 {}, 退出任务循环", index);
        break;
      }
      interactions.push(interact(frame, pipeline, output, history).await);
    }
    info!("任务完成, 共处理 {} 张图像", interactions.len());
    Ok(interactions)
  }
}

// 该文件是 Lispa （叶片病虫害识别） 项目的一部分。
// src/pipeline.rs - 检测融合与建议流水线
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

use std::{sync::Arc, time::Duration};

use futures_util::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  advisory::{
    AdvisoryError, AdvisoryInvoker, Agent, DEFAULT_ADVISORY_TIMEOUT, Recommendation,
    SessionInitError, SessionKey, SessionManager, SessionService,
  },
  frame::ImageFrame,
  fusion::{AggregatedFindings, ConfidenceThreshold, aggregate, filter},
  model::{DetectionBatch, DetectorError, DetectorRegistry},
  summary::{EvidenceSummary, PromptTemplate, summarize},
};

pub const DEFAULT_DETECTOR_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
  pub threshold: ConfidenceThreshold,
  pub detector_timeout: Duration,
  pub advisory_timeout: Duration,
  pub prompt: PromptTemplate,
  pub session: SessionKey,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      threshold: ConfidenceThreshold::default(),
      detector_timeout: DEFAULT_DETECTOR_TIMEOUT,
      advisory_timeout: DEFAULT_ADVISORY_TIMEOUT,
      prompt: PromptTemplate::default(),
      session: SessionKey::default(),
    }
  }
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("分析不可用: 没有成功加载的检测模型")]
  AnalysisUnavailable,
}

#[derive(Error, Debug)]
pub enum InteractionError {
  #[error("所有检测器均失败: {0:?}")]
  AllDetectorsFailed(Vec<DetectorError>),
  #[error(transparent)]
  SessionInit(#[from] SessionInitError),
  #[error("建议调用失败: {0}")]
  Advisory(#[from] AdvisoryError),
}

/// 一次检测的全部结果，成功批次按检测器注册顺序排列
#[derive(Debug, Clone, Default)]
pub struct Detections {
  pub batches: Vec<DetectionBatch>,
  pub failures: Vec<DetectorError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisOutcome {
  /// 没有达到阈值的结果，未调用建议代理
  NoActionableFindings,
  Advised {
    actionable: AggregatedFindings,
    summary: EvidenceSummary,
    prompt: String,
    recommendation: Recommendation,
  },
}

impl AnalysisOutcome {
  pub fn recommendation(&self) -> Option<&Recommendation> {
    match self {
      AnalysisOutcome::NoActionableFindings => None,
      AnalysisOutcome::Advised { recommendation, .. } => Some(recommendation),
    }
  }
}

/// 一次完整交互的结果
#[derive(Debug, Clone)]
pub struct Analysis {
  pub source: String,
  pub findings: AggregatedFindings,
  pub failures: Vec<DetectorError>,
  pub outcome: AnalysisOutcome,
}

pub struct Pipeline {
  registry: DetectorRegistry,
  sessions: SessionManager,
  invoker: AdvisoryInvoker,
  config: PipelineConfig,
}

impl Pipeline {
  /// 没有任何可用检测器时拒绝构建，在接收图像之前报告分析不可用
  pub fn new(
    registry: DetectorRegistry,
    agent: Arc<dyn Agent>,
    sessions: Arc<dyn SessionService>,
    config: PipelineConfig,
  ) -> Result<Self, PipelineError> {
    if registry.is_empty() {
      return Err(PipelineError::AnalysisUnavailable);
    }
    let invoker =
      AdvisoryInvoker::new(agent, sessions.clone()).with_timeout(config.advisory_timeout);
    Ok(Self {
      registry,
      sessions: SessionManager::new(sessions),
      invoker,
      config,
    })
  }

  pub fn registry(&self) -> &DetectorRegistry {
    &self.registry
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  /// 并发运行全部检测器，单个检测器失败不影响其他检测器
  pub async fn detect(&self, frame: &ImageFrame) -> Result<Detections, InteractionError> {
    detect_all(&self.registry, frame, self.config.detector_timeout).await
  }

  pub async fn analyze(&self, frame: &ImageFrame) -> Result<Analysis, InteractionError> {
    self.analyze_in(frame, &self.config.session).await
  }

  /// 在指定会话中完成一次交互：检测、融合、过滤、摘要、建议
  pub async fn analyze_in(
    &self,
    frame: &ImageFrame,
    session: &SessionKey,
  ) -> Result<Analysis, InteractionError> {
    let Detections { batches, failures } = self.detect(frame).await?;
    let findings = aggregate(batches);
    let actionable = filter(&findings, self.config.threshold);
    info!(
      "{}: 共 {} 个检测结果, {} 个不低于阈值 {}",
      frame.source(),
      findings.len(),
      actionable.len(),
      self.config.threshold
    );

    if actionable.is_empty() {
      return Ok(Analysis {
        source: frame.source().to_string(),
        findings,
        failures,
        outcome: AnalysisOutcome::NoActionableFindings,
      });
    }

    let summary = summarize(&actionable);
    let prompt = self
      .config
      .prompt
      .render(&summary, &actionable.origins(), self.config.threshold);
    debug!("建议请求: {}", prompt);

    let handle = self.sessions.ensure_session(session).await?;
    let recommendation = self.invoker.invoke(&handle, &prompt).await?;

    Ok(Analysis {
      source: frame.source().to_string(),
      findings,
      failures,
      outcome: AnalysisOutcome::Advised {
        actionable,
        summary,
        prompt,
        recommendation,
      },
    })
  }
}

/// 每个检测器在阻塞线程池中运行并带有超时；结果按注册顺序合并
pub async fn detect_all(
  registry: &DetectorRegistry,
  frame: &ImageFrame,
  timeout: Duration,
) -> Result<Detections, InteractionError> {
  let runs = registry.detectors().iter().map(|detector| {
    let detector = detector.clone();
    let image = frame.shared();
    async move {
      let name = detector.name().to_string();
      let now = std::time::Instant::now();
      let handle = tokio::task::spawn_blocking(move || detector.detect(&image));
      let result = match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(DetectorError::inference(&name, e)),
        Err(_) => Err(DetectorError::Timeout {
          name: name.clone(),
          after: timeout,
        }),
      };
      debug!("检测器 {} 完成, 耗时: {:.2?}", name, now.elapsed());
      result
    }
  });

  let mut detections = Detections::default();
  for result in join_all(runs).await {
    match result {
      Ok(batch) => detections.batches.push(batch),
      Err(e) => {
        warn!("{}", e);
        detections.failures.push(e);
      }
    }
  }

  if detections.batches.is_empty() && !detections.failures.is_empty() {
    return Err(InteractionError::AllDetectorsFailed(detections.failures));
  }
  Ok(detections)
}

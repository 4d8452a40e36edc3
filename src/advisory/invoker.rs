// 该文件是 Lispa （叶片病虫害识别） 项目的一部分。
// src/advisory/invoker.rs - 单次建议调用
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

use std::{fmt, sync::Arc, time::Duration};

use futures_util::StreamExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::advisory::{
  AdvisoryError, Content,
  agent::Agent,
  session::{SessionHandle, SessionService},
};

pub const DEFAULT_ADVISORY_TIMEOUT: Duration = Duration::from_secs(120);

pub const NO_FINAL_RESPONSE: &str = "Agente não produziu uma resposta final.";
const NO_ESCALATION_MESSAGE: &str = "Sem mensagem específica.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
  Answer,
  Escalation,
  NoResponse,
}

/// 代理给出的最终建议
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
  kind: RecommendationKind,
  text: String,
}

impl Recommendation {
  pub fn answer(text: impl Into<String>) -> Self {
    Self {
      kind: RecommendationKind::Answer,
      text: text.into(),
    }
  }

  pub fn escalation(message: Option<&str>) -> Self {
    let message = message
      .filter(|m| !m.trim().is_empty())
      .unwrap_or(NO_ESCALATION_MESSAGE);
    Self {
      kind: RecommendationKind::Escalation,
      text: format!("Agente escalou: {}", message),
    }
  }

  pub fn no_response() -> Self {
    Self {
      kind: RecommendationKind::NoResponse,
      text: NO_FINAL_RESPONSE.to_string(),
    }
  }

  pub fn kind(&self) -> RecommendationKind {
    self.kind
  }

  pub fn text(&self) -> &str {
    &self.text
  }
}

impl fmt::Display for Recommendation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.text)
  }
}

/// 向会话发送一条消息并等待第一个最终事件
#[derive(Clone)]
pub struct AdvisoryInvoker {
  agent: Arc<dyn Agent>,
  sessions: Arc<dyn SessionService>,
  timeout: Duration,
}

impl AdvisoryInvoker {
  pub fn new(agent: Arc<dyn Agent>, sessions: Arc<dyn SessionService>) -> Self {
    Self {
      agent,
      sessions,
      timeout: DEFAULT_ADVISORY_TIMEOUT,
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn timeout(&self) -> Duration {
    self.timeout
  }

  pub async fn invoke(
    &self,
    session: &SessionHandle,
    message: &str,
  ) -> Result<Recommendation, AdvisoryError> {
    // 同一会话上的调用串行执行
    let _turn = session.begin_turn().await;
    let history = session.history();
    let message = Content::user(message);

    let now = std::time::Instant::now();
    let recommendation = tokio::time::timeout(self.timeout, self.consume(&history, &message))
      .await
      .map_err(|_| AdvisoryError::Timeout(self.timeout))??;
    info!(
      "会话 {} 建议调用完成, 耗时: {:.2?}, 结果: {:?}",
      session.key(),
      now.elapsed(),
      recommendation.kind()
    );

    let mut record = vec![message];
    if recommendation.kind() != RecommendationKind::NoResponse {
      record.push(Content::model(recommendation.text()));
    }
    self.sessions.append_events(session, &record).await?;

    Ok(recommendation)
  }

  async fn consume(
    &self,
    history: &[Content],
    message: &Content,
  ) -> Result<Recommendation, AdvisoryError> {
    let mut events = self.agent.run(history, message).await?;

    while let Some(event) = events.next().await {
      let event = event?;
      if !event.is_final_response() {
        debug!("代理 {} 中间事件: {:?}", event.author, event.content);
        continue;
      }

      if let Some(text) = event.content.as_ref().and_then(Content::text) {
        return Ok(Recommendation::answer(text));
      }
      if event.actions.escalate {
        warn!("代理 {} 请求升级: {:?}", event.author, event.error_message);
        return Ok(Recommendation::escalation(event.error_message.as_deref()));
      }
      break;
    }

    warn!("代理 {} 没有给出最终回复", self.agent.name());
    Ok(Recommendation::no_response())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn escalation_text() {
    assert_eq!(
      Recommendation::escalation(Some("rate limited")).text(),
      "Agente escalou: rate limited"
    );
    assert_eq!(
      Recommendation::escalation(None).text(),
      "Agente escalou: Sem mensagem específica."
    );
    assert_eq!(
      Recommendation::escalation(Some("")).text(),
      "Agente escalou: Sem mensagem específica."
    );
  }

  #[test]
  fn placeholder_text() {
    let r = Recommendation::no_response();
    assert_eq!(r.kind(), RecommendationKind::NoResponse);
    assert_eq!(r.to_string(), NO_FINAL_RESPONSE);
  }
}

// 该文件是 Lispa （叶片病虫害识别） 项目的一部分。
// src/advisory.rs - 农艺建议代理
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

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

mod agent;
mod content;
mod file_session;
mod gemini;
mod invoker;
mod session;

pub use self::agent::{Agent, EventStream, default_instruction};
pub use self::content::{AgentEvent, Content, EventActions, Part, Role};
pub use self::file_session::JsonFileSessionService;
pub use self::gemini::{
  DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL, GeminiAgent, GeminiConfig,
};
pub use self::invoker::{
  AdvisoryInvoker, DEFAULT_ADVISORY_TIMEOUT, NO_FINAL_RESPONSE, Recommendation,
  RecommendationKind,
};
pub use self::session::{
  DEFAULT_APP_NAME, DEFAULT_SESSION_ID, DEFAULT_USER_ID, InMemorySessionService, Session,
  SessionError, SessionHandle, SessionInitError, SessionKey, SessionManager, SessionService,
};

#[derive(Error, Debug)]
pub enum AdvisoryError {
  #[error("未配置 API 密钥 (GOOGLE_API_KEY)")]
  MissingApiKey,
  #[error("HTTP 请求错误: {0}")]
  RequestError(#[from] reqwest::Error),
  #[error("认证失败: {0}")]
  Authentication(String),
  #[error("请求过于频繁: {0}")]
  RateLimited(String),
  #[error("HTTP {status}: {body}")]
  Status { status: u16, body: String },
  #[error("响应解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("代理事件流错误: {0}")]
  Stream(String),
  #[error("建议调用超时 ({0:?})")]
  Timeout(Duration),
  #[error("会话错误: {0}")]
  Session(#[from] SessionError),
}

/// 根据 URL 构建会话存储：`memory:` 或 `folder:<目录>`
pub fn session_service_from_url(url: &Url) -> Result<Arc<dyn SessionService>, SessionError> {
  match url.scheme() {
    InMemorySessionService::SCHEME => Ok(Arc::new(InMemorySessionService::from_url(url)?)),
    JsonFileSessionService::SCHEME => Ok(Arc::new(JsonFileSessionService::from_url(url)?)),
    other => Err(SessionError::SchemeMismatch(format!(
      "不支持的会话存储: {}",
      other
    ))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn session_store_dispatch() {
    assert!(session_service_from_url(&Url::parse("memory:").unwrap()).is_ok());
    assert!(session_service_from_url(&Url::parse("folder:/tmp/lispa").unwrap()).is_ok());
    assert!(matches!(
      session_service_from_url(&Url::parse("redis://localhost").unwrap()),
      Err(SessionError::SchemeMismatch(_))
    ));
  }
}

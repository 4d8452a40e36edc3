// 该文件是 Lispa （叶片病虫害识别） 项目的一部分。
// src/advisory/session.rs - 代理会话与会话存储
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

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, advisory::Content};

pub const DEFAULT_APP_NAME: &str = "LISPA";
pub const DEFAULT_USER_ID: &str = "lispa_usuario";
pub const DEFAULT_SESSION_ID: &str = "default_lispa_usuario";

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("会话记录格式错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("会话存储错误: {0}")]
  Backend(String),
}

#[derive(Error, Debug)]
#[error("无法初始化代理会话: {0}")]
pub struct SessionInitError(#[from] pub SessionError);

/// 会话标识 (应用名, 用户, 会话)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
  pub app_name: String,
  pub user_id: String,
  pub session_id: String,
}

impl SessionKey {
  pub fn new(
    app_name: impl Into<String>,
    user_id: impl Into<String>,
    session_id: impl Into<String>,
  ) -> Self {
    Self {
      app_name: app_name.into(),
      user_id: user_id.into(),
      session_id: session_id.into(),
    }
  }
}

impl Default for SessionKey {
  fn default() -> Self {
    Self::new(DEFAULT_APP_NAME, DEFAULT_USER_ID, DEFAULT_SESSION_ID)
  }
}

impl fmt::Display for SessionKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}/{}", self.app_name, self.user_id, self.session_id)
  }
}

/// 一个代理会话；同一会话上的建议调用依次执行
pub struct Session {
  key: SessionKey,
  created_at: DateTime<Utc>,
  turn: tokio::sync::Mutex<()>,
  history: RwLock<Vec<Content>>,
}

pub type SessionHandle = Arc<Session>;

impl fmt::Debug for Session {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Session")
      .field("key", &self.key)
      .field("created_at", &self.created_at)
      .field("history", &self.history.read().len())
      .finish()
  }
}

impl Session {
  pub fn new(key: SessionKey) -> Self {
    Self::restore(key, Utc::now(), Vec::new())
  }

  pub fn restore(key: SessionKey, created_at: DateTime<Utc>, history: Vec<Content>) -> Self {
    Self {
      key,
      created_at,
      turn: tokio::sync::Mutex::new(()),
      history: RwLock::new(history),
    }
  }

  pub fn key(&self) -> &SessionKey {
    &self.key
  }

  pub fn created_at(&self) -> DateTime<Utc> {
    self.created_at
  }

  pub fn history(&self) -> Vec<Content> {
    self.history.read().clone()
  }

  pub(crate) async fn begin_turn(&self) -> tokio::sync::MutexGuard<'_, ()> {
    self.turn.lock().await
  }

  pub(crate) fn extend_history(&self, contents: &[Content]) {
    self.history.write().extend_from_slice(contents);
  }
}

/// 会话存储
///
/// `create_session` 对已存在的标识必须返回原有会话，不得重复创建。
#[async_trait]
pub trait SessionService: Send + Sync {
  async fn get_session(&self, key: &SessionKey) -> Result<Option<SessionHandle>, SessionError>;

  async fn create_session(&self, key: &SessionKey) -> Result<SessionHandle, SessionError>;

  /// 记录一轮成功对话产生的消息
  async fn append_events(&self, session: &Session, contents: &[Content]) -> Result<(), SessionError>;
}

/// 进程内会话存储，`memory:`
#[derive(Debug, Default)]
pub struct InMemorySessionService {
  sessions: RwLock<HashMap<SessionKey, SessionHandle>>,
}

impl InMemorySessionService {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.sessions.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.sessions.read().is_empty()
  }
}

impl FromUrlWithScheme for InMemorySessionService {
  const SCHEME: &'static str = "memory";
}

impl FromUrl for InMemorySessionService {
  type Error = SessionError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(SessionError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    Ok(Self::new())
  }
}

#[async_trait]
impl SessionService for InMemorySessionService {
  async fn get_session(&self, key: &SessionKey) -> Result<Option<SessionHandle>, SessionError> {
    Ok(self.sessions.read().get(key).cloned())
  }

  async fn create_session(&self, key: &SessionKey) -> Result<SessionHandle, SessionError> {
    let session = self
      .sessions
      .write()
      .entry(key.clone())
      .or_insert_with(|| {
        info!("创建会话: {}", key);
        Arc::new(Session::new(key.clone()))
      })
      .clone();
    Ok(session)
  }

  async fn append_events(&self, session: &Session, contents: &[Content]) -> Result<(), SessionError> {
    session.extend_history(contents);
    Ok(())
  }
}

/// 会话管理，按标识获取或创建会话
#[derive(Clone)]
pub struct SessionManager {
  service: Arc<dyn SessionService>,
}

impl SessionManager {
  pub fn new(service: Arc<dyn SessionService>) -> Self {
    Self { service }
  }

  pub fn service(&self) -> &Arc<dyn SessionService> {
    &self.service
  }

  pub async fn ensure_session(&self, key: &SessionKey) -> Result<SessionHandle, SessionInitError> {
    if let Some(session) = self.service.get_session(key).await? {
      debug!("复用已有会话: {}", key);
      return Ok(session);
    }
    Ok(self.service.create_session(key).await?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn ensure_session_is_idempotent() {
    let service = Arc::new(InMemorySessionService::new());
    let manager = SessionManager::new(service.clone());
    let key = SessionKey::default();

    let first = manager.ensure_session(&key).await.unwrap();
    let second = manager.ensure_session(&key).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(service.len(), 1);

    let other = manager
      .ensure_session(&SessionKey::new(DEFAULT_APP_NAME, "outro", "s1"))
      .await
      .unwrap();
    assert!(!Arc::ptr_eq(&first, &other));
    assert_eq!(service.len(), 2);
  }

  #[tokio::test]
  async fn concurrent_creation_yields_one_session() {
    let service = Arc::new(InMemorySessionService::new());
    let manager = SessionManager::new(service.clone());
    let key = SessionKey::default();

    let handles: Vec<_> = (0..8)
      .map(|_| {
        let manager = manager.clone();
        let key = key.clone();
        tokio::spawn(async move { manager.ensure_session(&key).await.unwrap() })
      })
      .collect();

    let mut sessions = Vec::new();
    for handle in handles {
      sessions.push(handle.await.unwrap());
    }
    assert!(sessions.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(service.len(), 1);
  }

  #[test]
  fn default_identity() {
    assert_eq!(
      SessionKey::default().to_string(),
      "LISPA/lispa_usuario/default_lispa_usuario"
    );
  }

  #[test]
  fn memory_scheme() {
    assert!(InMemorySessionService::from_url(&Url::parse("memory:").unwrap()).is_ok());
    assert!(InMemorySessionService::from_url(&Url::parse("folder:/tmp").unwrap()).is_err());
  }
}

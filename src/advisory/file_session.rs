// 该文件是 Lispa （叶片病虫害识别） 项目的一部分。
// src/advisory/file_session.rs - JSON 文件会话存储
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
  collections::HashMap,
  path::{Path, PathBuf},
  sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  advisory::{
    Content,
    session::{Session, SessionError, SessionHandle, SessionKey, SessionService},
  },
};

#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
  #[serde(flatten)]
  key: SessionKey,
  created_at: DateTime<Utc>,
  history: Vec<Content>,
}

/// 会话文件存储，`folder:<目录>`
///
/// 每个会话保存为 `<目录>/<应用>/<用户>/<会话>.json`，标识经过 URL 编码。
#[derive(Debug)]
pub struct JsonFileSessionService {
  directory: PathBuf,
  sessions: RwLock<HashMap<SessionKey, SessionHandle>>,
}

impl FromUrlWithScheme for JsonFileSessionService {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for JsonFileSessionService {
  type Error = SessionError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(SessionError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    let path = urlencoding::decode(url.path())
      .map(|p| p.into_owned())
      .unwrap_or_else(|_| url.path().to_string());
    Ok(Self::new(path))
  }
}

impl JsonFileSessionService {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      sessions: RwLock::new(HashMap::new()),
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn session_path(&self, key: &SessionKey) -> PathBuf {
    self
      .directory
      .join(urlencoding::encode(&key.app_name).into_owned())
      .join(urlencoding::encode(&key.user_id).into_owned())
      .join(format!("{}.json", urlencoding::encode(&key.session_id)))
  }

  async fn persist(&self, record: &SessionRecord) -> Result<(), SessionError> {
    let path = self.session_path(&record.key);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).await?;
    }
    fs::write(&path, serde_json::to_vec_pretty(record)?).await?;
    debug!("会话已写入: {}", path.display());
    Ok(())
  }

  async fn load(&self, key: &SessionKey) -> Result<Option<Session>, SessionError> {
    let path = self.session_path(key);
    if !fs::try_exists(&path).await? {
      return Ok(None);
    }
    let record: SessionRecord = serde_json::from_slice(&fs::read(&path).await?)?;
    if &record.key != key {
      return Err(SessionError::Backend(format!(
        "会话文件 {} 的标识不匹配",
        path.display()
      )));
    }
    Ok(Some(Session::restore(
      record.key,
      record.created_at,
      record.history,
    )))
  }

  fn cached(&self, key: &SessionKey) -> Option<SessionHandle> {
    self.sessions.read().get(key).cloned()
  }

  fn remember(&self, key: &SessionKey, session: Session) -> SessionHandle {
    self
      .sessions
      .write()
      .entry(key.clone())
      .or_insert_with(|| Arc::new(session))
      .clone()
  }
}

#[async_trait]
impl SessionService for JsonFileSessionService {
  async fn get_session(&self, key: &SessionKey) -> Result<Option<SessionHandle>, SessionError> {
    if let Some(session) = self.cached(key) {
      return Ok(Some(session));
    }
    Ok(self.load(key).await?.map(|session| self.remember(key, session)))
  }

  async fn create_session(&self, key: &SessionKey) -> Result<SessionHandle, SessionError> {
    if let Some(session) = self.get_session(key).await? {
      return Ok(session);
    }
    let session = Session::new(key.clone());
    // 写入成功后才进入缓存
    self
      .persist(&SessionRecord {
        key: key.clone(),
        created_at: session.created_at(),
        history: Vec::new(),
      })
      .await?;
    info!("创建会话文件: {}", self.session_path(key).display());
    Ok(self.remember(key, session))
  }

  async fn append_events(&self, session: &Session, contents: &[Content]) -> Result<(), SessionError> {
    let mut history = session.history();
    history.extend_from_slice(contents);
    self
      .persist(&SessionRecord {
        key: session.key().clone(),
        created_at: session.created_at(),
        history,
      })
      .await?;
    session.extend_history(contents);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn sessions_survive_a_new_store() {
    let dir = tempfile::tempdir().unwrap();
    let key = SessionKey::new("LISPA", "maria josé", "s/1");

    {
      let store = JsonFileSessionService::new(dir.path());
      let session = store.create_session(&key).await.unwrap();
      store
        .append_events(&session, &[Content::user("pergunta"), Content::model("resposta")])
        .await
        .unwrap();
      assert!(store.session_path(&key).exists());
    }

    let store = JsonFileSessionService::new(dir.path());
    let session = store.get_session(&key).await.unwrap().unwrap();
    assert_eq!(session.key(), &key);
    assert_eq!(
      session.history(),
      vec![Content::user("pergunta"), Content::model("resposta")]
    );
  }

  #[tokio::test]
  async fn create_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileSessionService::new(dir.path());
    let key = SessionKey::default();
    let a = store.create_session(&key).await.unwrap();
    let b = store.create_session(&key).await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));
  }

  #[tokio::test]
  async fn corrupt_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileSessionService::new(dir.path());
    let key = SessionKey::default();
    let path = store.session_path(&key);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"not json").unwrap();
    assert!(matches!(
      store.get_session(&key).await,
      Err(SessionError::JsonError(_))
    ));
  }

  #[tokio::test]
  async fn failed_write_leaves_history_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileSessionService::new(dir.path());
    let key = SessionKey::default();
    let session = store.create_session(&key).await.unwrap();

    let path = store.session_path(&key);
    std::fs::remove_file(&path).unwrap();
    std::fs::create_dir(&path).unwrap();

    let result = store
      .append_events(&session, &[Content::user("pergunta"), Content::model("resposta")])
      .await;
    assert!(matches!(result, Err(SessionError::IoError(_))));
    assert!(session.history().is_empty());
  }

  #[tokio::test]
  async fn failed_create_is_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileSessionService::new(dir.path());
    let key = SessionKey::default();
    let app_dir = store.session_path(&key).parent().unwrap().parent().unwrap().to_path_buf();
    std::fs::create_dir_all(app_dir.parent().unwrap()).unwrap();
    std::fs::write(&app_dir, b"").unwrap();

    assert!(store.create_session(&key).await.is_err());
    assert!(store.cached(&key).is_none());
    assert!(store.create_session(&key).await.is_err());
  }
}

//! StaticCredential - 変化しない認証情報
//!
//! 認証不要のモジュール（standalone）とテスト用。refresh はサポートしない。

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::CredentialError;
use crate::ports::{Credential, CredentialHandle};

/// A credential that never changes. Refresh is unsupported.
#[derive(Debug, Clone)]
pub struct StaticCredential {
    credential: Arc<Credential>,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            credential: Arc::new(Credential::new(token, 0)),
        }
    }

    pub fn anonymous() -> Self {
        Self {
            credential: Arc::new(Credential::anonymous()),
        }
    }
}

#[async_trait]
impl CredentialHandle for StaticCredential {
    async fn prepare(&self) -> Result<(), CredentialError> {
        Ok(())
    }

    async fn refresh(&self) -> Result<(), CredentialError> {
        Err(CredentialError::NoRefreshCommand)
    }

    async fn load(&self) -> Result<(), CredentialError> {
        Ok(())
    }

    async fn current(&self) -> Arc<Credential> {
        Arc::clone(&self.credential)
    }
}

//! Single-use provisioning tokens for shrink agents

use crate::cluster::ClusterKey;
use crate::error::{Result, ShrinkError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Authenticates an agent joining (or leaving) the cluster
    Install,
}

/// Credential consumed by a launched agent
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningToken {
    pub token: String,
    pub account_id: String,
    pub cluster_name: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub expires: DateTime<Utc>,
    pub operation_id: Uuid,
    pub user_email: String,
}

impl ProvisioningToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires
    }
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist a provisioning token
    ///
    /// # Returns
    /// * The stored token, or `AlreadyExists` if its value is taken
    async fn create_token(&self, token: ProvisioningToken) -> Result<ProvisioningToken>;

    /// Look up a token; expired tokens are reported as missing
    async fn get_token(&self, token: &str) -> Result<ProvisioningToken>;
}

/// Hex encoded, cryptographically random token of `bytes` random bytes
pub fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Build and persist a token for the shrink agent of `operation_id`
pub async fn create_agent_token(
    store: &dyn TokenStore,
    cluster: &ClusterKey,
    operation_id: Uuid,
    ttl: Duration,
    token_bytes: usize,
) -> Result<String> {
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| ShrinkError::invalid_request(format!("invalid token TTL: {}", e)))?;
    let token = ProvisioningToken {
        token: random_token(token_bytes),
        account_id: cluster.account_id.clone(),
        cluster_name: cluster.cluster_name.clone(),
        token_type: TokenType::Install,
        expires: Utc::now() + ttl,
        operation_id,
        user_email: agent_user_email(&cluster.cluster_name),
    };
    let created = store.create_token(token).await?;
    Ok(created.token)
}

/// Identity agents of a cluster act as
pub fn agent_user_email(cluster_name: &str) -> String {
    format!("agent@{}", cluster_name)
}

/// Token store kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    tokens: Mutex<HashMap<String, ProvisioningToken>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn create_token(&self, token: ProvisioningToken) -> Result<ProvisioningToken> {
        let mut tokens = self.tokens.lock().await;
        if tokens.contains_key(&token.token) {
            return Err(ShrinkError::AlreadyExists("provisioning token already exists".to_string()));
        }
        tokens.insert(token.token.clone(), token.clone());
        Ok(token)
    }

    async fn get_token(&self, token: &str) -> Result<ProvisioningToken> {
        let mut tokens = self.tokens.lock().await;
        match tokens.get(token) {
            Some(t) if t.is_expired(Utc::now()) => {
                tokens.remove(token);
                Err(ShrinkError::not_found("provisioning token not found"))
            }
            Some(t) => Ok(t.clone()),
            None => Err(ShrinkError::not_found("provisioning token not found")),
        }
    }
}

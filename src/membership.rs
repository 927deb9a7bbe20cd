//! Coordination store membership

use crate::error::Result;
use crate::retry::{retry_transient, ExponentialBackoff};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use slog::{info, Logger};
use std::time::Duration;

/// A coordination store cluster member
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: u64,
    pub name: String,
    pub peer_urls: Vec<String>,
}

#[async_trait]
pub trait MembershipClient: Send + Sync {
    async fn list_members(&self) -> Result<Vec<Member>>;

    async fn remove_member(&self, id: u64) -> Result<()>;
}

/// Retry bounds for member removal
#[derive(Clone, Copy, Debug)]
pub struct RemovalLimits {
    /// Total time budget across attempts
    pub timeout: Duration,
    /// Cap on the delay between attempts
    pub max_interval: Duration,
}

/// Remove the member advertising `peer_url`
///
/// A member that is already gone counts as removed. Transient errors are
/// retried with exponential backoff until `limits.timeout` is spent; a call
/// that hangs past that budget is abandoned.
pub async fn remove_member(
    client: &dyn MembershipClient,
    peer_url: &str,
    limits: RemovalLimits,
    logger: &Logger,
) -> Result<()> {
    let backoff = ExponentialBackoff::new(limits.timeout).with_max_interval(limits.max_interval);
    retry_transient(limits.timeout, backoff, move || remove_once(client, peer_url, logger)).await
}

async fn remove_once(client: &dyn MembershipClient, peer_url: &str, logger: &Logger) -> Result<()> {
    let members = client.list_members().await?;
    let Some(member) = members.iter().find(|m| m.peer_urls.iter().any(|url| url == peer_url)) else {
        info!(logger, "Member already removed"; "peer_url" => peer_url);
        return Ok(());
    };
    client.remove_member(member.id).await?;
    info!(logger, "Removed member"; "peer_url" => peer_url, "id" => member.id, "name" => &member.name);
    Ok(())
}

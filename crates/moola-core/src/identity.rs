//! Identity link registry.
//!
//! Issues one-time tokens that the web claim flow redeems to bind a chat
//! identity to a wallet address.

use crate::deadline::bounded;
use crate::error::MoolaError;
use crate::store::{ClaimOutcome, MemberStore};
use crate::types::{LinkToken, Member, MemberId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Which claim page a token is redeemed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPurpose {
    Link,
    WalletUpdate,
}

impl LinkPurpose {
    fn claim_path(&self) -> &'static str {
        match self {
            Self::Link => "game",
            Self::WalletUpdate => "update-wallet",
        }
    }
}

/// Freshly issued token plus the URL the member opens to redeem it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRequest {
    pub token: String,
    pub claim_url: String,
    pub purpose: LinkPurpose,
}

pub struct IdentityRegistry {
    store: Arc<dyn MemberStore>,
    claim_base_url: String,
    timeout: Duration,
}

impl IdentityRegistry {
    pub fn new(
        store: Arc<dyn MemberStore>,
        claim_base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            claim_base_url: claim_base_url.into(),
            timeout,
        }
    }

    /// Issue a link token for a member who has not linked an address yet.
    ///
    /// Outstanding unconsumed tokens are left alone; each call yields a new one.
    pub async fn request_link(&self, id: &MemberId) -> Result<LinkRequest, MoolaError> {
        ensure_identity(id)?;
        let existing = bounded(self.timeout, "member lookup", self.store.get_member(id)).await?;
        if let Some(address) = existing.and_then(|member| member.address) {
            return Err(MoolaError::AlreadyLinked {
                masked_address: mask_address(&address),
            });
        }
        self.issue(id, LinkPurpose::Link).await
    }

    /// Issue a token that lets an already known member replace their address.
    pub async fn request_wallet_update(&self, id: &MemberId) -> Result<LinkRequest, MoolaError> {
        ensure_identity(id)?;
        let existing = bounded(self.timeout, "member lookup", self.store.get_member(id)).await?;
        if existing.is_none() {
            return Err(MoolaError::NotLinked(id.clone()));
        }
        self.issue(id, LinkPurpose::WalletUpdate).await
    }

    /// Redeem a token on behalf of the web claim flow.
    pub async fn claim(
        &self,
        token: &str,
        id: &MemberId,
        address: &str,
    ) -> Result<Member, MoolaError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(MoolaError::Validation("address is required".to_string()));
        }

        let outcome = bounded(
            self.timeout,
            "token claim",
            self.store.claim_link_token(token, id, address),
        )
        .await?;

        match outcome {
            ClaimOutcome::Claimed { member, created } => {
                info!(member = %id, created, "Link token claimed");
                Ok(member)
            }
            ClaimOutcome::Unavailable => {
                warn!(member = %id, "Rejected unavailable link token");
                Err(MoolaError::TokenUnavailable)
            }
        }
    }

    pub async fn pending_tokens(&self, id: &MemberId) -> Result<usize, MoolaError> {
        bounded(
            self.timeout,
            "token count",
            self.store.pending_link_tokens(id),
        )
        .await
    }

    async fn issue(&self, id: &MemberId, purpose: LinkPurpose) -> Result<LinkRequest, MoolaError> {
        let token = LinkToken {
            token: Uuid::new_v4().to_string(),
            external_id: id.clone(),
            consumed: false,
            issued_at: Utc::now(),
        };
        bounded(
            self.timeout,
            "token insert",
            self.store.insert_link_token(&token),
        )
        .await?;

        info!(member = %id, ?purpose, "Link token issued");

        Ok(LinkRequest {
            claim_url: format!(
                "{}/{}?token={}&discord={}",
                self.claim_base_url.trim_end_matches('/'),
                purpose.claim_path(),
                token.token,
                id
            ),
            token: token.token,
            purpose,
        })
    }
}

fn ensure_identity(id: &MemberId) -> Result<(), MoolaError> {
    if id.as_str().trim().is_empty() {
        return Err(MoolaError::Validation("member id is required".to_string()));
    }
    Ok(())
}

/// Shorten an address for display: first two chars, an ellipsis, last four.
pub fn mask_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() < 6 {
        return address.to_string();
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

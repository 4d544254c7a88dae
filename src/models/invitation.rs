use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Type, prelude::FromRow};
use uuid::Uuid;

use crate::models::user::Role;

#[derive(Debug, Type, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[sqlx(type_name = "invitation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Expired,
    Cancelled,
}

#[derive(Serialize, Debug, FromRow)]
pub struct Invitation {
    pub invitation_id: Uuid,
    pub company_id: Uuid,
    pub email: String,
    pub role: Role,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub invited_by: Option<Uuid>,
    pub status: InvitationStatus,
    pub expires_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Expired => "expired",
            InvitationStatus::Cancelled => "cancelled",
        }
    }
}

impl Invitation {
    /// A pending invitation past its expiry reads as expired; the row is
    /// rewritten lazily by whoever observes it.
    pub fn needs_expiry(&self, now: DateTime<Utc>) -> bool {
        self.status == InvitationStatus::Pending && self.expires_at <= now
    }
}

#[derive(Deserialize)]
pub struct CreateInvitationReq {
    pub email: String,
    pub role: Role,
}

#[derive(Deserialize)]
pub struct AcceptInvitationReq {
    pub token: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct InvitationQueryParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<InvitationStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn invitation(status: InvitationStatus, expires_in: Duration) -> Invitation {
        let now = Utc::now();
        Invitation {
            invitation_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            email: "new@acme.io".into(),
            role: Role::Recruiter,
            token_hash: "ab".repeat(32),
            invited_by: None,
            status,
            expires_at: now + expires_in,
            accepted_at: None,
            created_at: now,
        }
    }

    #[test]
    fn test_pending_past_expiry_needs_expiry() {
        let inv = invitation(InvitationStatus::Pending, Duration::hours(-1));
        assert!(inv.needs_expiry(Utc::now()));
    }

    #[test]
    fn test_live_or_settled_invitations_untouched() {
        let now = Utc::now();
        assert!(!invitation(InvitationStatus::Pending, Duration::hours(1)).needs_expiry(now));
        assert!(!invitation(InvitationStatus::Accepted, Duration::hours(-1)).needs_expiry(now));
        assert!(!invitation(InvitationStatus::Cancelled, Duration::hours(-1)).needs_expiry(now));
    }

    #[test]
    fn test_token_hash_not_serialized() {
        let value = serde_json::to_value(invitation(InvitationStatus::Pending, Duration::hours(1))).unwrap();
        assert!(value.get("token_hash").is_none());
        assert_eq!(value["status"], "pending");
    }
}

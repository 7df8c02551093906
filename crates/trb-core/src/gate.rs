//! Membership gate.
//!
//! Admission requires an accepted status in every required channel. Any
//! failure to verify is a denial (fail-closed). Nothing is cached; every
//! request re-queries the identity service.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    domain::{Channel, UserId},
    Result,
};

/// Member status as reported by the identity service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberStatus {
    Owner,
    Administrator,
    Member,
    Restricted,
    Left,
    Banned,
}

impl MemberStatus {
    pub fn is_admitted(self) -> bool {
        matches!(
            self,
            MemberStatus::Owner | MemberStatus::Administrator | MemberStatus::Member
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// First channel that failed the check.
    Denied { channel: Channel },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

/// Identity service port (Telegram `getChatMember`).
#[async_trait]
pub trait MembershipPort: Send + Sync {
    async fn member_status(&self, channel: &Channel, user: UserId) -> Result<MemberStatus>;
}

#[derive(Clone)]
pub struct MembershipGate {
    port: Arc<dyn MembershipPort>,
    timeout: Duration,
}

impl MembershipGate {
    pub fn new(port: Arc<dyn MembershipPort>, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    pub async fn check(&self, user: UserId, required_channels: &[Channel]) -> Admission {
        for channel in required_channels {
            let status =
                tokio::time::timeout(self.timeout, self.port.member_status(channel, user)).await;
            match status {
                Ok(Ok(s)) if s.is_admitted() => {
                    debug!(user_id = user.0, %channel, status = ?s, "membership ok");
                }
                Ok(Ok(s)) => {
                    debug!(user_id = user.0, %channel, status = ?s, "membership denied");
                    return Admission::Denied {
                        channel: channel.clone(),
                    };
                }
                Ok(Err(e)) => {
                    warn!(user_id = user.0, %channel, "membership query failed: {e}");
                    return Admission::Denied {
                        channel: channel.clone(),
                    };
                }
                Err(_) => {
                    warn!(user_id = user.0, %channel, "membership query timed out");
                    return Admission::Denied {
                        channel: channel.clone(),
                    };
                }
            }
        }
        Admission::Allowed
    }
}

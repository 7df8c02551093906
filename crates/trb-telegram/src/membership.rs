//! `getChatMember`-backed membership lookups.

use async_trait::async_trait;
use teloxide::{
    prelude::*,
    types::{ChatMemberKind, Recipient},
};

use trb_core::{
    domain::{Channel, UserId},
    errors::Error,
    gate::{MemberStatus, MembershipPort},
    Result,
};

#[derive(Clone)]
pub struct TelegramMembership {
    bot: Bot,
}

impl TelegramMembership {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn recipient(channel: &Channel) -> Recipient {
    match channel {
        Channel::Username(name) => Recipient::ChannelUsername(name.clone()),
        Channel::Id(id) => Recipient::Id(teloxide::types::ChatId(*id)),
    }
}

fn status_of(kind: &ChatMemberKind) -> MemberStatus {
    match kind {
        ChatMemberKind::Owner(_) => MemberStatus::Owner,
        ChatMemberKind::Administrator(_) => MemberStatus::Administrator,
        ChatMemberKind::Member => MemberStatus::Member,
        ChatMemberKind::Restricted(_) => MemberStatus::Restricted,
        ChatMemberKind::Left => MemberStatus::Left,
        ChatMemberKind::Banned(_) => MemberStatus::Banned,
    }
}

#[async_trait]
impl MembershipPort for TelegramMembership {
    async fn member_status(&self, channel: &Channel, user: UserId) -> Result<MemberStatus> {
        let user_id = u64::try_from(user.0)
            .map_err(|_| Error::External(format!("invalid telegram user id {}", user.0)))?;
        let member = self
            .bot
            .get_chat_member(recipient(channel), teloxide::types::UserId(user_id))
            .await
            .map_err(|e| Error::External(format!("telegram getChatMember failed: {e}")))?;
        Ok(status_of(&member.kind))
    }
}

//! Relays a finished artifact to the requester.
//!
//! The local file is removed after every publish attempt; the download
//! counter moves only on success.

use std::{path::Path, sync::Arc};

use tracing::{info, warn};

use crate::{
    domain::{ChatId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{ChatAction, InlineKeyboard, OutgoingFile, UploadKind},
    },
    usage::UsageStore,
    utils::truncate_text,
    Result,
};

/// Telegram rejects longer media captions.
const MAX_CAPTION_LEN: usize = 1000;

#[derive(Clone)]
pub struct Dispatcher {
    messenger: Arc<dyn MessagingPort>,
    usage: Arc<UsageStore>,
}

impl Dispatcher {
    pub fn new(messenger: Arc<dyn MessagingPort>, usage: Arc<UsageStore>) -> Self {
        Self { messenger, usage }
    }

    pub async fn publish(
        &self,
        local_path: &Path,
        display_name: &str,
        target: ChatId,
        affordances: InlineKeyboard,
    ) -> Result<MessageRef> {
        let res = self
            .upload(local_path, display_name, target, affordances)
            .await;

        match tokio::fs::remove_file(local_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %local_path.display(), "failed to remove relayed file: {e}"),
        }

        let msg = res?;
        info!(chat_id = target.0, file = %display_name, "artifact relayed");

        if let Err(e) = self.usage.record_download().await {
            warn!("failed to persist download counter: {e}");
        }
        Ok(msg)
    }

    async fn upload(
        &self,
        local_path: &Path,
        display_name: &str,
        target: ChatId,
        affordances: InlineKeyboard,
    ) -> Result<MessageRef> {
        let kind = UploadKind::for_path(Path::new(display_name));
        let action = match kind {
            UploadKind::Video => ChatAction::UploadVideo,
            UploadKind::Document => ChatAction::UploadDocument,
        };
        if self.messenger.capabilities().supports_chat_actions {
            let _ = self.messenger.send_chat_action(target, action).await;
        }

        let caption = truncate_text(display_name, MAX_CAPTION_LEN);
        let file = OutgoingFile {
            path: local_path,
            file_name: display_name,
            caption: &caption,
            kind,
            keyboard: (!affordances.is_empty()).then_some(affordances),
        };
        self.messenger
            .send_file(target, file)
            .await
            .map_err(|e| match e {
                Error::UploadFailed(_) => e,
                other => Error::UploadFailed(other.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        testing::{FakeMessenger, Sent},
        views,
    };

    async fn setup(
        messenger: FakeMessenger,
    ) -> (tempfile::TempDir, Arc<FakeMessenger>, Arc<UsageStore>, Dispatcher) {
        let dir = tempfile::tempdir().unwrap();
        let messenger = Arc::new(messenger);
        let usage = Arc::new(UsageStore::open(dir.path().join("usage.json")).await.unwrap());
        let dispatcher = Dispatcher::new(messenger.clone(), usage.clone());
        (dir, messenger, usage, dispatcher)
    }

    #[tokio::test]
    async fn success_removes_file_and_counts_download() {
        let (dir, messenger, usage, dispatcher) = setup(FakeMessenger::new()).await;
        let path = dir.path().join("clip_1_1.mp4");
        std::fs::write(&path, b"video").unwrap();

        dispatcher
            .publish(&path, "clip.mp4", ChatId(5), views::download_more_keyboard())
            .await
            .unwrap();

        assert!(!path.exists());
        assert_eq!(usage.snapshot().await.total_downloads, 1);
        assert_eq!(
            messenger.sent(),
            vec![Sent::File {
                chat_id: ChatId(5),
                file_name: "clip.mp4".to_string(),
                kind: UploadKind::Video,
                bytes: 5,
                keyboard: Some(views::download_more_keyboard()),
            }]
        );
    }

    #[tokio::test]
    async fn failure_still_removes_file_and_skips_counter() {
        let (dir, _messenger, usage, dispatcher) = setup(FakeMessenger::failing_uploads()).await;
        let path = dir.path().join("doc_1_1.zip");
        std::fs::write(&path, b"zip").unwrap();

        let err = dispatcher
            .publish(&path, "doc.zip", ChatId(5), InlineKeyboard::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UploadFailed(_)));
        assert!(!path.exists());
        assert_eq!(usage.snapshot().await.total_downloads, 0);
    }

    #[tokio::test]
    async fn upload_indicator_only_when_supported() {
        let (dir, messenger, _usage, dispatcher) = setup(FakeMessenger::with_chat_actions()).await;
        let path = dir.path().join("doc_1_1.zip");
        std::fs::write(&path, b"zip").unwrap();

        dispatcher
            .publish(&path, "doc.zip", ChatId(5), InlineKeyboard::default())
            .await
            .unwrap();

        let sent = messenger.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], Sent::Action(ChatId(5), ChatAction::UploadDocument));
        assert!(matches!(sent[1], Sent::File { kind: UploadKind::Document, .. }));
    }
}

//! User-facing texts and affordances.
//!
//! Keyboards are built as transport-neutral `InlineKeyboard` values; the
//! Telegram adapter maps them to its own markup.

use crate::{
    domain::Channel,
    messaging::types::InlineKeyboard,
    progress::{format_bytes, render_bar, ProgressSample},
    usage::UsageCounters,
};

pub const CB_CHECK_JOIN: &str = "check_join";
pub const CB_DOWNLOAD_MORE: &str = "download_more";
pub const CB_STATS: &str = "stats";
pub const CB_CLEAN: &str = "clean";

pub const WELCOME: &str =
    "📦 <b>Terabox Downloader</b>\n\nSend a Terabox share link and I will fetch the files for you.";
pub const HELP: &str = "📖 <b>How to use</b>\n\n\
1. Join the required channel(s).\n\
2. Send a Terabox share link.\n\
3. Wait while the file downloads; it arrives here when done.\n\n\
Commands: /start, /help";
pub const JOIN_REQUIRED: &str = "⚠️ <b>Join the channel to use this bot</b>";
pub const JOIN_FIRST: &str = "❌ Join all channels first!";
pub const VERIFIED: &str = "✅ <b>Verified!</b>\nSend a Terabox link.";
pub const SEND_LINK: &str = "🔗 Send a Terabox link.";
pub const INVALID_LINK: &str = "❌ Send a valid Terabox link.";
pub const FETCHING: &str = "⏳ Fetching files...";
pub const NO_FILES: &str = "❌ No files found.";
pub const RESOLVE_FAILED: &str = "❌ Failed to fetch files. Please try again later.";
pub const GENERIC_FAILURE: &str = "⚠️ Something went wrong. Please try again.";
pub const ADMINS_ONLY: &str = "Admins only.";

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// One join button per channel that has a public link, then a re-check button.
pub fn join_keyboard(channels: &[Channel]) -> InlineKeyboard {
    let mut kb = InlineKeyboard::default();
    for ch in channels {
        if let Some(url) = ch.join_url() {
            kb = kb.url("📢 Join Channel", url);
        }
    }
    kb.callback("✅ Joined", CB_CHECK_JOIN)
}

pub fn download_more_keyboard() -> InlineKeyboard {
    InlineKeyboard::default().callback("⬇️ Download More", CB_DOWNLOAD_MORE)
}

pub fn main_menu_keyboard() -> InlineKeyboard {
    InlineKeyboard::default().callback("📥 Download Terabox", CB_DOWNLOAD_MORE)
}

pub fn admin_keyboard() -> InlineKeyboard {
    InlineKeyboard::default()
        .callback("📊 Stats", CB_STATS)
        .callback("🧹 Clean", CB_CLEAN)
}

pub fn downloading_text(file_name: &str, sample: &ProgressSample) -> String {
    format!(
        "📥 Downloading <b>{}</b>\n{}\n{} / {}",
        escape_html(file_name),
        render_bar(sample),
        format_bytes(sample.bytes_done),
        total_label(sample.bytes_total)
    )
}

pub fn uploading_text(file_name: &str, sample: &ProgressSample) -> String {
    format!(
        "📤 Uploading <b>{}</b> ({})",
        escape_html(file_name),
        format_bytes(sample.bytes_done)
    )
}

pub fn starting_text(file_name: &str, index: usize, count: usize) -> String {
    if count > 1 {
        format!(
            "📥 Downloading <b>{}</b> ({index}/{count})...",
            escape_html(file_name)
        )
    } else {
        format!("📥 Downloading <b>{}</b>...", escape_html(file_name))
    }
}

pub fn too_large_text(file_name: &str, size: u64, ceiling: u64) -> String {
    format!(
        "⚠️ Skipped <b>{}</b>: {} exceeds the {} limit.",
        escape_html(file_name),
        format_bytes(size),
        format_bytes(ceiling)
    )
}

pub fn download_failed_text(file_name: &str) -> String {
    format!("❌ Failed to download <b>{}</b>.", escape_html(file_name))
}

pub fn upload_failed_text(file_name: &str) -> String {
    format!("❌ Failed to send <b>{}</b>.", escape_html(file_name))
}

pub fn stats_text(counters: UsageCounters, scratch_files: usize) -> String {
    format!(
        "📊 <b>Stats</b>\n\n👤 Users: {}\n📥 Downloads: {}\n🗂 Scratch files: {scratch_files}",
        counters.total_users, counters.total_downloads
    )
}

pub fn cleaned_text(removed: usize) -> String {
    format!("🧹 Storage cleaned ({removed} files removed)")
}

fn total_label(total: u64) -> String {
    if total == 0 {
        "unknown".to_string()
    } else {
        format_bytes(total)
    }
}

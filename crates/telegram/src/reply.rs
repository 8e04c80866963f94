//! Reply texts, in Telegram's HTML parse mode.

use bunnydrop_relay::{Error as RelayError, MediaRules, Stage, Uploaded};

pub const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[must_use]
pub fn success(uploaded: &Uploaded) -> String {
    format!(
        "✅ <b>Uploaded Successfully</b>\n🎬 <code>{}</code>\n🔗 <a href=\"{}\">Watch Now</a>\n{}",
        escape_html(&uploaded.filename),
        escape_html(&uploaded.public_url),
        escape_html(&uploaded.public_url),
    )
}

/// Names the stage and carries the detail; format errors pass through verbatim.
#[must_use]
pub fn failure(error: &RelayError) -> String {
    let text = match error {
        RelayError::Format(e) => format!("⚠️ {}", escape_html(&e.to_string())),
        RelayError::Transfer(e) => {
            let title = match e.stage() {
                Stage::Fetch => "Download failed",
                Stage::Upload => "Upload failed",
            };
            format!("❌ <b>{title}</b>\n<code>{}</code>", escape_html(e.detail()))
        },
        other => format!("❌ <b>Relay error</b>\n<code>{}</code>", escape_html(&other.to_string())),
    };
    truncate(text)
}

/// Answer to `/start` and `/help`.
#[must_use]
pub fn usage(rules: &MediaRules) -> String {
    let example = escape_html(&rules.usage_example());
    format!(
        "👋 Send me a video link and I will put it on the CDN.\n\n\
         • <code>{example}</code> uploads under that name\n\
         • a bare link uses the name from the link\n\
         • or send the video itself; a caption like <code>name.{}</code> names it",
        escape_html(rules.default_extension()),
    )
}

/// Reply for messages that are neither text nor a video.
#[must_use]
pub fn unsupported(rules: &MediaRules) -> String {
    format!(
        "⚠️ I can only relay links and videos. Send as: <code>{}</code>",
        escape_html(&rules.usage_example())
    )
}

/// Keep long failure bodies under the message limit.
fn truncate(text: String) -> String {
    if text.chars().count() <= TELEGRAM_MAX_MESSAGE_LEN {
        return text;
    }
    let mut cut: String = text.chars().take(TELEGRAM_MAX_MESSAGE_LEN - 16).collect();
    // Never end on half an entity or half a tag.
    if let Some(i) = cut.rfind('&')
        && !cut[i..].contains(';')
    {
        cut.truncate(i);
    }
    if let Some(i) = cut.rfind('<')
        && !cut[i..].contains('>')
    {
        cut.truncate(i);
    }
    if cut.matches("<code>").count() > cut.matches("</code>").count() {
        format!("{cut}…</code>")
    } else {
        format!("{cut}…")
    }
}

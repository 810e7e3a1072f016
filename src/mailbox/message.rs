//! Fetched message type — MIME decoding, body selection, reply/forward splitting.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use mail_parser::{HeaderValue, MessageParser};
use regex::Regex;

/// One message as fetched from the mailbox. Immutable after creation.
#[derive(Debug, Clone)]
pub struct Message {
    /// Server-assigned stable identifier within the source folder.
    pub uid: u32,
    /// Message-ID without angle brackets; may be empty.
    pub message_id: String,
    /// First In-Reply-To id without angle brackets; may be empty.
    pub in_reply_to: String,
    /// References ids without angle brackets, in header order.
    pub references: Vec<String>,
    pub subject: String,
    /// Display form of the From header ("Name <addr>" or bare address).
    pub from: String,
    /// Bare sender address, lowercased.
    pub from_addr: String,
    /// Display form of the To header, comma-joined.
    pub to: String,
    /// Display form of the Cc header, comma-joined.
    pub cc: String,
    pub date: Option<DateTime<Utc>>,
    /// Best body text: newest content first, quoted history appended.
    pub body: String,
    /// Full body text of the best part, without splitting or quoting.
    pub body_raw: String,
}

impl Message {
    /// Parse a raw RFC 822 message into a `Message`.
    ///
    /// Returns `None` when the bytes are not parseable at all; callers log
    /// and skip rather than abort the fetch.
    pub fn parse(uid: u32, raw: &[u8]) -> Option<Self> {
        let parsed = MessageParser::default().parse(raw)?;

        let from_addr = parsed
            .from()
            .and_then(|a| a.first())
            .and_then(|a| a.address.as_deref())
            .unwrap_or_default()
            .to_ascii_lowercase();

        Some(Self {
            uid,
            message_id: parsed.message_id().map(normalize_mid).unwrap_or_default(),
            in_reply_to: header_ids(&parsed, "In-Reply-To")
                .into_iter()
                .next()
                .unwrap_or_default(),
            references: header_ids(&parsed, "References"),
            subject: parsed.subject().unwrap_or_default().to_string(),
            from: display_address(parsed.from()),
            from_addr,
            to: display_address(parsed.to()),
            cc: display_address(parsed.cc()),
            date: parsed
                .date()
                .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0)),
            body: best_body_text(&parsed),
            body_raw: raw_body_text(&parsed),
        })
    }

    /// Chronological ordering key: date first (undated sorts first), then uid.
    pub fn sort_key(&self) -> (Option<DateTime<Utc>>, u32) {
        (self.date, self.uid)
    }
}

/// Strip angle brackets and surrounding whitespace from a message id.
pub fn normalize_mid(s: &str) -> String {
    s.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}

fn split_ids(raw: &str) -> Vec<String> {
    raw.split_whitespace()
        .map(normalize_mid)
        .filter(|s| !s.is_empty())
        .collect()
}

fn header_ids(parsed: &mail_parser::Message<'_>, name: &str) -> Vec<String> {
    match parsed.header(name) {
        Some(HeaderValue::Text(t)) => split_ids(t),
        Some(HeaderValue::TextList(ts)) => ts.iter().flat_map(|t| split_ids(t)).collect(),
        _ => Vec::new(),
    }
}

/// Render an address header for display: "Name <addr>" per mailbox, comma-joined.
fn display_address(addr: Option<&mail_parser::Address>) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut push = |a: &mail_parser::Addr| match (a.name.as_deref(), a.address.as_deref()) {
        (Some(name), Some(addr)) => parts.push(format!("{name} <{addr}>")),
        (None, Some(addr)) => parts.push(addr.to_string()),
        (Some(name), None) => parts.push(name.to_string()),
        (None, None) => {}
    };
    match addr {
        Some(mail_parser::Address::List(addrs)) => {
            for a in addrs {
                push(a);
            }
        }
        Some(mail_parser::Address::Group(groups)) => {
            for g in groups {
                for a in &g.addresses {
                    push(a);
                }
            }
        }
        None => {}
    }
    parts.join(", ")
}

// ── Newest content vs. quoted history ───────────────────────────────

static REPLY_MARKERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // typical Outlook/Thunderbird separators
        r"(?i)^\s*-{2,}\s*Original Message\s*-{2,}\s*$",
        r"(?i)^\s*-{2,}\s*Urspr[uü]ngliche Nachricht\s*-{2,}\s*$",
        // "On ... wrote:" (EN) and "Am ... schrieb ...:" (DE)
        r"(?i)^\s*On .+ wrote:\s*$",
        r"(?i)^\s*Am .+ schrieb .+:\s*$",
        // header block starting a quoted reply/forward
        r"(?i)^\s*(From|Von)\s*:\s*.+$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Split the newest contribution from the quoted history below it.
///
/// The first reply marker found at line index >= 2 cuts the text; requiring
/// some content above the marker avoids false positives on forwarded mails
/// that start with a header block.
pub fn split_newest_and_history(text: &str) -> (String, String) {
    if text.is_empty() {
        return (String::new(), String::new());
    }

    let lines: Vec<&str> = text.lines().collect();
    let mut cut = None;
    for (i, line) in lines.iter().enumerate() {
        if i >= 2 && REPLY_MARKERS.iter().any(|rx| rx.is_match(line.trim())) {
            cut = Some(i);
            break;
        }
    }

    match cut {
        None => (text.trim().to_string(), String::new()),
        Some(i) => (
            lines[..i].join("\n").trim().to_string(),
            lines[i..].join("\n").trim().to_string(),
        ),
    }
}

/// Quote the history with a flat "> " prefix, no quote-level escalation.
pub fn quote_history(history: &str) -> String {
    if history.is_empty() {
        return String::new();
    }
    history
        .lines()
        .map(|ln| format!("> {ln}"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

// ── Body selection across MIME parts ────────────────────────────────

/// Score a candidate body text: visible characters count for it, a high
/// share of quoted lines counts against it, stubs score zero.
fn score_candidate(text: &str) -> i64 {
    let stripped = text.trim();
    if stripped.chars().count() < 20 {
        return 0;
    }

    let non_empty: Vec<&str> = stripped.lines().filter(|l| !l.trim().is_empty()).collect();
    if non_empty.is_empty() {
        return 0;
    }

    let quoted = non_empty
        .iter()
        .filter(|l| l.trim_start().starts_with('>'))
        .count();
    let quote_ratio = quoted as f64 / non_empty.len() as f64;

    let base = stripped.chars().filter(|c| !c.is_whitespace()).count() as i64;
    let penalty = (base as f64 * 0.6 * quote_ratio) as i64;

    (base - penalty).max(0)
}

fn merged_candidate(raw: &str) -> String {
    let (newest, history) = split_newest_and_history(raw);
    if history.is_empty() {
        newest
    } else {
        format!(
            "{newest}\n\nQuoted history (trimmed):\n{}",
            quote_history(&history)
        )
    }
}

/// Pick the best body text across all inline text/html parts.
///
/// Every candidate is reshaped to newest-content-first with quoted history
/// appended, then scored; the highest score wins. This beats taking the
/// first part: multipart/alternative often carries stub plain parts
/// ("open in browser") next to the real content.
pub fn best_body_text(parsed: &mail_parser::Message<'_>) -> String {
    let mut best: Option<(i64, String)> = None;
    let mut consider = |raw: String| {
        let merged = merged_candidate(&raw);
        let score = score_candidate(&merged);
        if best.as_ref().is_none_or(|(s, _)| score > *s) {
            best = Some((score, merged));
        }
    };

    for i in 0..parsed.text_body_count() {
        if let Some(t) = parsed.body_text(i) {
            consider(t.to_string());
        }
    }
    for i in 0..parsed.html_body_count() {
        if let Some(h) = parsed.body_html(i) {
            consider(strip_html(&h));
        }
    }

    best.map(|(_, t)| t.trim().to_string()).unwrap_or_default()
}

/// Full body text of the preferred part, without split/score/quote.
///
/// Text parts win over stripped HTML; among several, the longest wins.
pub fn raw_body_text(parsed: &mail_parser::Message<'_>) -> String {
    let plain: Vec<String> = (0..parsed.text_body_count())
        .filter_map(|i| parsed.body_text(i).map(|c| c.to_string()))
        .collect();
    if let Some(longest) = plain.iter().max_by_key(|t| t.chars().count()) {
        return longest.trim().to_string();
    }

    let html: Vec<String> = (0..parsed.html_body_count())
        .filter_map(|i| parsed.body_html(i).map(|c| strip_html(&c)))
        .collect();
    html.iter()
        .max_by_key(|t| t.chars().count())
        .map(|t| t.trim().to_string())
        .unwrap_or_default()
}

static HTML_BREAKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<\s*(?:br\s*/?|/p|/div|/li|/tr|/h[1-6]|/table|/ul|/ol)\s*>").unwrap()
});
static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// HTML to text, keeping line structure so quote detection still works.
pub fn strip_html(html: &str) -> String {
    let html = HTML_BREAKS.replace_all(html, "\n");

    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }

    // &amp; must be decoded last to keep double-escaped entities escaped
    let out = out
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    let out = out.replace("\r\n", "\n").replace('\r', "\n");
    BLANK_RUNS.replace_all(&out, "\n\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_cuts_at_wrote_marker() {
        let text = "Thanks, works for me.\n\nSee you Friday.\nOn Mon, Jul 7, 2025 at 9:12 AM Alice <alice@ex.com> wrote:\n> earlier text";
        let (newest, history) = split_newest_and_history(text);
        assert_eq!(newest, "Thanks, works for me.\n\nSee you Friday.");
        assert!(history.starts_with("On Mon"));
    }

    #[test]
    fn split_ignores_marker_in_first_two_lines() {
        let text = "From: someone@example.com\nSubject echoed\nactual content here";
        let (newest, history) = split_newest_and_history(text);
        assert_eq!(newest, text);
        assert!(history.is_empty());
    }

    #[test]
    fn split_handles_german_marker() {
        let text = "Passt.\nDanke!\nAm 07.07.2025 schrieb Bob <bob@ex.com>:\n> alter Text";
        let (newest, history) = split_newest_and_history(text);
        assert_eq!(newest, "Passt.\nDanke!");
        assert!(history.contains("alter Text"));
    }

    #[test]
    fn quote_history_prefixes_every_line() {
        assert_eq!(quote_history("a\nb"), "> a\n> b");
        assert_eq!(quote_history(""), "");
    }

    #[test]
    fn score_prefers_fresh_content_over_quotes() {
        let fresh = "This is a real answer with enough substance to count.";
        let quoted = "> line one quoted here\n> line two quoted here\n> line three quoted";
        assert!(score_candidate(fresh) > score_candidate(quoted));
    }

    #[test]
    fn score_rejects_stubs() {
        assert_eq!(score_candidate("open in browser"), 0);
        assert_eq!(score_candidate(""), 0);
    }

    #[test]
    fn strip_html_keeps_line_breaks() {
        let html = "<p>First line</p><p>Second line</p>";
        let text = strip_html(html);
        assert_eq!(text, "First line\nSecond line");
    }

    #[test]
    fn strip_html_keeps_stray_gt() {
        assert_eq!(strip_html("> quoted line"), "> quoted line");
    }

    #[test]
    fn strip_html_decodes_entities_in_order() {
        assert_eq!(strip_html("&amp;lt;"), "&lt;");
        assert_eq!(strip_html("Tom &amp; Jerry &gt; cartoons"), "Tom & Jerry > cartoons");
    }

    #[test]
    fn normalize_mid_strips_brackets() {
        assert_eq!(normalize_mid(" <abc@example.com> "), "abc@example.com");
        assert_eq!(normalize_mid("plain-id"), "plain-id");
    }

    #[test]
    fn parse_full_message() {
        let raw = b"From: Alice Example <alice@example.com>\r\n\
To: Bob <bob@example.com>\r\n\
Cc: carol@example.com\r\n\
Subject: Quarterly numbers\r\n\
Message-ID: <m1@example.com>\r\n\
In-Reply-To: <m0@example.com>\r\n\
References: <root@example.com> <m0@example.com>\r\n\
Date: Tue, 01 Jul 2025 10:00:00 +0000\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Here are the numbers you asked for.\r\n";

        let msg = Message::parse(7, raw).unwrap();
        assert_eq!(msg.uid, 7);
        assert_eq!(msg.message_id, "m1@example.com");
        assert_eq!(msg.in_reply_to, "m0@example.com");
        assert_eq!(msg.references, vec!["root@example.com", "m0@example.com"]);
        assert_eq!(msg.from_addr, "alice@example.com");
        assert!(msg.from.contains("Alice Example"));
        assert!(msg.to.contains("bob@example.com"));
        assert!(msg.cc.contains("carol@example.com"));
        assert_eq!(msg.subject, "Quarterly numbers");
        assert!(msg.date.is_some());
        assert!(msg.body.contains("numbers you asked for"));
    }

    #[test]
    fn sort_key_orders_undated_first() {
        let raw = b"Subject: x\r\n\r\nbody text for parsing";
        let mut a = Message::parse(1, raw).unwrap();
        let mut b = Message::parse(2, raw).unwrap();
        a.date = None;
        b.date = DateTime::from_timestamp(1_700_000_000, 0);
        assert!(a.sort_key() < b.sort_key());
    }
}

//! Reply drafts for actionable threads, saved into the drafts folder.
//!
//! Three steps, mirrored by three entry points: decide whether a
//! thread deserves a draft, generate the reply text, and assemble an
//! RFC 2822 message that mail clients will open as an editable draft.
//! Saving runs as its own pass so a slow generation phase never holds
//! a mailbox session.

use std::path::Path;
use std::sync::Arc;
use std::sync::LazyLock;

use lettre::message::header::ContentTransferEncoding;
use lettre::message::{Mailbox, Message as MimeMessage, SinglePart, header};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::analysis::{Category, DecisionRecord};
use crate::error::{DraftError, OracleError};
use crate::mailbox::{MailStore, Message};
use crate::oracle::{GenerationOptions, Oracle};
use crate::threading::Thread;

/// Marks generated drafts so they are recognizable in the subject list.
pub const DRAFT_SUBJECT_PREFIX: &str = "[Sentinel Draft]";

/// Embedded draft prompt, overridable via a template file. Placeholders
/// are substituted literally; `{roles}` receives a whole line or
/// nothing.
pub const DEFAULT_DRAFT_PROMPT: &str = "\
You are the e-mail assistant of {person} and write a reply draft on their behalf.
{roles}
The message being answered:
Subject: {subject}
Sender: {sender}
Summary of the request: {summary}
Open action items: {actions}

Write a complete, polite reply in the language of the original message.
Be concrete and brief. Output only the reply text itself: no subject
line, no quoted original, no commentary.

--- EMAIL START ---
{email_text}
--- EMAIL END ---
";

static REPLY_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(Re|AW|Antwort|Antw|SV|VS|Ref)\s*:\s*").unwrap());

/// LIST line for a folder advertising the `\Drafts` special-use
/// attribute, any delimiter, quoted or bare name.
static DRAFTS_LIST_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\) (?:"[^"]*"|NIL) (?:"([^"]+)"|(\S+))$"#).unwrap());

#[derive(Debug, Default, Clone, Copy)]
pub struct DraftStats {
    pub generated: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct DraftSaveStats {
    pub saved: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// A fully assembled draft waiting for the save pass.
pub struct PreparedDraft {
    /// Truncated subject for log lines and error reports.
    pub subject_log: String,
    pub raw: Vec<u8>,
}

pub struct DraftWriter {
    oracle: Arc<dyn Oracle>,
    prompt_base: String,
    person: String,
    identity_addr: String,
    roles: String,
    signature: Option<String>,
}

impl DraftWriter {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        prompt_base: String,
        person: String,
        identity_addr: String,
        roles: String,
        signature: Option<String>,
    ) -> Self {
        DraftWriter {
            oracle,
            prompt_base,
            person,
            identity_addr: identity_addr.to_lowercase(),
            roles,
            signature,
        }
    }

    /// Whether this thread gets a reply draft at all. Junk and FYI
    /// need no reply, self-sent mail answers itself, and a record
    /// without real action items has nothing to respond to.
    pub fn wants_draft(&self, record: &DecisionRecord, thread: &Thread) -> bool {
        if !matches!(record.category, Category::Actionable) {
            return false;
        }
        let Some(newest) = thread.newest() else {
            return false;
        };
        if !self.identity_addr.is_empty() && newest.from_addr == self.identity_addr {
            return false;
        }
        record.has_real_actions()
    }

    /// One oracle call for the reply text. Empty responses surface as
    /// errors so the caller can count them as failed.
    pub async fn generate(
        &self,
        thread: &Thread,
        record: &DecisionRecord,
        sender_context: Option<&str>,
    ) -> Result<String, OracleError> {
        let roles_line = if self.roles.trim().is_empty() {
            String::new()
        } else {
            format!("\nRoles and responsibilities: {}\n", self.roles.trim())
        };
        let prompt = format!(
            "{}{}",
            sender_context.unwrap_or(""),
            self.prompt_base
                .replace("{person}", &self.person)
                .replace("{roles}", &roles_line)
                .replace("{subject}", &record.subject)
                .replace("{sender}", &record.sender)
                .replace("{summary}", &record.summary)
                .replace("{actions}", &record.actions)
                .replace("{email_text}", &thread.format_for_prompt())
        );
        self.oracle
            .generate(&prompt, GenerationOptions::draft(thread.len()))
            .await
    }

    /// Assemble the draft as raw message bytes.
    ///
    /// The body is the generated text, an optional signature behind
    /// the RFC separator, and a full quote of the newest message.
    /// Quoted-printable keeps the draft editable in common clients.
    pub fn build_message(
        &self,
        thread: &Thread,
        draft_body: &str,
    ) -> Result<PreparedDraft, DraftError> {
        let newest = thread.newest().ok_or(DraftError::EmptyThread)?;

        let mut body = draft_body.trim_end().to_string();
        if let Some(signature) = &self.signature {
            body.push_str("\n\n-- \n");
            body.push_str(signature);
        }
        let quote = full_quote(newest);
        if !quote.is_empty() {
            body.push_str("\n\n\n");
            body.push_str(&quote);
        }

        let from = parse_mailbox(&format!("{} <{}>", self.person, self.identity_addr))?;
        let to = parse_mailbox(&newest.from)
            .or_else(|_| parse_mailbox(&newest.from_addr))?;

        let mut builder = MimeMessage::builder()
            .from(from)
            .to(to)
            .subject(reply_subject(&newest.subject))
            .date_now();
        if !newest.message_id.is_empty() {
            builder = builder.in_reply_to(format!("<{}>", newest.message_id));
        }
        let references = reference_chain(thread);
        if !references.is_empty() {
            builder = builder.references(references);
        }

        let message = builder.singlepart(
            SinglePart::builder()
                .header(header::ContentType::TEXT_PLAIN)
                .header(ContentTransferEncoding::QuotedPrintable)
                .body(body),
        )?;

        let subject_log: String = if newest.subject.is_empty() {
            "?".to_string()
        } else {
            newest.subject.chars().take(80).collect()
        };
        Ok(PreparedDraft {
            subject_log,
            raw: message.formatted(),
        })
    }
}

fn parse_mailbox(s: &str) -> Result<Mailbox, DraftError> {
    s.parse().map_err(|e: lettre::address::AddressError| {
        DraftError::Address {
            address: s.to_string(),
            reason: e.to_string(),
        }
    })
}

/// Reply subject: add `Re:` unless some reply prefix is already there,
/// then mark the draft.
fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if REPLY_PREFIX.is_match(trimmed) {
        format!("{DRAFT_SUBJECT_PREFIX} {trimmed}")
    } else {
        format!("{DRAFT_SUBJECT_PREFIX} Re: {trimmed}")
    }
}

/// Quote the newest message line by line under an attribution header.
fn full_quote(newest: &Message) -> String {
    let original = if newest.body_raw.trim().is_empty() {
        newest.body.trim()
    } else {
        newest.body_raw.trim()
    };
    if original.is_empty() {
        return String::new();
    }
    let date = newest
        .date
        .map(|d| d.to_rfc3339())
        .unwrap_or_default();
    let quoted: String = original
        .lines()
        .map(|line| format!("> {line}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("On {date}, {} wrote:\n{quoted}", newest.from)
}

/// All message ids in the thread, oldest first, deduplicated.
fn reference_chain(thread: &Thread) -> String {
    let mut refs: Vec<String> = Vec::new();
    for message in &thread.messages {
        let mid = message.message_id.trim();
        if mid.is_empty() {
            continue;
        }
        let bracketed = format!("<{mid}>");
        if !refs.contains(&bracketed) {
            refs.push(bracketed);
        }
    }
    refs.join(" ")
}

/// Pick the drafts folder out of LIST responses via the `\Drafts`
/// special-use attribute.
pub fn detect_drafts_folder(list_lines: &[String]) -> Option<String> {
    for line in list_lines {
        if !line.contains(r"\Drafts") {
            continue;
        }
        if let Some(caps) = DRAFTS_LIST_LINE.captures(line)
            && let Some(name) = caps.get(1).or_else(|| caps.get(2))
        {
            return Some(name.as_str().to_string());
        }
    }
    None
}

/// Append prepared drafts, preferring the server's advertised drafts
/// folder over the configured one. A missing fallback folder is
/// created and subscribed; per-draft failures are recorded and never
/// abort the batch.
pub fn save_drafts<S: MailStore>(
    store: &mut S,
    configured_folder: &str,
    drafts: &[PreparedDraft],
) -> DraftSaveStats {
    let mut stats = DraftSaveStats::default();
    if drafts.is_empty() {
        return stats;
    }

    let detected = match store.list_folders() {
        Ok(lines) => detect_drafts_folder(&lines),
        Err(e) => {
            debug!(error = %e, "folder listing failed");
            None
        }
    };
    let folder = match detected {
        Some(found) => {
            info!(folder = %found, "drafts folder detected");
            found
        }
        None => {
            info!(folder = configured_folder, "no drafts folder advertised, using fallback");
            match store.create_folder(configured_folder) {
                Ok(()) => info!(folder = configured_folder, "folder created"),
                Err(e) => debug!(folder = configured_folder, error = %e, "create skipped"),
            }
            if let Err(e) = store.subscribe_folder(configured_folder) {
                debug!(folder = configured_folder, error = %e, "subscribe failed");
            }
            configured_folder.to_string()
        }
    };

    let flags = [r"\Draft".to_string(), r"\Seen".to_string()];
    for draft in drafts {
        match store.append(&folder, &flags, None, &draft.raw) {
            Ok(()) => {
                stats.saved += 1;
                info!(folder = %folder, subject = %draft.subject_log, "draft saved");
            }
            Err(e) => {
                stats.failed += 1;
                warn!(subject = %draft.subject_log, error = %e, "draft save failed");
                stats.errors.push(format!("draft '{}': {e}", draft.subject_log));
            }
        }
    }
    stats
}

/// Read the signature file if configured; unreadable or empty files
/// simply disable the signature.
pub fn load_signature(path: Option<&Path>) -> Option<String> {
    let path = path?;
    match std::fs::read_to_string(path) {
        Ok(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Ok(_) => None,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "signature file unreadable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Addressing, AnalysisStatus, Asked};
    use crate::mailbox::MemoryMailbox;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    struct CannedOracle(String);

    #[async_trait]
    impl Oracle for CannedOracle {
        fn name(&self) -> &str {
            "canned"
        }

        async fn generate(
            &self,
            _prompt: &str,
            _options: GenerationOptions,
        ) -> Result<String, OracleError> {
            Ok(self.0.clone())
        }
    }

    fn writer() -> DraftWriter {
        DraftWriter::new(
            Arc::new(CannedOracle("Thanks, will do.".to_string())),
            DEFAULT_DRAFT_PROMPT.to_string(),
            "Dana".to_string(),
            "dana@example.com".to_string(),
            String::new(),
            None,
        )
    }

    fn message(uid: u32, from: &str, from_addr: &str, subject: &str, body: &str) -> Message {
        Message {
            uid,
            message_id: format!("mid-{uid}@example.com"),
            in_reply_to: String::new(),
            references: Vec::new(),
            subject: subject.to_string(),
            from: from.to_string(),
            from_addr: from_addr.to_string(),
            to: "Dana <dana@example.com>".to_string(),
            cc: String::new(),
            date: Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).single(),
            body: body.to_string(),
            body_raw: body.to_string(),
        }
    }

    fn thread(messages: Vec<Message>) -> Thread {
        Thread { messages }
    }

    fn record(category: Category, actions: &str) -> DecisionRecord {
        DecisionRecord {
            subject: "Budget".to_string(),
            sender: "Alice <alice@example.com>".to_string(),
            category,
            context: String::new(),
            addressing: Addressing::Direct,
            asked: Asked::Yes,
            priority: 2,
            status: AnalysisStatus::Ok,
            actions: actions.to_string(),
            summary: "Wants the numbers.".to_string(),
            thread_size: 1,
            excerpt: None,
        }
    }

    // ── skip rules ──────────────────────────────────────────────

    #[test]
    fn actionable_with_actions_wants_a_draft() {
        let t = thread(vec![message(
            1,
            "Alice <alice@example.com>",
            "alice@example.com",
            "Budget",
            "Please send",
        )]);
        assert!(writer().wants_draft(&record(Category::Actionable, "reply with numbers"), &t));
    }

    #[test]
    fn junk_and_fyi_get_no_draft() {
        let t = thread(vec![message(
            1,
            "Alice <alice@example.com>",
            "alice@example.com",
            "x",
            "y",
        )]);
        let w = writer();
        assert!(!w.wants_draft(&record(Category::Spam, "reply"), &t));
        assert!(!w.wants_draft(&record(Category::Phishing, "reply"), &t));
        assert!(!w.wants_draft(&record(Category::Fyi, "reply"), &t));
    }

    #[test]
    fn self_sent_gets_no_draft() {
        let t = thread(vec![message(
            1,
            "Dana <dana@example.com>",
            "dana@example.com",
            "Note",
            "to self",
        )]);
        assert!(!writer().wants_draft(&record(Category::Actionable, "reply"), &t));
    }

    #[test]
    fn placeholder_actions_get_no_draft() {
        let t = thread(vec![message(
            1,
            "Alice <alice@example.com>",
            "alice@example.com",
            "x",
            "y",
        )]);
        let w = writer();
        assert!(!w.wants_draft(&record(Category::Actionable, "none"), &t));
        assert!(!w.wants_draft(&record(Category::Actionable, "Keine."), &t));
        assert!(!w.wants_draft(&record(Category::Actionable, ""), &t));
    }

    // ── subject and quote ───────────────────────────────────────

    #[test]
    fn reply_subject_adds_re_only_once() {
        assert_eq!(reply_subject("Budget"), "[Sentinel Draft] Re: Budget");
        assert_eq!(reply_subject("Re: Budget"), "[Sentinel Draft] Re: Budget");
        assert_eq!(reply_subject("AW: Budget"), "[Sentinel Draft] AW: Budget");
        assert_eq!(reply_subject("re:Budget"), "[Sentinel Draft] re:Budget");
    }

    #[test]
    fn quote_prefixes_every_line_with_attribution() {
        let m = message(
            1,
            "Alice <alice@example.com>",
            "alice@example.com",
            "s",
            "line one\nline two",
        );
        let quote = full_quote(&m);
        assert!(quote.starts_with("On 2025-07-01T09:00:00+00:00, Alice <alice@example.com> wrote:"));
        assert!(quote.contains("> line one\n> line two"));
    }

    #[test]
    fn empty_body_yields_no_quote() {
        let m = message(1, "A <a@b.c>", "a@b.c", "s", "");
        assert_eq!(full_quote(&m), "");
    }

    // ── message assembly ────────────────────────────────────────

    #[test]
    fn built_draft_carries_reply_headers_and_quoted_printable() {
        let t = thread(vec![
            message(
                1,
                "Alice <alice@example.com>",
                "alice@example.com",
                "Budget",
                "first",
            ),
            message(
                2,
                "Alice <alice@example.com>",
                "alice@example.com",
                "Re: Budget",
                "second ask",
            ),
        ]);
        let draft = writer().build_message(&t, "Will send it today.").unwrap();
        let text = String::from_utf8_lossy(&draft.raw);
        assert!(text.contains("Subject: [Sentinel Draft] Re: Budget"));
        assert!(text.contains("To: Alice <alice@example.com>"));
        assert!(text.contains("In-Reply-To: <mid-2@example.com>"));
        assert!(text.contains("References: <mid-1@example.com> <mid-2@example.com>"));
        assert!(text.contains("Content-Transfer-Encoding: quoted-printable"));
        assert!(text.contains("Will send it today."));
        assert!(text.contains("> second ask"));
        assert_eq!(draft.subject_log, "Re: Budget");
    }

    #[test]
    fn signature_sits_behind_the_rfc_separator() {
        let mut w = writer();
        w.signature = Some("Dana\nExample Corp".to_string());
        let t = thread(vec![message(
            1,
            "Alice <alice@example.com>",
            "alice@example.com",
            "s",
            "body",
        )]);
        let draft = w.build_message(&t, "Reply.").unwrap();
        let text = String::from_utf8_lossy(&draft.raw);
        assert!(text.contains("-- \nDana\nExample Corp"));
    }

    #[tokio::test]
    async fn generation_substitutes_the_record_fields() {
        struct EchoOracle;
        #[async_trait]
        impl Oracle for EchoOracle {
            fn name(&self) -> &str {
                "echo"
            }
            async fn generate(
                &self,
                prompt: &str,
                _options: GenerationOptions,
            ) -> Result<String, OracleError> {
                Ok(prompt.to_string())
            }
        }
        let w = DraftWriter::new(
            Arc::new(EchoOracle),
            DEFAULT_DRAFT_PROMPT.to_string(),
            "Dana".to_string(),
            "dana@example.com".to_string(),
            "head of ops".to_string(),
            None,
        );
        let t = thread(vec![message(
            1,
            "Alice <alice@example.com>",
            "alice@example.com",
            "Budget",
            "Please send numbers",
        )]);
        let prompt = w
            .generate(&t, &record(Category::Actionable, "send numbers"), Some("Profile: Alice\n"))
            .await
            .unwrap();
        assert!(prompt.starts_with("Profile: Alice\n"));
        assert!(prompt.contains("assistant of Dana"));
        assert!(prompt.contains("Roles and responsibilities: head of ops"));
        assert!(prompt.contains("Subject: Budget"));
        assert!(prompt.contains("Open action items: send numbers"));
        assert!(prompt.contains("Please send numbers"));
        assert!(!prompt.contains("{person}"));
    }

    // ── folder detection and save ───────────────────────────────

    #[test]
    fn drafts_folder_detected_from_list_attributes() {
        let lines = vec![
            r#"* LIST (\HasNoChildren) "." "INBOX""#.to_string(),
            r#"* LIST (\HasNoChildren \Drafts) "." "Entwuerfe""#.to_string(),
        ];
        assert_eq!(detect_drafts_folder(&lines), Some("Entwuerfe".to_string()));
    }

    #[test]
    fn detection_handles_slash_delimiter_and_bare_names() {
        let lines = vec![r#"* LIST (\Drafts) "/" Drafts"#.to_string()];
        assert_eq!(detect_drafts_folder(&lines), Some("Drafts".to_string()));
    }

    #[test]
    fn detection_requires_the_drafts_attribute() {
        let lines = vec![r#"* LIST (\HasNoChildren) "." "Drafts""#.to_string()];
        assert_eq!(detect_drafts_folder(&lines), None);
    }

    #[test]
    fn save_prefers_detected_folder() {
        let mut store = MemoryMailbox::new();
        store.add_folder("ServerDrafts");
        store.set_folder_attrs("ServerDrafts", r"\HasNoChildren \Drafts");
        let drafts = [PreparedDraft {
            subject_log: "s".to_string(),
            raw: b"Subject: s\r\n\r\nx".to_vec(),
        }];
        let stats = save_drafts(&mut store, "Drafts", &drafts);
        assert_eq!(stats.saved, 1);
        assert_eq!(store.uids_in("ServerDrafts").len(), 1);
        let uid = store.uids_in("ServerDrafts")[0];
        let flags = store.flags_of("ServerDrafts", uid).unwrap();
        assert!(flags.contains(&r"\Draft".to_string()));
        assert!(flags.contains(&r"\Seen".to_string()));
    }

    #[test]
    fn save_falls_back_to_configured_folder_and_creates_it() {
        let mut store = MemoryMailbox::new();
        let drafts = [PreparedDraft {
            subject_log: "s".to_string(),
            raw: b"Subject: s\r\n\r\nx".to_vec(),
        }];
        let stats = save_drafts(&mut store, "MyDrafts", &drafts);
        assert_eq!(stats.saved, 1);
        assert!(store.has_folder("MyDrafts"));
        assert!(store.is_subscribed("MyDrafts"));
        assert_eq!(store.uids_in("MyDrafts").len(), 1);
    }

    #[test]
    fn failed_saves_are_counted_with_reasons() {
        let mut store = MemoryMailbox::new();
        store.fail_next_appends(1);
        let drafts = [
            PreparedDraft {
                subject_log: "first".to_string(),
                raw: b"Subject: a\r\n\r\nx".to_vec(),
            },
            PreparedDraft {
                subject_log: "second".to_string(),
                raw: b"Subject: b\r\n\r\nx".to_vec(),
            },
        ];
        let stats = save_drafts(&mut store, "Drafts", &drafts);
        assert_eq!(stats.saved, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.errors.len(), 1);
        assert!(stats.errors[0].contains("first"));
    }
}

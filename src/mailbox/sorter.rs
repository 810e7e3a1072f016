//! Crash-safe mailbox mutation: copy first, retire after.
//!
//! Every action runs fetch, header rewrite, append, and only then
//! flags the original deleted. An abort at any point leaves at worst a
//! duplicate, never a lost message. Appended copies carry a marker
//! keyword so a rerun over the same mailbox skips them.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::bytes::Regex;
use tracing::{debug, info, warn};

use crate::error::MailboxError;
use crate::mailbox::MailStore;

/// Keyword stamped onto every appended copy. Only sticks on servers
/// whose PERMANENTFLAGS include `\*`.
pub const SENTINEL_KEYWORD: &str = "$Sentinel_Sorted";

const DELETED_FLAG: &str = r"\Deleted";
const RECENT_FLAG: &str = r"\Recent";

/// One planned mutation: rewrite the priority header and refile the
/// message. `folder` may equal the source mailbox for an in-place
/// flag/header update.
#[derive(Debug, Clone)]
pub struct SortAction {
    pub uid: u32,
    pub folder: String,
    /// X-Priority value written into the copy.
    pub priority: u8,
    pub extra_flags: Vec<String>,
}

/// What one batch run did, plus the server capabilities it saw.
#[derive(Debug, Default)]
pub struct SortOutcome {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub keywords_supported: bool,
    pub has_uidplus: bool,
}

enum Disposition {
    Processed,
    Skipped,
}

/// Apply a batch of actions in one read-write session.
///
/// Only an unopenable mailbox is fatal. Everything per-action is
/// recorded in the outcome and never aborts the batch. Originals are
/// purged in one batch at the end, and only when the server supports
/// UID EXPUNGE; otherwise they stay flagged deleted for the next
/// compaction.
pub fn safe_sort<S: MailStore>(
    store: &mut S,
    mailbox: &str,
    actions: &[SortAction],
) -> Result<SortOutcome, MailboxError> {
    let mut outcome = SortOutcome::default();
    if actions.is_empty() {
        return Ok(outcome);
    }

    let caps = match store.capabilities() {
        Ok(caps) => caps,
        Err(e) => {
            warn!(error = %e, "capability check failed");
            Vec::new()
        }
    };
    outcome.has_uidplus = caps.iter().any(|c| c == "UIDPLUS");

    let info = store.select(mailbox, false)?;
    outcome.keywords_supported = info.accepts_keywords();
    debug!(
        mailbox,
        keywords = outcome.keywords_supported,
        uidplus = outcome.has_uidplus,
        actions = actions.len(),
        "sort session open"
    );

    // Destination folders first, so appends cannot fail on a missing
    // folder halfway through the batch.
    let mut prepared: BTreeSet<&str> = BTreeSet::new();
    for action in actions {
        let folder = action.folder.as_str();
        if folder == mailbox || !prepared.insert(folder) {
            continue;
        }
        match store.create_folder(folder) {
            Ok(()) => info!(folder, "folder created"),
            Err(e) => debug!(folder, error = %e, "create skipped"),
        }
        if let Err(e) = store.subscribe_folder(folder) {
            debug!(folder, error = %e, "subscribe failed");
        }
    }

    let mut retired: Vec<u32> = Vec::new();
    for action in actions {
        match apply_one(store, action, outcome.keywords_supported, &mut retired) {
            Ok(Disposition::Processed) => outcome.processed += 1,
            Ok(Disposition::Skipped) => outcome.skipped += 1,
            Err(reason) => {
                warn!(uid = action.uid, folder = %action.folder, %reason, "action failed");
                outcome.failed += 1;
                outcome.errors.push(reason);
            }
        }
    }

    if !retired.is_empty() {
        if outcome.has_uidplus {
            if let Err(e) = store.uid_expunge(&retired) {
                warn!(error = %e, "purge failed, originals remain flagged deleted");
            }
        } else {
            info!(
                count = retired.len(),
                "no UIDPLUS, originals stay flagged deleted until the next compaction"
            );
        }
    }

    info!(
        processed = outcome.processed,
        skipped = outcome.skipped,
        failed = outcome.failed,
        "sort complete"
    );
    Ok(outcome)
}

/// Fetch, rewrite, append, retire. The marker check sits right after
/// the fetch, before anything is written, so a rerun skips the action
/// without side effects.
fn apply_one<S: MailStore>(
    store: &mut S,
    action: &SortAction,
    keywords_supported: bool,
    retired: &mut Vec<u32>,
) -> Result<Disposition, String> {
    let uid = action.uid;
    let mail = store
        .fetch(uid)
        .map_err(|e| format!("UID {uid}: fetch failed: {e}"))?;

    if mail.flags.iter().any(|f| f == SENTINEL_KEYWORD) {
        debug!(uid, "already sorted, skipping");
        return Ok(Disposition::Skipped);
    }

    let modified = rewrite_priority_header(&mail.raw, action.priority);
    let flags = combined_flags(&mail.flags, &action.extra_flags, keywords_supported);

    let mut appended = store.append(
        &action.folder,
        &flags,
        mail.internal_date.as_deref(),
        &modified,
    );
    if appended.is_err() && mail.internal_date.is_some() {
        debug!(uid, "dated append failed, retrying without date");
        appended = store.append(&action.folder, &flags, None, &modified);
    }
    if let Err(e) = appended {
        return Err(format!("UID {uid}: append to {} failed: {e}", action.folder));
    }

    // The copy exists; the original may now go. A failed store here
    // leaves a duplicate, which is the accepted worst case.
    match store.add_flags(uid, &[DELETED_FLAG.to_string()]) {
        Ok(()) => retired.push(uid),
        Err(e) => warn!(uid, error = %e, "could not retire original, duplicate remains"),
    }
    Ok(Disposition::Processed)
}

static X_PRIORITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^X-Priority:[^\r\n]*").unwrap());

/// Insert or replace the X-Priority header in a raw message.
///
/// Works on bytes: the body may be arbitrary binary and is never
/// touched. A message without a header/body boundary is returned
/// unchanged.
pub fn rewrite_priority_header(raw: &[u8], priority: u8) -> Vec<u8> {
    let (header_end, sep): (usize, &[u8]) = if let Some(pos) = find(raw, b"\r\n\r\n") {
        (pos, b"\r\n")
    } else if let Some(pos) = find(raw, b"\n\n") {
        (pos, b"\n")
    } else {
        return raw.to_vec();
    };
    let (headers, body) = raw.split_at(header_end);
    let replacement = format!("X-Priority: {priority}");

    if X_PRIORITY.is_match(headers) {
        let mut out = X_PRIORITY
            .replace_all(headers, replacement.as_bytes())
            .into_owned();
        out.extend_from_slice(body);
        return out;
    }

    let mut out = headers.to_vec();
    out.extend_from_slice(sep);
    out.extend_from_slice(replacement.as_bytes());
    out.extend_from_slice(body);
    out
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Flags for the appended copy: originals plus the action's extras
/// plus the marker, minus flags that must not carry over.
fn combined_flags(original: &[String], extra: &[String], keywords_supported: bool) -> Vec<String> {
    let mut set: BTreeSet<String> = original.iter().cloned().collect();
    set.extend(extra.iter().cloned());
    if keywords_supported {
        set.insert(SENTINEL_KEYWORD.to_string());
    }
    set.remove(DELETED_FLAG);
    set.remove(RECENT_FLAG);
    set.into_iter().collect()
}

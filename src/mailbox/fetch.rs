//! Date-windowed retrieval pass.
//!
//! UIDs, not sequence numbers: they stay stable across sessions, and
//! the triage pass later mutates by UID. Fetches use BODY.PEEK so the
//! pass never flips `\Seen` on mail the person has not read.

use chrono::{Days, Local, NaiveDate};
use tracing::{debug, info, warn};

use crate::error::MailboxError;
use crate::mailbox::{MailStore, Message};

/// Build the UID SEARCH query for a day window ending today.
///
/// `days_back = 0` covers today only; `2` covers today plus the two
/// previous calendar days. IMAP BEFORE/SENTBEFORE are exclusive, so
/// the upper bound is tomorrow. `use_sent_date` selects the Date
/// header (SENTSINCE) over server arrival time; some servers are
/// shaky on SENT* terms, hence the switch.
pub fn window_query(days_back: u32, today: NaiveDate, use_sent_date: bool) -> String {
    let start = today - Days::new(u64::from(days_back));
    let end_excl = today + Days::new(1);
    let since = start.format("%d-%b-%Y");
    let before = end_excl.format("%d-%b-%Y");
    if use_sent_date {
        format!("(NOT DELETED SENTSINCE {since} SENTBEFORE {before})")
    } else {
        format!("(NOT DELETED SINCE {since} BEFORE {before})")
    }
}

/// Fetch and parse every message in the window.
///
/// Selection prefers EXAMINE; some servers refuse it, in which case a
/// writable SELECT still works because all fetches peek. Messages that
/// fail to fetch or parse are logged and skipped. With `own_address`
/// set, mail sent from that address is dropped.
pub fn fetch_window<S: MailStore>(
    store: &mut S,
    folder: &str,
    days_back: u32,
    use_sent_date: bool,
    own_address: Option<&str>,
) -> Result<Vec<Message>, MailboxError> {
    let query = window_query(days_back, Local::now().date_naive(), use_sent_date);
    let info = match store.select(folder, true) {
        Ok(info) => info,
        Err(e) => {
            warn!(folder, error = %e, "read-only select failed, retrying writable");
            store.select(folder, false)?
        }
    };
    debug!(folder, exists = info.exists, query = %query, "searching");

    let uids = store.search(&query)?;
    let own = own_address.map(str::to_lowercase);
    let mut messages = Vec::with_capacity(uids.len());
    let mut skipped_own = 0usize;
    for uid in uids {
        let mail = match store.fetch(uid) {
            Ok(mail) => mail,
            Err(e) => {
                warn!(uid, error = %e, "fetch failed, skipping");
                continue;
            }
        };
        let Some(message) = Message::parse(uid, &mail.raw) else {
            warn!(uid, "unparseable message, skipping");
            continue;
        };
        if let Some(own) = own.as_deref()
            && !message.from_addr.is_empty()
            && message.from_addr == own
        {
            skipped_own += 1;
            continue;
        }
        messages.push(message);
    }
    info!(folder, count = messages.len(), skipped_own, "fetch complete");
    Ok(messages)
}

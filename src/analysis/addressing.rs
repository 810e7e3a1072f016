//! Header-derived addressing.
//!
//! The model also guesses how a mail reached the owner, but headers do
//! not lie. Whatever this module derives overrides the model's answer
//! during post-processing.

use std::sync::LazyLock;

use regex::Regex;

use crate::analysis::record::Addressing;
use crate::mailbox::message::Message;
use crate::threading::Thread;

/// Addressing derived from headers plus the self-sent flag, computed
/// once per thread and fed into the post-processing rules.
#[derive(Debug, Clone, Copy)]
pub struct AddressingHints {
    pub addressing: Addressing,
    /// The newest message in the thread was sent by the owner.
    pub self_sent: bool,
}

/// Role addresses that indicate automated or bulk senders.
static LIST_SENDERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)^no[\-_.]?reply@").unwrap(),
        Regex::new(r"(?i)^(mailer[\-_]?daemon|postmaster|bounce[^@]*)@").unwrap(),
        Regex::new(r"(?i)^(newsletter|notifications?|news|updates|marketing)@").unwrap(),
        Regex::new(r"(?i)@(marketing|newsletter|promo|campaign)\b").unwrap(),
    ]
});

static UNSUBSCRIBE_SUBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bunsubscribe\b").unwrap());

static BULK_BODY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\bunsubscribe\b|\babbestellen\b|mailing[\s-]?list|manage your subscription|email preferences|opt[- ]?out)",
    )
    .unwrap()
});

/// Group salutations in English and German, matched in the opening of
/// the body. A mail that greets everyone was not written to one person.
static GROUP_SALUTATIONS: &[&str] = &[
    "hi all",
    "hi team",
    "hi everyone",
    "hi both",
    "hello all",
    "hello everyone",
    "hello team",
    "dear all",
    "dear team",
    "dear colleagues",
    "hallo zusammen",
    "hallo alle",
    "hallo team",
    "liebe kollegen",
    "liebe kolleginnen",
    "liebes team",
];

// Salutations appear at the top; scanning further invites false hits
// from quoted history.
const SALUTATION_WINDOW: usize = 500;

/// Derive addressing for a single message from its headers and body.
///
/// Checks run in order of confidence: an explicit To/Cc hit wins over
/// list heuristics, which win over salutation sniffing.
pub fn derive_addressing(message: &Message, identity_addr: &str) -> Addressing {
    let ident = identity_addr.trim().to_lowercase();
    if !ident.is_empty() {
        if message.to.to_lowercase().contains(&ident) {
            return Addressing::Direct;
        }
        if message.cc.to_lowercase().contains(&ident) {
            return Addressing::Cc;
        }
    }
    if is_list_mail(message) {
        return Addressing::List;
    }
    if has_group_salutation(&message.body) {
        return Addressing::Group;
    }
    Addressing::Unknown
}

fn is_list_mail(message: &Message) -> bool {
    if LIST_SENDERS.iter().any(|rx| rx.is_match(&message.from_addr)) {
        return true;
    }
    UNSUBSCRIBE_SUBJECT.is_match(&message.subject) || BULK_BODY.is_match(&message.body)
}

fn has_group_salutation(body: &str) -> bool {
    let head: String = body
        .chars()
        .take(SALUTATION_WINDOW)
        .collect::<String>()
        .to_lowercase();
    GROUP_SALUTATIONS.iter().any(|s| head.contains(s))
}

/// Combine per-message addressing across a whole thread.
///
/// A thread whose newest message the owner sent themselves is flagged
/// `self_sent`; an earlier own message in the thread still means DIRECT
/// involvement but the ball is back in the owner's court, so the flag
/// stays off. Otherwise the strongest per-message result wins.
pub fn derive_thread_addressing(thread: &Thread, identity_addr: &str) -> AddressingHints {
    let ident = identity_addr.trim().to_lowercase();

    if !ident.is_empty() {
        if let Some(newest) = thread.newest()
            && newest.from_addr == ident
        {
            return AddressingHints {
                addressing: Addressing::Direct,
                self_sent: true,
            };
        }
        let earlier = &thread.messages[..thread.messages.len().saturating_sub(1)];
        if earlier.iter().any(|m| m.from_addr == ident) {
            return AddressingHints {
                addressing: Addressing::Direct,
                self_sent: false,
            };
        }
    }

    let strongest = thread
        .messages
        .iter()
        .map(|m| derive_addressing(m, identity_addr))
        .max_by_key(Addressing::rank)
        .unwrap_or(Addressing::Unknown);

    AddressingHints {
        addressing: strongest,
        self_sent: false,
    }
}

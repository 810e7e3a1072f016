//! Mailbox access.
//!
//! `MailStore` is the narrow, synchronous surface every pass runs on.
//! `ImapSession` implements it over TLS IMAP; `MemoryMailbox`
//! implements it in memory for tests, including fault injection.
//! Blocking store calls run inside `spawn_blocking` at the pipeline
//! layer, mirroring how the model calls stay async.

pub mod fetch;
pub mod imap;
pub mod memory;
pub mod message;
pub mod sorter;

pub use imap::ImapSession;
pub use memory::MemoryMailbox;
pub use message::Message;
pub use sorter::{SENTINEL_KEYWORD, SortAction, SortOutcome, safe_sort};

use crate::error::MailboxError;

/// Snapshot returned by selecting a folder.
#[derive(Debug, Clone, Default)]
pub struct SelectInfo {
    /// Message count reported by EXISTS.
    pub exists: u32,
    /// PERMANENTFLAGS tokens, verbatim. `\*` means the folder accepts
    /// arbitrary keywords.
    pub permanent_flags: Vec<String>,
    pub read_only: bool,
}

impl SelectInfo {
    /// Whether custom keywords survive in this folder.
    pub fn accepts_keywords(&self) -> bool {
        self.permanent_flags.iter().any(|f| f == r"\*")
    }
}

/// One message fetched for mutation: exact raw bytes plus the server
/// metadata needed to reproduce it elsewhere.
#[derive(Debug, Clone)]
pub struct FetchedMail {
    pub raw: Vec<u8>,
    /// Server INTERNALDATE value, verbatim, reusable in APPEND.
    pub internal_date: Option<String>,
    /// Current flags, minus `\Recent` and `\Deleted`.
    pub flags: Vec<String>,
}

/// Synchronous mailbox operations.
///
/// `search`, `fetch`, `add_flags` and `uid_expunge` operate on the
/// folder chosen by the last `select` call and fail with a protocol
/// error when nothing is selected. All UIDs are UID-namespace values,
/// never sequence numbers.
pub trait MailStore {
    /// Server capability tokens, uppercased.
    fn capabilities(&mut self) -> Result<Vec<String>, MailboxError>;

    /// Open a folder. `read_only` selects without resetting `\Recent`
    /// or allowing flag changes.
    fn select(&mut self, folder: &str, read_only: bool) -> Result<SelectInfo, MailboxError>;

    /// UID SEARCH with a raw query; returns matching UIDs ascending.
    fn search(&mut self, query: &str) -> Result<Vec<u32>, MailboxError>;

    /// Fetch one message without touching its `\Seen` flag.
    fn fetch(&mut self, uid: u32) -> Result<FetchedMail, MailboxError>;

    /// APPEND a message. Passing an internal date asks the server to
    /// preserve the original timestamp; servers may reject it.
    fn append(
        &mut self,
        folder: &str,
        flags: &[String],
        internal_date: Option<&str>,
        raw: &[u8],
    ) -> Result<(), MailboxError>;

    /// Add flags to a message (UID STORE +FLAGS).
    fn add_flags(&mut self, uid: u32, flags: &[String]) -> Result<(), MailboxError>;

    fn create_folder(&mut self, folder: &str) -> Result<(), MailboxError>;

    fn subscribe_folder(&mut self, folder: &str) -> Result<(), MailboxError>;

    /// Permanently remove the given messages (UID EXPUNGE). Requires
    /// UIDPLUS; callers check capabilities first.
    fn uid_expunge(&mut self, uids: &[u32]) -> Result<(), MailboxError>;

    /// Raw LIST response lines, used for special-use folder detection.
    fn list_folders(&mut self) -> Result<Vec<String>, MailboxError>;
}

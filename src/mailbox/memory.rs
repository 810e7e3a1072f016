//! In-memory mailbox used by the test suites.
//!
//! Behaves like a small IMAP server: monotonic UIDs, per-folder flag
//! sets, UIDPLUS and keyword support that can be switched off, and a
//! few fault-injection knobs for the crash-safety tests. Clones share
//! state, so a test can keep a handle while the code under test owns
//! another.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::MailboxError;
use crate::mailbox::{FetchedMail, MailStore, SelectInfo};

const DELETED: &str = r"\Deleted";

#[derive(Debug, Clone)]
struct StoredMail {
    raw: Vec<u8>,
    flags: BTreeSet<String>,
    internal_date: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    folders: BTreeMap<String, BTreeMap<u32, StoredMail>>,
    folder_attrs: BTreeMap<String, String>,
    subscribed: BTreeSet<String>,
    next_uid: u32,
    selected: Option<(String, bool)>,
    uidplus: bool,
    keywords: bool,
    reject_dated_appends: bool,
    fail_next_appends: u32,
    fail_store_uids: BTreeSet<u32>,
}

#[derive(Clone)]
pub struct MemoryMailbox {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMailbox {
    pub fn new() -> Self {
        let mut inner = Inner {
            next_uid: 1,
            uidplus: true,
            keywords: true,
            ..Inner::default()
        };
        inner.folders.insert("INBOX".to_string(), BTreeMap::new());
        MemoryMailbox {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── test setup ──────────────────────────────────────────────

    pub fn set_uidplus(&self, on: bool) {
        self.lock().uidplus = on;
    }

    pub fn set_keyword_support(&self, on: bool) {
        self.lock().keywords = on;
    }

    /// Make every dated APPEND fail, as servers without arbitrary
    /// INTERNALDATE support do.
    pub fn reject_dated_appends(&self, on: bool) {
        self.lock().reject_dated_appends = on;
    }

    /// Fail the next `n` APPEND calls outright.
    pub fn fail_next_appends(&self, n: u32) {
        self.lock().fail_next_appends = n;
    }

    /// Fail UID STORE for one specific message.
    pub fn fail_store_for(&self, uid: u32) {
        self.lock().fail_store_uids.insert(uid);
    }

    /// Let previously failing STORE targets succeed again.
    pub fn clear_store_failures(&self) {
        self.lock().fail_store_uids.clear();
    }

    pub fn add_folder(&self, folder: &str) {
        self.lock()
            .folders
            .entry(folder.to_string())
            .or_default();
    }

    /// Mark a folder with LIST attributes, e.g. `\Drafts`.
    pub fn set_folder_attrs(&self, folder: &str, attrs: &str) {
        self.lock()
            .folder_attrs
            .insert(folder.to_string(), attrs.to_string());
    }

    pub fn seed(&self, folder: &str, raw: &[u8]) -> u32 {
        self.seed_with_flags(folder, raw, &[])
    }

    pub fn seed_with_flags(&self, folder: &str, raw: &[u8], flags: &[&str]) -> u32 {
        let mut inner = self.lock();
        let uid = inner.next_uid;
        inner.next_uid += 1;
        inner
            .folders
            .entry(folder.to_string())
            .or_default()
            .insert(
                uid,
                StoredMail {
                    raw: raw.to_vec(),
                    flags: flags.iter().map(|f| f.to_string()).collect(),
                    internal_date: Some("01-Jul-2025 12:00:00 +0000".to_string()),
                },
            );
        uid
    }

    // ── test inspection ─────────────────────────────────────────

    /// Every UID still present in a folder, retired-but-unexpunged
    /// messages included.
    pub fn uids_in(&self, folder: &str) -> Vec<u32> {
        self.lock()
            .folders
            .get(folder)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn flags_of(&self, folder: &str, uid: u32) -> Option<Vec<String>> {
        self.lock()
            .folders
            .get(folder)
            .and_then(|m| m.get(&uid))
            .map(|mail| mail.flags.iter().cloned().collect())
    }

    pub fn raw_of(&self, folder: &str, uid: u32) -> Option<Vec<u8>> {
        self.lock()
            .folders
            .get(folder)
            .and_then(|m| m.get(&uid))
            .map(|mail| mail.raw.clone())
    }

    pub fn is_subscribed(&self, folder: &str) -> bool {
        self.lock().subscribed.contains(folder)
    }

    pub fn has_folder(&self, folder: &str) -> bool {
        self.lock().folders.contains_key(folder)
    }
}

impl Inner {
    fn selected_folder(&self) -> Result<String, MailboxError> {
        self.selected
            .as_ref()
            .map(|(f, _)| f.clone())
            .ok_or_else(|| MailboxError::Protocol("no folder selected".to_string()))
    }

    fn writable_folder(&self) -> Result<String, MailboxError> {
        match &self.selected {
            Some((_, true)) => Err(MailboxError::CommandRejected {
                command: "UID STORE".to_string(),
                reason: "folder selected read-only".to_string(),
            }),
            Some((f, false)) => Ok(f.clone()),
            None => Err(MailboxError::Protocol("no folder selected".to_string())),
        }
    }
}

impl MailStore for MemoryMailbox {
    fn capabilities(&mut self) -> Result<Vec<String>, MailboxError> {
        let inner = self.lock();
        let mut caps = vec!["IMAP4REV1".to_string()];
        if inner.uidplus {
            caps.push("UIDPLUS".to_string());
        }
        Ok(caps)
    }

    fn select(&mut self, folder: &str, read_only: bool) -> Result<SelectInfo, MailboxError> {
        let mut inner = self.lock();
        let Some(mails) = inner.folders.get(folder) else {
            return Err(MailboxError::CommandRejected {
                command: if read_only { "EXAMINE" } else { "SELECT" }.to_string(),
                reason: format!("no such folder: {folder}"),
            });
        };
        let exists = mails.len() as u32;
        let mut permanent_flags: Vec<String> =
            [r"\Answered", r"\Flagged", r"\Deleted", r"\Seen", r"\Draft"]
                .iter()
                .map(|f| f.to_string())
                .collect();
        if inner.keywords {
            permanent_flags.push(r"\*".to_string());
        }
        inner.selected = Some((folder.to_string(), read_only));
        Ok(SelectInfo {
            exists,
            permanent_flags,
            read_only,
        })
    }

    fn search(&mut self, _query: &str) -> Result<Vec<u32>, MailboxError> {
        let inner = self.lock();
        let folder = inner.selected_folder()?;
        let uids = inner
            .folders
            .get(&folder)
            .map(|mails| {
                mails
                    .iter()
                    .filter(|(_, mail)| !mail.flags.contains(DELETED))
                    .map(|(uid, _)| *uid)
                    .collect()
            })
            .unwrap_or_default();
        Ok(uids)
    }

    fn fetch(&mut self, uid: u32) -> Result<FetchedMail, MailboxError> {
        let inner = self.lock();
        let folder = inner.selected_folder()?;
        let mail = inner
            .folders
            .get(&folder)
            .and_then(|mails| mails.get(&uid))
            .ok_or_else(|| MailboxError::NotFound {
                uid,
                folder: folder.clone(),
            })?;
        Ok(FetchedMail {
            raw: mail.raw.clone(),
            internal_date: mail.internal_date.clone(),
            flags: mail
                .flags
                .iter()
                .filter(|f| {
                    !f.eq_ignore_ascii_case(r"\Recent") && !f.eq_ignore_ascii_case(DELETED)
                })
                .cloned()
                .collect(),
        })
    }

    fn append(
        &mut self,
        folder: &str,
        flags: &[String],
        internal_date: Option<&str>,
        raw: &[u8],
    ) -> Result<(), MailboxError> {
        let mut inner = self.lock();
        if inner.fail_next_appends > 0 {
            inner.fail_next_appends -= 1;
            return Err(MailboxError::CommandRejected {
                command: "APPEND".to_string(),
                reason: "injected failure".to_string(),
            });
        }
        if internal_date.is_some() && inner.reject_dated_appends {
            return Err(MailboxError::CommandRejected {
                command: "APPEND".to_string(),
                reason: "server refused the supplied date".to_string(),
            });
        }
        if !inner.folders.contains_key(folder) {
            return Err(MailboxError::CommandRejected {
                command: "APPEND".to_string(),
                reason: format!("[TRYCREATE] no such folder: {folder}"),
            });
        }
        let uid = inner.next_uid;
        inner.next_uid += 1;
        if let Some(mails) = inner.folders.get_mut(folder) {
            mails.insert(
                uid,
                StoredMail {
                    raw: raw.to_vec(),
                    flags: flags.iter().cloned().collect(),
                    internal_date: internal_date.map(str::to_string),
                },
            );
        }
        Ok(())
    }

    fn add_flags(&mut self, uid: u32, flags: &[String]) -> Result<(), MailboxError> {
        let mut inner = self.lock();
        let folder = inner.writable_folder()?;
        if inner.fail_store_uids.contains(&uid) {
            return Err(MailboxError::CommandRejected {
                command: "UID STORE".to_string(),
                reason: "injected failure".to_string(),
            });
        }
        if let Some(mail) = inner
            .folders
            .get_mut(&folder)
            .and_then(|mails| mails.get_mut(&uid))
        {
            mail.flags.extend(flags.iter().cloned());
        }
        Ok(())
    }

    fn create_folder(&mut self, folder: &str) -> Result<(), MailboxError> {
        let mut inner = self.lock();
        if inner.folders.contains_key(folder) {
            return Err(MailboxError::CommandRejected {
                command: "CREATE".to_string(),
                reason: format!("folder exists: {folder}"),
            });
        }
        inner.folders.insert(folder.to_string(), BTreeMap::new());
        Ok(())
    }

    fn subscribe_folder(&mut self, folder: &str) -> Result<(), MailboxError> {
        self.lock().subscribed.insert(folder.to_string());
        Ok(())
    }

    fn uid_expunge(&mut self, uids: &[u32]) -> Result<(), MailboxError> {
        let mut inner = self.lock();
        if !inner.uidplus {
            return Err(MailboxError::CommandRejected {
                command: "UID EXPUNGE".to_string(),
                reason: "server lacks UIDPLUS".to_string(),
            });
        }
        let folder = inner.selected_folder()?;
        if let Some(mails) = inner.folders.get_mut(&folder) {
            // RFC 4315: only messages that are both in the set and
            // flagged deleted go away.
            mails.retain(|uid, mail| !(uids.contains(uid) && mail.flags.contains(DELETED)));
        }
        Ok(())
    }

    fn list_folders(&mut self) -> Result<Vec<String>, MailboxError> {
        let inner = self.lock();
        Ok(inner
            .folders
            .keys()
            .map(|name| {
                let attrs = inner
                    .folder_attrs
                    .get(name)
                    .map(String::as_str)
                    .unwrap_or(r"\HasNoChildren");
                format!(r#"* LIST ({attrs}) "." "{name}""#)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_messages_are_searchable_and_fetchable() {
        let mut store = MemoryMailbox::new();
        let uid = store.seed("INBOX", b"From: a@b\r\n\r\nhi");
        store.select("INBOX", true).unwrap();
        assert_eq!(store.search("ALL").unwrap(), vec![uid]);
        let mail = store.fetch(uid).unwrap();
        assert_eq!(mail.raw, b"From: a@b\r\n\r\nhi");
        assert!(mail.internal_date.is_some());
    }

    #[test]
    fn deleted_messages_leave_search_but_stay_until_expunge() {
        let mut store = MemoryMailbox::new();
        let uid = store.seed("INBOX", b"x");
        store.select("INBOX", false).unwrap();
        store.add_flags(uid, &[DELETED.to_string()]).unwrap();
        assert!(store.search("ALL").unwrap().is_empty());
        assert_eq!(store.uids_in("INBOX"), vec![uid]);
        store.uid_expunge(&[uid]).unwrap();
        assert!(store.uids_in("INBOX").is_empty());
    }

    #[test]
    fn expunge_ignores_messages_not_flagged_deleted() {
        let mut store = MemoryMailbox::new();
        let uid = store.seed("INBOX", b"x");
        store.select("INBOX", false).unwrap();
        store.uid_expunge(&[uid]).unwrap();
        assert_eq!(store.uids_in("INBOX"), vec![uid]);
    }

    #[test]
    fn read_only_selection_refuses_stores() {
        let mut store = MemoryMailbox::new();
        let uid = store.seed("INBOX", b"x");
        store.select("INBOX", true).unwrap();
        let err = store.add_flags(uid, &[r"\Seen".to_string()]);
        assert!(matches!(err, Err(MailboxError::CommandRejected { .. })));
    }

    #[test]
    fn capability_toggles_change_select_and_expunge() {
        let mut store = MemoryMailbox::new();
        store.set_keyword_support(false);
        store.set_uidplus(false);
        let info = store.select("INBOX", false).unwrap();
        assert!(!info.accepts_keywords());
        assert!(!store.capabilities().unwrap().contains(&"UIDPLUS".to_string()));
        assert!(store.uid_expunge(&[1]).is_err());
    }

    #[test]
    fn clones_share_state() {
        let store = MemoryMailbox::new();
        let handle: MemoryMailbox = store.clone();
        let uid = handle.seed("INBOX", b"shared");
        assert_eq!(store.uids_in("INBOX"), vec![uid]);
    }

    #[test]
    fn dated_append_rejection_spares_undated_appends() {
        let mut store = MemoryMailbox::new();
        store.reject_dated_appends(true);
        let dated = store.append(
            "INBOX",
            &[],
            Some("01-Jul-2025 12:00:00 +0000"),
            b"x",
        );
        assert!(dated.is_err());
        store.append("INBOX", &[], None, b"x").unwrap();
        assert_eq!(store.uids_in("INBOX").len(), 1);
    }
}

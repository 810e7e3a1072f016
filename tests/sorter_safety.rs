//! Safety properties of the mailbox sorter across whole runs.
//!
//! These tests drive fetch, planning, and sorting together against the
//! in-memory mailbox to pin the batch guarantees: re-running a batch
//! never files a message twice, an interrupted run duplicates at worst
//! and never loses mail, and a failed copy leaves the original where
//! it was.

use inbox_sentinel::analysis::{Addressing, AnalysisStatus, Asked, Category, DecisionRecord};
use inbox_sentinel::mailbox::fetch::fetch_window;
use inbox_sentinel::mailbox::{MemoryMailbox, SENTINEL_KEYWORD, SortAction, safe_sort};
use inbox_sentinel::triage::{TriagePolicy, plan_actions};

fn mail(from: &str, subject: &str) -> Vec<u8> {
    format!(
        "Message-ID: <{subject}@safety.test>\r\n\
         From: Sender <{from}>\r\n\
         To: Owner <owner@example.com>\r\n\
         Subject: {subject}\r\n\
         Date: Tue, 01 Jul 2025 10:00:00 +0000\r\n\
         \r\n\
         body of {subject}\r\n"
    )
    .into_bytes()
}

fn record(category: Category, priority: u8) -> DecisionRecord {
    DecisionRecord {
        subject: "s".into(),
        sender: "sender@x.org".into(),
        category,
        context: String::new(),
        addressing: Addressing::Direct,
        asked: Asked::No,
        priority,
        status: AnalysisStatus::Ok,
        actions: "none".into(),
        summary: "summary".into(),
        thread_size: 1,
        excerpt: None,
    }
}

const POLICY: TriagePolicy<'static> = TriagePolicy {
    source_folder: "INBOX",
    spam_folder: "Spam",
    quarantine_folder: "Quarantine",
};

#[test]
fn second_pass_over_a_sorted_mailbox_changes_nothing() {
    let store = MemoryMailbox::new();
    store.seed("INBOX", &mail("noreply@ads.example", "cheap watches"));
    store.seed("INBOX", &mail("carol@x.org", "minutes"));
    store.seed("INBOX", &mail("dave@x.org", "roadmap"));

    // First run: fetch, decide, sort. One spam move, two in-place
    // priority stamps.
    let mut session = store.clone();
    let messages = fetch_window(&mut session, "INBOX", 7, true, None).unwrap();
    assert_eq!(messages.len(), 3);

    let decisions = [
        record(Category::Spam, 5),
        record(Category::Fyi, 3),
        record(Category::Fyi, 3),
    ];
    let mut actions = Vec::new();
    for (message, decision) in messages.iter().zip(&decisions) {
        actions.extend(plan_actions(decision, &[message.uid], &POLICY));
    }
    let outcome = safe_sort(&mut session, "INBOX", &actions).unwrap();
    assert_eq!(outcome.processed, 3);
    assert_eq!(outcome.skipped, 0);

    // Spam moved out, the two stamped copies replaced their originals.
    assert_eq!(store.uids_in("Spam").len(), 1);
    let inbox_after_first = store.uids_in("INBOX");
    assert_eq!(inbox_after_first.len(), 2);
    for &uid in &inbox_after_first {
        let flags = store.flags_of("INBOX", uid).unwrap();
        assert!(flags.iter().any(|f| f == SENTINEL_KEYWORD));
        let raw = store.raw_of("INBOX", uid).unwrap();
        assert!(String::from_utf8_lossy(&raw).contains("X-Priority: 3"));
    }

    // Second run sees only the marked copies and leaves them alone.
    let mut session = store.clone();
    let refetched = fetch_window(&mut session, "INBOX", 7, true, None).unwrap();
    assert_eq!(refetched.len(), 2);

    let mut actions = Vec::new();
    for message in &refetched {
        actions.extend(plan_actions(&record(Category::Fyi, 3), &[message.uid], &POLICY));
    }
    let raw_before = store.raw_of("INBOX", refetched[0].uid).unwrap();
    let outcome = safe_sort(&mut session, "INBOX", &actions).unwrap();

    assert_eq!(outcome.processed, 0);
    assert_eq!(outcome.skipped, 2);
    assert_eq!(store.uids_in("INBOX"), inbox_after_first);
    assert_eq!(store.uids_in("Spam").len(), 1);
    assert_eq!(store.raw_of("INBOX", refetched[0].uid).unwrap(), raw_before);
}

#[test]
fn interrupted_retire_duplicates_at_worst_never_loses() {
    let store = MemoryMailbox::new();
    let original = store.seed("INBOX", &mail("erin@x.org", "contract"));

    // The copy lands but flagging the original as deleted fails, as if
    // the connection died between the two steps.
    store.fail_store_for(original);
    let mut session = store.clone();
    let actions = vec![SortAction {
        uid: original,
        folder: "Archive".to_string(),
        priority: 3,
        extra_flags: Vec::new(),
    }];
    let outcome = safe_sort(&mut session, "INBOX", &actions).unwrap();
    assert_eq!(outcome.processed, 1);
    assert_eq!(store.uids_in("Archive").len(), 1);
    // Original survives untouched; nothing was lost.
    let flags = store.flags_of("INBOX", original).unwrap();
    assert!(!flags.iter().any(|f| f == r"\Deleted"));

    // The next run starts clean, re-fetches the leftover original and
    // files it again.
    store.clear_store_failures();
    let mut session = store.clone();
    let refetched = fetch_window(&mut session, "INBOX", 7, true, None).unwrap();
    assert_eq!(refetched.len(), 1);
    assert_eq!(refetched[0].uid, original);

    let actions = vec![SortAction {
        uid: original,
        folder: "Archive".to_string(),
        priority: 3,
        extra_flags: Vec::new(),
    }];
    let outcome = safe_sort(&mut session, "INBOX", &actions).unwrap();
    assert_eq!(outcome.processed, 1);

    // Worst case reached: the archive holds a duplicate, the inbox is
    // clean, and no copy of the mail ever disappeared.
    assert!(store.uids_in("INBOX").is_empty());
    let archived = store.uids_in("Archive");
    assert_eq!(archived.len(), 2);
    for uid in archived {
        let raw = store.raw_of("Archive", uid).unwrap();
        assert!(String::from_utf8_lossy(&raw).contains("Subject: contract"));
    }
}

#[test]
fn failed_copy_leaves_the_original_in_place() {
    let store = MemoryMailbox::new();
    let first = store.seed("INBOX", &mail("frank@x.org", "invoice"));
    let second = store.seed("INBOX", &mail("grace@x.org", "summary"));

    // Both the dated append and its undated retry fail for the first
    // action; the second proceeds normally.
    store.fail_next_appends(2);
    let mut session = store.clone();
    let actions = vec![
        SortAction {
            uid: first,
            folder: "Sorted".to_string(),
            priority: 3,
            extra_flags: Vec::new(),
        },
        SortAction {
            uid: second,
            folder: "Sorted".to_string(),
            priority: 3,
            extra_flags: Vec::new(),
        },
    ];
    let outcome = safe_sort(&mut session, "INBOX", &actions).unwrap();

    assert_eq!(outcome.processed, 1);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.errors.len(), 1);
    assert!(outcome.errors[0].contains("append"));

    // The failed message is still in the inbox and not marked for
    // deletion; only the successful one moved.
    let flags = store.flags_of("INBOX", first).unwrap();
    assert!(!flags.iter().any(|f| f == r"\Deleted"));
    assert_eq!(store.uids_in("INBOX"), vec![first]);
    assert_eq!(store.uids_in("Sorted").len(), 1);
}

#[test]
fn keywordless_server_refiles_each_pass_but_preserves_every_mail() {
    let store = MemoryMailbox::new();
    store.set_keyword_support(false);
    store.seed("INBOX", &mail("heidi@x.org", "weekly report"));

    let run = |store: &MemoryMailbox, uid: u32| {
        let mut session = store.clone();
        let actions = vec![SortAction {
            uid,
            folder: "INBOX".to_string(),
            priority: 2,
            extra_flags: vec![r"\Flagged".to_string()],
        }];
        safe_sort(&mut session, "INBOX", &actions).unwrap()
    };

    let first_uid = store.uids_in("INBOX")[0];
    let outcome = run(&store, first_uid);
    assert_eq!(outcome.processed, 1);
    assert!(!outcome.keywords_supported);

    // Without keyword support no marker can stick, so the next pass
    // files the copy again instead of skipping it. The mailbox still
    // holds exactly one copy of the message afterwards.
    let second_uid = store.uids_in("INBOX")[0];
    assert_ne!(second_uid, first_uid);
    let flags = store.flags_of("INBOX", second_uid).unwrap();
    assert!(!flags.iter().any(|f| f == SENTINEL_KEYWORD));
    assert!(flags.iter().any(|f| f == r"\Flagged"));

    let outcome = run(&store, second_uid);
    assert_eq!(outcome.processed, 1);
    assert_eq!(outcome.skipped, 0);
    assert_eq!(store.uids_in("INBOX").len(), 1);
    let survivor = store.uids_in("INBOX")[0];
    let raw = store.raw_of("INBOX", survivor).unwrap();
    assert!(String::from_utf8_lossy(&raw).contains("Subject: weekly report"));
}

//! Conversation threading — groups fetched messages into threads.
//!
//! Union-find over message indices in two passes: header-based linking
//! (Message-ID / In-Reply-To / References), then a conservative subject
//! fallback for messages the headers left unlinked.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::mailbox::message::Message;

/// One conversation: messages sorted chronologically ascending.
#[derive(Debug, Clone)]
pub struct Thread {
    pub messages: Vec<Message>,
}

impl Thread {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Most recent member (threads built by `group_into_threads` are never empty).
    pub fn newest(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn oldest(&self) -> Option<&Message> {
        self.messages.first()
    }

    fn first_sort_key(&self) -> Option<(Option<chrono::DateTime<chrono::Utc>>, u32)> {
        self.messages.first().map(Message::sort_key)
    }

    /// Render the conversation as prompt text.
    ///
    /// A single message keeps the plain header-plus-body form; longer
    /// threads get numbered message markers in chronological order.
    pub fn format_for_prompt(&self) -> String {
        if self.messages.len() == 1 {
            let m = &self.messages[0];
            let mut parts = vec![
                format!("Subject: {}", m.subject),
                format!("From: {}", m.from),
                format!("To: {}", m.to),
            ];
            if !m.cc.is_empty() {
                parts.push(format!("Cc: {}", m.cc));
            }
            parts.push(String::new());
            parts.push(m.body.clone());
            return parts.join("\n").trim().to_string();
        }

        let n = self.messages.len();
        let mut parts = vec![format!(
            "This is an email thread with {n} messages, shown in chronological order.\n"
        )];
        for (i, m) in self.messages.iter().enumerate() {
            parts.push(format!("=== Message {} of {} ===", i + 1, n));
            parts.push(format!("Subject: {}", m.subject));
            parts.push(format!("From: {}", m.from));
            parts.push(format!("To: {}", m.to));
            if !m.cc.is_empty() {
                parts.push(format!("Cc: {}", m.cc));
            }
            if let Some(date) = m.date {
                parts.push(format!("Date: {}", date.to_rfc3339()));
            }
            parts.push(String::new());
            parts.push(m.body.clone());
            parts.push(String::new());
        }
        parts.join("\n").trim().to_string()
    }
}

// ── Subject normalization ───────────────────────────────────────────

static SUBJECT_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:re|aw|antwort|antw|sv|vs|ref|fwd|fw|wg|wtr)\s*:\s*").unwrap()
});

/// Strip reply/forward prefixes repeatedly, collapse whitespace, lowercase.
pub fn normalize_subject(subject: &str) -> String {
    let mut s = subject.trim();
    while let Some(m) = SUBJECT_PREFIX.find(s) {
        s = &s[m.end()..];
    }
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ── Union-find ──────────────────────────────────────────────────────

/// Array-based disjoint sets: path halving on find, union by rank.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        if self.rank[ra] < self.rank[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        if self.rank[ra] == self.rank[rb] {
            self.rank[ra] += 1;
        }
    }
}

// ── Grouping ────────────────────────────────────────────────────────

/// Minimum normalized-subject length for the fallback pass; shorter
/// subjects ("Hi", "Danke") would merge unrelated mail.
const MIN_SUBJECT_LEN: usize = 8;

/// Group messages into threads.
///
/// Pass 1 links by headers; pass 2 links by identical normalized subject,
/// but only messages that pass 1 left in singleton components, so header
/// evidence always wins over subject guessing.
pub fn group_into_threads(messages: Vec<Message>) -> Vec<Thread> {
    let n = messages.len();
    if n == 0 {
        return Vec::new();
    }

    let mut uf = UnionFind::new(n);

    // message_id -> index; duplicates keep the later entry
    let mut mid_to_idx: HashMap<&str, usize> = HashMap::new();
    for (i, m) in messages.iter().enumerate() {
        let mid = m.message_id.trim();
        if !mid.is_empty() {
            mid_to_idx.insert(mid, i);
        }
    }

    // Pass 1: header-based linking
    for (i, m) in messages.iter().enumerate() {
        let irt = m.in_reply_to.trim();
        if !irt.is_empty()
            && let Some(&j) = mid_to_idx.get(irt)
        {
            uf.union(i, j);
        }
        for r in &m.references {
            let r = r.trim();
            if !r.is_empty()
                && let Some(&j) = mid_to_idx.get(r)
            {
                uf.union(i, j);
            }
        }
    }

    // Members of header components with 2+ messages skip the subject pass
    let mut component_size: HashMap<usize, usize> = HashMap::new();
    for i in 0..n {
        let root = uf.find(i);
        *component_size.entry(root).or_insert(0) += 1;
    }
    let header_grouped: Vec<bool> = (0..n)
        .map(|i| {
            let root = uf.find(i);
            component_size.get(&root).copied().unwrap_or(0) >= 2
        })
        .collect();

    // Pass 2: subject fallback
    let mut subj_to_idx: HashMap<String, usize> = HashMap::new();
    for (i, m) in messages.iter().enumerate() {
        if header_grouped[i] {
            continue;
        }
        let ns = normalize_subject(&m.subject);
        if ns.chars().count() < MIN_SUBJECT_LEN {
            continue;
        }
        match subj_to_idx.get(&ns) {
            Some(&j) => uf.union(i, j),
            None => {
                subj_to_idx.insert(ns, i);
            }
        }
    }

    // Collect, sort members chronologically, sort threads by oldest member
    let roots: Vec<usize> = (0..n).map(|i| uf.find(i)).collect();
    let mut groups: HashMap<usize, Vec<Message>> = HashMap::new();
    for (i, m) in messages.into_iter().enumerate() {
        groups.entry(roots[i]).or_default().push(m);
    }

    let mut threads: Vec<Thread> = groups
        .into_values()
        .map(|mut members| {
            members.sort_by_key(Message::sort_key);
            Thread { messages: members }
        })
        .collect();
    threads.sort_by_key(Thread::first_sort_key);
    threads
}

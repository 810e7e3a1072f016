//! Decision record types - the guaranteed per-thread analysis result.
//!
//! Every field a triage decision needs lives here. Enum labels parse
//! tolerantly (model output is messy) and render back as the canonical
//! uppercase forms used in reports.

/// Coarse triage category for a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Spam,
    Phishing,
    Fyi,
    Actionable,
}

impl Category {
    /// Parse a model-supplied label. Unknown values normalize to
    /// `Actionable` so a garbled category never blocks a record.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_uppercase().as_str() {
            "SPAM" => Category::Spam,
            "PHISHING" => Category::Phishing,
            "FYI" => Category::Fyi,
            _ => Category::Actionable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Spam => "SPAM",
            Category::Phishing => "PHISHING",
            Category::Fyi => "FYI",
            Category::Actionable => "ACTIONABLE",
        }
    }

    /// Spam and phishing are handled identically in most policies.
    pub fn is_junk(&self) -> bool {
        matches!(self, Category::Spam | Category::Phishing)
    }
}

/// How the message reached the mailbox owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    Direct,
    Cc,
    Group,
    List,
    Unknown,
}

impl Addressing {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_uppercase().as_str() {
            "DIRECT" => Addressing::Direct,
            "CC" => Addressing::Cc,
            "GROUP" => Addressing::Group,
            "LIST" => Addressing::List,
            _ => Addressing::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Addressing::Direct => "DIRECT",
            Addressing::Cc => "CC",
            Addressing::Group => "GROUP",
            Addressing::List => "LIST",
            Addressing::Unknown => "UNKNOWN",
        }
    }

    /// Strength used when combining per-message results across a thread.
    /// A direct address anywhere outranks list traffic elsewhere.
    pub fn rank(&self) -> u8 {
        match self {
            Addressing::Direct => 4,
            Addressing::Cc => 3,
            Addressing::List => 2,
            Addressing::Group => 1,
            Addressing::Unknown => 0,
        }
    }
}

/// Whether the mailbox owner is personally asked to do something.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Asked {
    Yes,
    No,
}

impl Asked {
    /// Accepts English and German one-letter answers. Anything
    /// unrecognized is treated as `No`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_uppercase().as_str() {
            "YES" | "Y" | "JA" | "J" => Asked::Yes,
            _ => Asked::No,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Asked::Yes => "YES",
            Asked::No => "NO",
        }
    }
}

/// How the record was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStatus {
    /// First model response parsed and validated cleanly.
    Ok,
    /// First response was broken; the reformat retry produced this record.
    Repaired,
    /// Both attempts failed; this record was synthesized locally.
    Fallback,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Ok => "OK",
            AnalysisStatus::Repaired => "REPAIRED",
            AnalysisStatus::Fallback => "FALLBACK",
        }
    }
}

/// The complete analysis result for one thread.
///
/// Exactly one of these exists per thread after analysis, regardless of
/// how the model behaved. Downstream consumers (report, triage, drafts)
/// never see a missing or half-filled record.
#[derive(Debug, Clone)]
pub struct DecisionRecord {
    pub subject: String,
    pub sender: String,
    pub category: Category,
    /// One-line situational note from the model, may be empty.
    pub context: String,
    pub addressing: Addressing,
    pub asked: Asked,
    /// Urgency, 1 (most urgent) to 5 (least).
    pub priority: u8,
    pub status: AnalysisStatus,
    /// Suggested next steps, free text. `"none"` means nothing to do.
    pub actions: String,
    pub summary: String,
    /// Number of messages in the analyzed thread.
    pub thread_size: usize,
    /// Compacted body excerpt, attached only when the record needs
    /// manual verification (non-OK status or high priority).
    pub excerpt: Option<String>,
}

static NO_ACTION_WORDS: &[&str] = &["none", "keine", "n/a", "-"];

impl DecisionRecord {
    /// Split the free-text actions into individual items.
    ///
    /// Items are separated by semicolons or newlines; leading bullets
    /// and list numbering are stripped. Placeholder values like
    /// "none" or "keine" yield an empty list.
    pub fn action_items(&self) -> Vec<String> {
        self.actions
            .split(|c| c == ';' || c == '\n')
            .map(strip_bullet)
            .filter(|item| {
                let bare = item.trim_end_matches('.').to_lowercase();
                !bare.is_empty() && !NO_ACTION_WORDS.contains(&bare.as_str())
            })
            .map(str::to_string)
            .collect()
    }

    /// True when the actions field names at least one real step.
    pub fn has_real_actions(&self) -> bool {
        !self.action_items().is_empty()
    }
}

/// Strip a leading list marker ("- ", "* ", "2.", "3)") from an item.
fn strip_bullet(item: &str) -> &str {
    let item = item.trim();
    let stripped = item.trim_start_matches(['-', '*', '•']).trim_start();
    if stripped.len() != item.len() {
        return stripped;
    }
    // numbered lists: digits followed by "." or ")"
    let digits = item.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &item[digits..];
        if let Some(tail) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return tail.trim_start();
        }
    }
    item
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_actions(actions: &str) -> DecisionRecord {
        DecisionRecord {
            subject: "s".into(),
            sender: "a@b".into(),
            category: Category::Actionable,
            context: String::new(),
            addressing: Addressing::Unknown,
            asked: Asked::No,
            priority: 3,
            status: AnalysisStatus::Ok,
            actions: actions.into(),
            summary: "sum".into(),
            thread_size: 1,
            excerpt: None,
        }
    }

    // ── label parsing ───────────────────────────────────────────

    #[test]
    fn unknown_category_becomes_actionable() {
        assert_eq!(Category::from_label("URGENT!!"), Category::Actionable);
        assert_eq!(Category::from_label(" spam "), Category::Spam);
        assert_eq!(Category::from_label("phishing"), Category::Phishing);
    }

    #[test]
    fn unknown_addressing_becomes_unknown() {
        assert_eq!(Addressing::from_label("BCC"), Addressing::Unknown);
        assert_eq!(Addressing::from_label("direct"), Addressing::Direct);
    }

    #[test]
    fn asked_accepts_both_languages() {
        assert_eq!(Asked::from_label("ja"), Asked::Yes);
        assert_eq!(Asked::from_label("Y"), Asked::Yes);
        assert_eq!(Asked::from_label("NEIN"), Asked::No);
        assert_eq!(Asked::from_label("maybe?"), Asked::No);
    }

    #[test]
    fn addressing_rank_orders_direct_first() {
        let mut all = [
            Addressing::Group,
            Addressing::Direct,
            Addressing::Unknown,
            Addressing::List,
            Addressing::Cc,
        ];
        all.sort_by_key(|a| std::cmp::Reverse(a.rank()));
        assert_eq!(
            all,
            [
                Addressing::Direct,
                Addressing::Cc,
                Addressing::List,
                Addressing::Group,
                Addressing::Unknown,
            ]
        );
    }

    // ── action items ────────────────────────────────────────────

    #[test]
    fn action_items_split_on_semicolons_and_newlines() {
        let r = record_with_actions("reply to Alice; book the room\nsend agenda");
        assert_eq!(
            r.action_items(),
            vec!["reply to Alice", "book the room", "send agenda"]
        );
    }

    #[test]
    fn action_items_strip_bullets_and_numbering() {
        let r = record_with_actions("- reply\n* escalate\n2. archive\n3) done");
        assert_eq!(r.action_items(), vec!["reply", "escalate", "archive", "done"]);
    }

    #[test]
    fn placeholder_actions_count_as_empty() {
        for text in ["none", "None.", "keine", "Keine.", "", "  ", "-", "N/A"] {
            let r = record_with_actions(text);
            assert!(!r.has_real_actions(), "{text:?} should have no actions");
        }
        assert!(record_with_actions("call back").has_real_actions());
    }
}

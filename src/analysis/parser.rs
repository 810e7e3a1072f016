//! Tolerant parsing of model output into a `ParsedBlock`.
//!
//! Model responses drift: labels come in English or German, several
//! fields land on one line separated by pipes, sections continue over
//! bullet lines, and the whole block may be wrapped in prose. The
//! parser extracts what it can and never fails; validation of the
//! result is a separate step.

use std::sync::LazyLock;

use regex::Regex;

/// Marker pair the prompts ask the model to wrap its block in.
pub const BLOCK_BEGIN: &str = "<<BEGIN>>";
pub const BLOCK_END: &str = "<<END>>";

/// Return the text between the `<<BEGIN>>`/`<<END>>` markers.
///
/// When either marker is missing, or they appear out of order, the
/// whole text is returned trimmed so parsing still gets a chance.
pub fn extract_marked_block(text: &str) -> &str {
    if let Some(b) = text.find(BLOCK_BEGIN)
        && let Some(e) = text.find(BLOCK_END)
        && e > b
    {
        return text[b + BLOCK_BEGIN.len()..e].trim();
    }
    text.trim()
}

/// Raw field values pulled out of one model block.
///
/// Labels are kept as loose strings here; canonicalization into record
/// enums happens when the record is built. `priority` is the one typed
/// field because its absence must be distinguishable from any default.
#[derive(Debug, Clone)]
pub struct ParsedBlock {
    pub subject: String,
    pub sender: String,
    pub category: String,
    pub context: String,
    pub addressing: String,
    pub asked: String,
    /// Set only when a digit in 1..=5 was found. A digit outside that
    /// range clears the field so validation rejects it.
    pub priority: Option<u8>,
    pub status: String,
    pub actions: String,
    pub summary: String,
    pub raw_excerpt: String,
    pub thread_size: usize,
    pub draft_status: String,
}

impl Default for ParsedBlock {
    fn default() -> Self {
        ParsedBlock {
            subject: String::new(),
            sender: String::new(),
            category: String::new(),
            context: String::new(),
            addressing: String::new(),
            asked: String::new(),
            priority: None,
            status: "OK".to_string(),
            actions: String::new(),
            summary: String::new(),
            raw_excerpt: String::new(),
            thread_size: 1,
            draft_status: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Subject,
    Sender,
    Category,
    Context,
    Addressing,
    Asked,
    Priority,
    Status,
    ThreadSize,
    DraftStatus,
    RawExcerpt,
    Summary,
    Actions,
}

// Label separator: models use ":", "=" or "-" interchangeably.
const SEP: &str = r"\s*[:=\-]\s*";

macro_rules! label {
    ($field:expr, $names:expr) => {
        ($field, Regex::new(&format!(r"(?i)\b({}){SEP}", $names)).unwrap())
    };
}

/// Known labels in both languages. Order matters for alternations
/// (longer forms first) but every regex is tried on every line.
static LABELS: LazyLock<Vec<(Field, Regex)>> = LazyLock::new(|| {
    vec![
        label!(Field::Subject, "subject|betreff"),
        label!(Field::Sender, "sender|from|von"),
        label!(Field::Category, "category|kategorie"),
        label!(Field::Context, "context|kontext"),
        label!(
            Field::Addressing,
            "addressing|adressierung|recipients|empf[aä]nger"
        ),
        label!(
            Field::Asked,
            r"asked\s*directly|asked-directly|asked|direkt\s*angesprochen"
        ),
        label!(Field::Priority, "priority|priorit[aä]t|prio"),
        label!(Field::Status, r"llm\s*status|llm-status|status"),
        label!(Field::ThreadSize, r"thread[\s-]?size|thread[\s-]?groesse"),
        label!(Field::DraftStatus, r"draft[\s-]?status|draft|entwurf"),
        label!(
            Field::RawExcerpt,
            r"raw\s*excerpt|raw-excerpt|excerpt|auszug"
        ),
        label!(Field::Summary, "summary|zusammenfassung"),
        // "Actions for <person>" with an arbitrary name before the separator.
        (
            Field::Actions,
            Regex::new(&format!(r"(?i)\bactions\s*for\s+[^:=\-]{{1,80}}{SEP}")).unwrap(),
        ),
        label!(Field::Actions, r"actions|action\s*items|todo|to-do|aufgaben"),
    ]
});

static SECTION_ACTIONS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^actions\b\s*([\-=]\s*)?$").unwrap());
static SECTION_SUMMARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(summary|zusammenfassung)\b\s*([\-=]\s*)?$").unwrap());
static SECTION_CONTEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(context|kontext)\b\s*([\-=]\s*)?$").unwrap());
static SECTION_EXCERPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(raw\s*excerpt|raw-excerpt|excerpt|auszug)\b\s*([\-=]\s*)?$").unwrap()
});

// Generic "Key: Value" line. The key class excludes the separator
// characters, so hyphenated labels never reach this branch.
static KEY_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^:=\-]{2,60})\s*[:=\-]\s*(.*)$").unwrap());

static FIRST_DIGIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d").unwrap());
static FIRST_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// Numbering prefix added when a report is sorted; skipped on re-parse.
pub const ITEM_PREFIX: &str = "Item:";

/// Parse one block of model output into its fields.
pub fn parse_block(block: &str) -> ParsedBlock {
    let mut out = ParsedBlock::default();
    // Section whose continuation lines are still being collected.
    let mut section: Option<Field> = None;

    for raw in block.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(ITEM_PREFIX) {
            continue;
        }

        // Bare section headers without a value on the same line.
        if SECTION_ACTIONS.is_match(line) {
            section = Some(Field::Actions);
            continue;
        }
        if SECTION_SUMMARY.is_match(line) {
            section = Some(Field::Summary);
            continue;
        }
        if SECTION_CONTEXT.is_match(line) {
            section = Some(Field::Context);
            continue;
        }
        if SECTION_EXCERPT.is_match(line) {
            section = Some(Field::RawExcerpt);
            continue;
        }

        // Several labels may share one line. Collect every label hit,
        // keep the longest match at each position, and slice the value
        // of each label up to the start of the next one.
        let mut hits: Vec<(usize, usize, Field)> = Vec::new();
        for (field, rx) in LABELS.iter() {
            for m in rx.find_iter(line) {
                hits.push((m.start(), m.end(), *field));
            }
        }
        if !hits.is_empty() {
            hits.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| (b.1 - b.0).cmp(&(a.1 - a.0))));
            let mut kept: Vec<(usize, usize, Field)> = Vec::new();
            for (start, end, field) in hits {
                if kept.iter().any(|&(s, e, _)| s <= start && start < e) {
                    continue;
                }
                kept.push((start, end, field));
            }
            for i in 0..kept.len() {
                let (_, value_start, field) = kept[i];
                let value_end = kept.get(i + 1).map_or(line.len(), |h| h.0);
                let value = line[value_start..value_end]
                    .trim()
                    .trim_matches(|c: char| c == ' ' || c == '|' || c == '\t');
                out.set(field, value);
                section = matches!(field, Field::Actions | Field::Summary).then_some(field);
            }
            continue;
        }

        // Keys the label regexes miss, mostly transliterated umlauts
        // ("Prioritaet", "Empfaenger"). An unknown key closes any open
        // section so stray prose is not appended to it.
        if let Some(caps) = KEY_VALUE.captures(line) {
            let key = caps[1].trim().to_lowercase();
            let value = caps[2].trim().to_string();
            section = match key.as_str() {
                "subject" | "betreff" => {
                    out.set(Field::Subject, &value);
                    None
                }
                "sender" | "from" | "von" => {
                    out.set(Field::Sender, &value);
                    None
                }
                "category" | "kategorie" => {
                    out.set(Field::Category, &value);
                    None
                }
                "context" | "kontext" => {
                    out.set(Field::Context, &value);
                    Some(Field::Context)
                }
                "addressing" | "adressierung" | "recipients" | "empfänger" | "empfaenger" => {
                    out.set(Field::Addressing, &value);
                    None
                }
                "asked directly" | "asked" | "direkt angesprochen" => {
                    out.set(Field::Asked, &value);
                    None
                }
                "priority" | "priorität" | "prioritaet" | "prio" => {
                    out.set(Field::Priority, &value);
                    None
                }
                "llm status" | "status" => {
                    out.set(Field::Status, &value);
                    None
                }
                "thread size" | "thread groesse" => {
                    out.set(Field::ThreadSize, &value);
                    None
                }
                "draft status" | "draft" | "entwurf" => {
                    out.set(Field::DraftStatus, &value);
                    None
                }
                "raw excerpt" | "excerpt" | "auszug" => {
                    out.set(Field::RawExcerpt, &value);
                    Some(Field::RawExcerpt)
                }
                "summary" | "zusammenfassung" => {
                    out.set(Field::Summary, &value);
                    Some(Field::Summary)
                }
                key if key.starts_with("actions for") => {
                    out.set(Field::Actions, &value);
                    Some(Field::Actions)
                }
                "actions" | "action items" | "todo" | "aufgaben" => {
                    out.set(Field::Actions, &value);
                    Some(Field::Actions)
                }
                _ => None,
            };
            continue;
        }

        // Continuation line of an open section.
        if let Some(field) = section {
            out.set(field, line);
        }
    }

    out
}

impl ParsedBlock {
    fn set(&mut self, field: Field, value: &str) {
        let v = value.trim();
        if v.is_empty() {
            return;
        }
        match field {
            Field::Subject => self.subject = v.to_string(),
            Field::Sender => self.sender = v.to_string(),
            Field::Category => self.category = v.to_string(),
            Field::Addressing => self.addressing = v.to_string(),
            Field::Asked => self.asked = v.to_string(),
            Field::Status => self.status = v.to_uppercase(),
            Field::DraftStatus => self.draft_status = v.to_string(),
            Field::Priority => {
                if let Some(m) = FIRST_DIGIT.find(v) {
                    let digit = m.as_str().parse::<u8>().unwrap_or(0);
                    self.priority = (1..=5).contains(&digit).then_some(digit);
                }
            }
            Field::ThreadSize => {
                if let Some(m) = FIRST_NUMBER.find(v)
                    && let Ok(n) = m.as_str().parse::<usize>()
                {
                    self.thread_size = n;
                }
            }
            Field::Context | Field::Actions | Field::Summary | Field::RawExcerpt => {
                let slot = match field {
                    Field::Context => &mut self.context,
                    Field::Actions => &mut self.actions,
                    Field::Summary => &mut self.summary,
                    _ => &mut self.raw_excerpt,
                };
                if slot.is_empty() {
                    *slot = v.to_string();
                } else {
                    slot.push('\n');
                    slot.push_str(v);
                }
            }
        }
    }
}

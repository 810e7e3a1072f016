//! Deterministic post-processing of analysis records.
//!
//! Runs after every successful parse (first attempt or repair), never
//! on fallback records. Each rule is a pure transformation; they apply
//! in a fixed order because later rules read what earlier ones wrote,
//! e.g. the list floor must see the header-derived addressing.

use tracing::debug;

use crate::analysis::addressing::AddressingHints;
use crate::analysis::record::{Addressing, AnalysisStatus, Asked, DecisionRecord};

/// A single correction with a name for the debug log.
struct PostRule {
    name: &'static str,
    apply: fn(DecisionRecord, &AddressingHints) -> DecisionRecord,
}

const RULES: &[PostRule] = &[
    PostRule {
        name: "addressing_override",
        apply: addressing_override,
    },
    PostRule {
        name: "self_sent",
        apply: self_sent,
    },
    PostRule {
        name: "junk_demotion",
        apply: junk_demotion,
    },
    PostRule {
        name: "list_floor",
        apply: list_floor,
    },
    PostRule {
        name: "excerpt_gate",
        apply: excerpt_gate,
    },
];

/// Apply all rules in order and return the corrected record.
pub fn apply_rules(record: DecisionRecord, hints: &AddressingHints) -> DecisionRecord {
    RULES.iter().fold(record, |r, rule| {
        debug!(rule = rule.name, "applying post rule");
        (rule.apply)(r, hints)
    })
}

/// Headers do not lie: the derived addressing replaces whatever the
/// model guessed.
fn addressing_override(mut r: DecisionRecord, hints: &AddressingHints) -> DecisionRecord {
    r.addressing = hints.addressing;
    r
}

/// A thread whose newest message the owner wrote needs no attention.
fn self_sent(mut r: DecisionRecord, hints: &AddressingHints) -> DecisionRecord {
    if hints.self_sent {
        r.priority = 5;
        r.asked = Asked::No;
        r.actions = "none".to_string();
    }
    r
}

/// Junk never gets urgency or action items, whatever the model said.
fn junk_demotion(mut r: DecisionRecord, _hints: &AddressingHints) -> DecisionRecord {
    if r.category.is_junk() {
        r.priority = 5;
        r.actions = "none".to_string();
    }
    r
}

/// List traffic that asks nothing of the owner is never priority 1.
fn list_floor(mut r: DecisionRecord, _hints: &AddressingHints) -> DecisionRecord {
    if r.addressing == Addressing::List && r.asked == Asked::No && r.priority == 1 {
        r.priority = 2;
    }
    r
}

/// Keep the raw excerpt only where a human may need to double-check:
/// records that did not parse cleanly, or urgent ones.
fn excerpt_gate(mut r: DecisionRecord, _hints: &AddressingHints) -> DecisionRecord {
    let keep = r.status != AnalysisStatus::Ok || r.priority <= 2;
    if !keep || matches!(r.excerpt.as_deref(), Some("")) {
        r.excerpt = None;
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::record::Category;

    fn record() -> DecisionRecord {
        DecisionRecord {
            subject: "s".into(),
            sender: "bob@x.org".into(),
            category: Category::Actionable,
            context: String::new(),
            addressing: Addressing::Direct,
            asked: Asked::No,
            priority: 3,
            status: AnalysisStatus::Ok,
            actions: "reply".into(),
            summary: "sum".into(),
            thread_size: 1,
            excerpt: Some("excerpt text".into()),
        }
    }

    fn hints(addressing: Addressing, self_sent: bool) -> AddressingHints {
        AddressingHints {
            addressing,
            self_sent,
        }
    }

    #[test]
    fn header_addressing_overrides_model_guess() {
        let r = apply_rules(record(), &hints(Addressing::Cc, false));
        assert_eq!(r.addressing, Addressing::Cc);
    }

    #[test]
    fn self_sent_threads_are_parked() {
        let r = apply_rules(record(), &hints(Addressing::Direct, true));
        assert_eq!(r.priority, 5);
        assert_eq!(r.asked, Asked::No);
        assert_eq!(r.actions, "none");
    }

    #[test]
    fn junk_loses_priority_and_actions() {
        for category in [Category::Spam, Category::Phishing] {
            let mut input = record();
            input.category = category;
            input.priority = 1;
            let r = apply_rules(input, &hints(Addressing::Direct, false));
            assert_eq!(r.priority, 5);
            assert_eq!(r.actions, "none");
        }
    }

    #[test]
    fn quiet_list_mail_cannot_be_priority_one() {
        let mut input = record();
        input.priority = 1;
        // Model claimed DIRECT; headers say LIST. The override must land
        // before the floor so the floor sees the corrected addressing.
        let r = apply_rules(input, &hints(Addressing::List, false));
        assert_eq!(r.addressing, Addressing::List);
        assert_eq!(r.priority, 2);
    }

    #[test]
    fn list_mail_with_direct_question_keeps_priority_one() {
        let mut input = record();
        input.priority = 1;
        input.asked = Asked::Yes;
        let r = apply_rules(input, &hints(Addressing::List, false));
        assert_eq!(r.priority, 1);
    }

    #[test]
    fn excerpt_kept_only_for_urgent_or_dirty_records() {
        // OK with middling priority: dropped.
        let r = apply_rules(record(), &hints(Addressing::Direct, false));
        assert_eq!(r.excerpt, None);

        // OK but urgent: kept.
        let mut urgent = record();
        urgent.priority = 2;
        let r = apply_rules(urgent, &hints(Addressing::Direct, false));
        assert_eq!(r.excerpt.as_deref(), Some("excerpt text"));

        // Repaired: kept regardless of priority.
        let mut repaired = record();
        repaired.status = AnalysisStatus::Repaired;
        repaired.priority = 4;
        let r = apply_rules(repaired, &hints(Addressing::Direct, false));
        assert_eq!(r.excerpt.as_deref(), Some("excerpt text"));
    }
}

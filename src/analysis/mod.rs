//! Guaranteed thread analysis.
//!
//! The contract: every thread gets exactly one valid `DecisionRecord`,
//! whatever the model does. A clean first answer is used as-is, a
//! broken one gets a single strict reformat retry, and when that fails
//! too the record is synthesized locally. At most two model calls per
//! thread, and no path returns an error to the caller.

pub mod addressing;
pub mod parser;
pub mod prompt;
pub mod record;
pub mod rules;

pub use addressing::AddressingHints;
pub use record::{Addressing, AnalysisStatus, Asked, Category, DecisionRecord};

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::analysis::addressing::derive_thread_addressing;
use crate::analysis::parser::{ParsedBlock, extract_marked_block, parse_block};
use crate::oracle::{GenerationOptions, Oracle};
use crate::threading::Thread;

/// Fallback records land at priority 2: near the top of the report so
/// a human verifies them, below genuine emergencies.
const FALLBACK_PRIORITY: u8 = 2;

const EXCERPT_LIMIT: usize = 450;

pub struct Analyzer {
    oracle: Arc<dyn Oracle>,
    prompt_base: String,
    person: String,
    identity_addr: String,
    roles: String,
}

impl Analyzer {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        prompt_base: String,
        person: String,
        identity_addr: String,
        roles: String,
    ) -> Self {
        Analyzer {
            oracle,
            prompt_base,
            person,
            identity_addr,
            roles,
        }
    }

    /// Analyze one thread. Infallible: every outcome, including a dead
    /// model endpoint, yields a complete record.
    pub async fn analyze_thread(
        &self,
        thread: &Thread,
        sender_context: Option<&str>,
    ) -> DecisionRecord {
        let email_text = thread.format_for_prompt();
        let excerpt = compact_excerpt(
            thread.newest().map(|m| m.body.as_str()).unwrap_or_default(),
            EXCERPT_LIMIT,
        );
        let hints = derive_thread_addressing(thread, &self.identity_addr);

        let first_prompt = prompt::analysis_prompt(
            &self.prompt_base,
            &self.person,
            &self.roles,
            sender_context,
            &email_text,
        );
        let raw = match self
            .oracle
            .generate(&first_prompt, GenerationOptions::analysis())
            .await
        {
            // Transport failures and blank responses skip the repair
            // attempt: there is nothing to reformat.
            Ok(text) if text.trim().is_empty() => {
                warn!("analysis call returned nothing, synthesizing fallback record");
                return fallback_record(thread, "model returned an empty response", excerpt);
            }
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "analysis call failed, synthesizing fallback record");
                return fallback_record(thread, &format!("model call failed: {e}"), excerpt);
            }
        };

        let parsed = parse_block(extract_marked_block(&raw));
        match validate(&parsed) {
            Ok(()) => {
                debug!("first attempt parsed cleanly");
                let record = self.build_record(&parsed, thread, AnalysisStatus::Ok, excerpt);
                return rules::apply_rules(record, &hints);
            }
            Err(errors) => {
                debug!(?errors, "first attempt failed validation, trying repair");
            }
        }

        let repair_prompt = prompt::repair_prompt(&self.person, &email_text, &raw);
        if let Ok(text) = self
            .oracle
            .generate(&repair_prompt, GenerationOptions::repair())
            .await
        {
            let parsed = parse_block(extract_marked_block(&text));
            if validate(&parsed).is_ok() {
                info!("repair attempt produced a valid block");
                let record = self.build_record(&parsed, thread, AnalysisStatus::Repaired, excerpt);
                return rules::apply_rules(record, &hints);
            }
        }

        warn!("repair failed or unparseable, synthesizing fallback record");
        fallback_record(thread, "repair failed or unparseable", excerpt)
    }

    /// Canonicalize a validated parse into a record. Missing identity
    /// fields fall back to the newest message's headers.
    fn build_record(
        &self,
        parsed: &ParsedBlock,
        thread: &Thread,
        status: AnalysisStatus,
        excerpt: String,
    ) -> DecisionRecord {
        let newest = thread.newest();
        DecisionRecord {
            subject: non_empty(&parsed.subject)
                .or_else(|| newest.and_then(|m| non_empty(&m.subject)))
                .unwrap_or_else(|| "(no subject)".to_string()),
            sender: non_empty(&parsed.sender)
                .or_else(|| newest.and_then(|m| non_empty(&m.from)))
                .unwrap_or_else(|| "(unknown)".to_string()),
            category: Category::from_label(&parsed.category),
            context: parsed.context.clone(),
            addressing: Addressing::from_label(&parsed.addressing),
            asked: Asked::from_label(&parsed.asked),
            priority: parsed.priority.unwrap_or(5),
            status,
            actions: non_empty(&parsed.actions).unwrap_or_else(|| "none".to_string()),
            summary: non_empty(&parsed.summary)
                .unwrap_or_else(|| "Unclear. Please review the original message.".to_string()),
            thread_size: thread.len(),
            excerpt: (!excerpt.is_empty()).then_some(excerpt),
        }
    }
}

/// Hard validation of a parsed block. Soft issues (unknown labels) are
/// normalized during record construction instead.
fn validate(parsed: &ParsedBlock) -> Result<(), Vec<&'static str>> {
    let mut errors = Vec::new();
    if parsed.priority.is_none() {
        errors.push("priority");
    }
    if parsed.summary.trim().is_empty() {
        errors.push("summary");
    }
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// Synthesize the deterministic record used when the model is of no
/// help. Post-processing rules do not run on these; the constants
/// below are already final.
fn fallback_record(thread: &Thread, reason: &str, excerpt: String) -> DecisionRecord {
    let newest = thread.newest();
    DecisionRecord {
        subject: newest
            .and_then(|m| non_empty(&m.subject))
            .unwrap_or_else(|| "(no subject)".to_string()),
        sender: newest
            .and_then(|m| non_empty(&m.from))
            .unwrap_or_else(|| "(unknown)".to_string()),
        category: Category::Actionable,
        context: String::new(),
        addressing: Addressing::Unknown,
        asked: Asked::No,
        priority: FALLBACK_PRIORITY,
        status: AnalysisStatus::Fallback,
        actions: "open the original message and review".to_string(),
        summary: format!("Model output unusable ({reason}). Please review the original message."),
        thread_size: thread.len(),
        excerpt: (!excerpt.is_empty()).then_some(excerpt),
    }
}

static WHITESPACE_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Collapse a body into a single-line excerpt of at most `limit`
/// characters, with an ellipsis when truncated.
fn compact_excerpt(body: &str, limit: usize) -> String {
    let collapsed = WHITESPACE_RUNS.replace_all(body.trim(), " ");
    if collapsed.chars().count() <= limit {
        return collapsed.into_owned();
    }
    let head: String = collapsed.chars().take(limit).collect();
    format!("{}...", head.trim_end())
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

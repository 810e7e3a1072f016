//! Turns decision records into mailbox mutations.
//!
//! Deliberately thin: one record plus the thread's UIDs in, a list of
//! sort actions out. All judgement lives in the analysis layer; all
//! mutation mechanics live in the sorter.

use crate::analysis::{Category, DecisionRecord};
use crate::config::Config;
use crate::mailbox::SortAction;

const SEEN: &str = r"\Seen";
const FLAGGED: &str = r"\Flagged";

/// Where each category of mail ends up.
#[derive(Debug, Clone, Copy)]
pub struct TriagePolicy<'a> {
    /// Folder the messages were fetched from; in-place actions target it.
    pub source_folder: &'a str,
    pub spam_folder: &'a str,
    pub quarantine_folder: &'a str,
}

impl<'a> From<&'a Config> for TriagePolicy<'a> {
    fn from(config: &'a Config) -> Self {
        TriagePolicy {
            source_folder: &config.mailbox,
            spam_folder: &config.spam_folder,
            quarantine_folder: &config.quarantine_folder,
        }
    }
}

/// Plan one action per thread member.
///
/// Spam and phishing move out, marked read so they stop demanding
/// attention. Everything else is replaced in the source folder to pick
/// up the priority header; urgent actionable mail additionally gets
/// `\Flagged`.
pub fn plan_actions(
    record: &DecisionRecord,
    uids: &[u32],
    policy: &TriagePolicy<'_>,
) -> Vec<SortAction> {
    let (folder, extra_flags): (&str, Vec<String>) = match record.category {
        Category::Spam => (policy.spam_folder, vec![SEEN.to_string()]),
        Category::Phishing => (policy.quarantine_folder, vec![SEEN.to_string()]),
        Category::Fyi => (policy.source_folder, Vec::new()),
        Category::Actionable if record.priority <= 2 => {
            (policy.source_folder, vec![FLAGGED.to_string()])
        }
        Category::Actionable => (policy.source_folder, Vec::new()),
    };

    uids.iter()
        .map(|&uid| SortAction {
            uid,
            folder: folder.to_string(),
            priority: record.priority,
            extra_flags: extra_flags.clone(),
        })
        .collect()
}

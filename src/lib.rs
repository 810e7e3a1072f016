//! Inbox Sentinel — local-first email triage.
//!
//! Fetches a date window from an IMAP mailbox, groups the messages
//! into conversation threads, asks a local language model for a
//! structured decision per thread, writes a priority report, drafts
//! replies where one is owed, and files the mail accordingly.

pub mod analysis;
pub mod config;
pub mod drafts;
pub mod error;
pub mod mailbox;
pub mod oracle;
pub mod pipeline;
pub mod report;
pub mod threading;
pub mod triage;

pub use analysis::{Analyzer, Category, DecisionRecord};
pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::{RunSummary, run};

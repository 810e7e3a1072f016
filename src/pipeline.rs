//! One triage run, end to end.
//!
//! Ordered passes:
//! 1. Fetch the date window          (blocking, own connection)
//! 2. Group messages into threads    (pure)
//! 3. Analyze every thread           (oracle, sequential)
//! 4. Generate reply drafts          (oracle, sequential)
//! 5. Write and sort the report      (filesystem)
//! 6. Save drafts                    (blocking, own connection)
//! 7. Apply triage actions           (blocking, own connection)
//!
//! The oracle passes can run for a long time on a big window; holding
//! one IMAP session across them would trip server idle timeouts, so
//! every mailbox pass opens its own connection via the `connect`
//! factory. Keeping all analysis calls adjacent, then all draft calls,
//! also keeps prompt prefixes identical between consecutive requests.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Days, Local, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::prompt::DEFAULT_ANALYSIS_PROMPT;
use crate::analysis::{AnalysisStatus, Analyzer};
use crate::config::Config;
use crate::drafts::{
    DEFAULT_DRAFT_PROMPT, DraftSaveStats, DraftStats, DraftWriter, PreparedDraft, load_signature,
    save_drafts,
};
use crate::error::{Error, MailboxError, ReportError};
use crate::mailbox::fetch::fetch_window;
use crate::mailbox::{MailStore, SortOutcome, safe_sort};
use crate::oracle::Oracle;
use crate::report::{assemble_report, render_record, sort_report_by_priority, write_report};
use crate::threading::group_into_threads;
use crate::triage::{TriagePolicy, plan_actions};

/// Everything a run produced, for the final log lines and exit code.
#[derive(Debug)]
pub struct RunSummary {
    pub fetched: usize,
    pub threads: usize,
    pub ok: usize,
    pub repaired: usize,
    pub fallback: usize,
    pub drafts: DraftStats,
    pub draft_saves: Option<DraftSaveStats>,
    pub sort: Option<SortOutcome>,
    pub report_path: PathBuf,
    pub sorted_path: PathBuf,
}

/// Run the whole pipeline once.
///
/// `connect` opens a fresh mailbox session; it is called once per
/// mailbox pass. Only fetch/report failures abort the run. Draft
/// saving and triage record their failures in the summary instead,
/// since by then the report already exists.
pub async fn run<S, F>(
    config: &Config,
    oracle: Arc<dyn Oracle>,
    connect: F,
) -> Result<RunSummary, Error>
where
    S: MailStore + Send + 'static,
    F: Fn() -> Result<S, MailboxError> + Send + Sync + Clone + 'static,
{
    std::fs::create_dir_all(&config.report_dir).map_err(ReportError::from)?;

    let today = Local::now().date_naive();
    let start_day = today - Days::new(u64::from(config.days_back));
    let range = format!("{start_day}_to_{today}");
    let report_path = config.report_dir.join(format!("report_{range}.txt"));
    let sorted_path = config.report_dir.join(format!("report-sorted_{range}.txt"));

    let trace = config
        .trace
        .then(|| TraceWriter::new(&config.report_dir, &range));
    if let Some(trace) = &trace {
        trace.write(serde_json::json!({
            "run_start": Utc::now().to_rfc3339(),
            "model": config.oracle_model,
            "endpoint": config.oracle_url,
        }));
    }

    // Pass 1: fetch.
    let messages = {
        let connect = connect.clone();
        let folder = config.mailbox.clone();
        let days_back = config.days_back;
        let use_sentdate = config.use_sentdate;
        let own = config.skip_own_sent.then(|| config.identity_addr.clone());
        tokio::task::spawn_blocking(move || {
            let mut store = connect()?;
            fetch_window(&mut store, &folder, days_back, use_sentdate, own.as_deref())
        })
        .await
        .map_err(blocking_failure)??
    };
    let fetched = messages.len();

    // Pass 2: threads.
    let threads = group_into_threads(messages);
    info!(fetched, threads = threads.len(), "messages grouped");

    // Pass 3: analysis.
    let analyzer = Analyzer::new(
        Arc::clone(&oracle),
        load_prompt(config.prompt_file.as_deref(), DEFAULT_ANALYSIS_PROMPT),
        config.identity_name.clone(),
        config.identity_addr.clone(),
        config.roles.clone(),
    );
    let mut records = Vec::with_capacity(threads.len());
    let (mut ok, mut repaired, mut fallback) = (0usize, 0usize, 0usize);
    for (idx, thread) in threads.iter().enumerate() {
        let record = analyzer.analyze_thread(thread, None).await;
        match record.status {
            AnalysisStatus::Ok => ok += 1,
            AnalysisStatus::Repaired => repaired += 1,
            AnalysisStatus::Fallback => fallback += 1,
        }
        if let Some(trace) = &trace {
            trace.write(serde_json::json!({
                "ts": Utc::now().to_rfc3339(),
                "idx": idx + 1,
                "thread_size": thread.len(),
                "uids": thread.messages.iter().map(|m| m.uid).collect::<Vec<_>>(),
                "subject": thread.newest().map(|m| m.subject.as_str()).unwrap_or(""),
                "status": record.status.as_str(),
                "category": record.category.as_str(),
                "priority": record.priority,
            }));
        }
        records.push(record);
    }
    info!(ok, repaired, fallback, "analysis complete");

    // Pass 4: drafts.
    let mut draft_status: Vec<Option<&str>> = vec![None; threads.len()];
    let mut draft_stats = DraftStats::default();
    let mut prepared: Vec<PreparedDraft> = Vec::new();
    if config.auto_draft {
        let writer = DraftWriter::new(
            Arc::clone(&oracle),
            load_prompt(config.draft_prompt_file.as_deref(), DEFAULT_DRAFT_PROMPT),
            config.identity_name.clone(),
            config.identity_addr.clone(),
            config.roles.clone(),
            load_signature(config.signature_file.as_deref()),
        );
        for (idx, (thread, record)) in threads.iter().zip(&records).enumerate() {
            if !writer.wants_draft(record, thread) {
                draft_stats.skipped += 1;
                continue;
            }
            match writer.generate(thread, record, None).await {
                Ok(text) => match writer.build_message(thread, &text) {
                    Ok(draft) => {
                        draft_stats.generated += 1;
                        draft_status[idx] = Some("created");
                        prepared.push(draft);
                    }
                    Err(e) => {
                        draft_stats.failed += 1;
                        warn!(subject = %record.subject, error = %e, "draft assembly failed");
                    }
                },
                Err(e) => {
                    draft_stats.failed += 1;
                    warn!(subject = %record.subject, error = %e, "draft generation failed");
                }
            }
        }
        info!(
            generated = draft_stats.generated,
            skipped = draft_stats.skipped,
            failed = draft_stats.failed,
            "draft pass complete"
        );
    }

    // Pass 5: report.
    let blocks: Vec<String> = records
        .iter()
        .enumerate()
        .map(|(idx, record)| render_record(record, &config.identity_name, draft_status[idx]))
        .collect();
    write_report(&report_path, &assemble_report(&blocks))?;
    sort_report_by_priority(&report_path, &sorted_path)?;
    info!(report = %sorted_path.display(), "report written");

    // Pass 6: save drafts.
    let draft_saves = if prepared.is_empty() {
        None
    } else {
        let connect = connect.clone();
        let folder = config.drafts_folder.clone();
        let stats = tokio::task::spawn_blocking(move || match connect() {
            Ok(mut store) => save_drafts(&mut store, &folder, &prepared),
            Err(e) => DraftSaveStats {
                saved: 0,
                failed: prepared.len(),
                errors: vec![format!("connect: {e}")],
            },
        })
        .await
        .map_err(blocking_failure)?;
        info!(saved = stats.saved, failed = stats.failed, "draft save complete");
        Some(stats)
    };

    // Pass 7: triage.
    let sort = if config.auto_triage && !records.is_empty() {
        let policy = TriagePolicy::from(config);
        let mut actions = Vec::new();
        for (thread, record) in threads.iter().zip(&records) {
            let uids: Vec<u32> = thread.messages.iter().map(|m| m.uid).collect();
            actions.extend(plan_actions(record, &uids, &policy));
        }
        let connect = connect.clone();
        let mailbox = config.mailbox.clone();
        let total = actions.len();
        let outcome = tokio::task::spawn_blocking(move || {
            let mut store = match connect() {
                Ok(store) => store,
                Err(e) => {
                    return SortOutcome {
                        failed: total,
                        errors: vec![format!("connect: {e}")],
                        ..SortOutcome::default()
                    };
                }
            };
            match safe_sort(&mut store, &mailbox, &actions) {
                Ok(outcome) => outcome,
                Err(e) => SortOutcome {
                    failed: total,
                    errors: vec![e.to_string()],
                    ..SortOutcome::default()
                },
            }
        })
        .await
        .map_err(blocking_failure)?;
        info!(
            processed = outcome.processed,
            skipped = outcome.skipped,
            failed = outcome.failed,
            "triage complete"
        );
        Some(outcome)
    } else {
        None
    };

    Ok(RunSummary {
        fetched,
        threads: threads.len(),
        ok,
        repaired,
        fallback,
        drafts: draft_stats,
        draft_saves,
        sort,
        report_path,
        sorted_path,
    })
}

fn blocking_failure(e: tokio::task::JoinError) -> Error {
    Error::Mailbox(MailboxError::Protocol(format!("blocking task failed: {e}")))
}

/// Read a prompt template file, falling back to the embedded default
/// when the file is missing, unreadable, or blank.
fn load_prompt(path: Option<&Path>, fallback: &str) -> String {
    let Some(path) = path else {
        return fallback.to_string();
    };
    match std::fs::read_to_string(path) {
        Ok(s) if !s.trim().is_empty() => s,
        Ok(_) => {
            warn!(path = %path.display(), "prompt file is empty, using embedded default");
            fallback.to_string()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "prompt file unreadable, using embedded default");
            fallback.to_string()
        }
    }
}

/// Appends one JSON object per line; every entry carries the run id so
/// traces from overlapping runs stay distinguishable.
struct TraceWriter {
    path: PathBuf,
    run_id: String,
}

impl TraceWriter {
    fn new(dir: &Path, range: &str) -> Self {
        TraceWriter {
            path: dir.join(format!("trace_{range}.jsonl")),
            run_id: Uuid::new_v4().to_string(),
        }
    }

    fn write(&self, mut value: serde_json::Value) {
        if let Some(map) = value.as_object_mut() {
            map.insert(
                "run_id".to_string(),
                serde_json::Value::String(self.run_id.clone()),
            );
        }
        let line = match serde_json::to_string(&value) {
            Ok(line) => line,
            Err(e) => {
                debug!(error = %e, "trace entry not serializable");
                return;
            }
        };
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = written {
            debug!(path = %self.path.display(), error = %e, "trace write failed");
        }
    }
}

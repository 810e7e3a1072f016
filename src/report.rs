//! Plain-text report rendering and priority sorting.
//!
//! One block per thread, one label per line, blocks joined by a
//! separator. The sorted variant of a report is produced by re-reading
//! the file, so sorting works on any report regardless of which run
//! wrote it.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::analysis::DecisionRecord;
use crate::error::ReportError;

// Not a plain dashes line: email content (signatures, forwarding
// markers) must never accidentally contain the separator.
pub const BLOCK_SEPARATOR: &str = "====== BLOCK_SEP ======";

/// Render one record as a canonical block, one label per line.
///
/// Optional lines (thread size, draft status, excerpt) appear only
/// when they carry information; the parser accepts blocks with or
/// without them.
pub fn render_record(
    record: &DecisionRecord,
    person: &str,
    draft_status: Option<&str>,
) -> String {
    let mut block = format!(
        "Subject: {}\n\
         Sender: {}\n\
         Context: {}\n\
         Addressing: {}\n\
         Asked-Directly: {}\n\
         Priority: {}\n\
         LLM-Status: {}\n\
         Actions for {}: {}\n\
         Summary: {}\n",
        record.subject,
        record.sender,
        record.context,
        record.addressing.as_str(),
        record.asked.as_str(),
        record.priority,
        record.status.as_str(),
        person,
        record.actions,
        record.summary,
    );
    if record.thread_size > 1 {
        block.push_str(&format!("Thread-Size: {}\n", record.thread_size));
    }
    if let Some(status) = draft_status {
        block.push_str(&format!("Draft-Status: {status}\n"));
    }
    if let Some(excerpt) = &record.excerpt {
        block.push_str(&format!("Raw-Excerpt: {excerpt}\n"));
    }
    block
}

/// Join rendered blocks into one report text.
pub fn assemble_report(blocks: &[String]) -> String {
    let mut out = String::new();
    for block in blocks {
        out.push_str(block.trim_end());
        out.push('\n');
        out.push_str(BLOCK_SEPARATOR);
        out.push('\n');
    }
    out
}

static FIRST_DIGIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d").unwrap());

/// Tolerant priority extraction from a block.
///
/// Scans for a line mentioning "Priority" (or the German label) and
/// takes its first digit; digits outside 1..=5 keep the scan going.
/// Blocks without a usable priority sort last.
pub fn extract_priority(text: &str) -> u8 {
    for line in text.lines() {
        if (line.contains("Priority") || line.contains("Priorität"))
            && let Some(m) = FIRST_DIGIT.find(line)
        {
            let value = m.as_str().parse::<u8>().unwrap_or(0);
            if (1..=5).contains(&value) {
                return value;
            }
        }
    }
    5
}

/// Sort a written report by ascending priority into a second file.
///
/// Blocks with equal priority keep their original order. Each output
/// block is numbered so readers can refer to "Item 3"; the parser
/// skips those lines on re-parse.
pub fn sort_report_by_priority(input: &Path, output: &Path) -> Result<(), ReportError> {
    let content = fs::read_to_string(input)?;

    let mut blocks: Vec<(String, u8)> = content
        .split(BLOCK_SEPARATOR)
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(|b| (b.to_string(), extract_priority(b)))
        .collect();
    blocks.sort_by_key(|(_, priority)| *priority);

    let mut out = String::new();
    for (index, (block, _)) in blocks.iter().enumerate() {
        out.push_str(&format!(
            "Item: {}\n{}\n{}\n",
            index + 1,
            block,
            BLOCK_SEPARATOR
        ));
    }
    write_report(output, &out)
}

/// Write a report file readable only by its owner; reports contain
/// full email content.
pub fn write_report(path: &Path, text: &str) -> Result<(), ReportError> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(|e| ReportError::WriteFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    file.write_all(text.as_bytes())
        .map_err(|e| ReportError::WriteFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::parser::parse_block;
    use crate::analysis::{Addressing, AnalysisStatus, Asked, Category};

    fn record() -> DecisionRecord {
        DecisionRecord {
            subject: "Budget".into(),
            sender: "Bob <bob@x.org>".into(),
            category: Category::Actionable,
            context: "Q3 planning".into(),
            addressing: Addressing::Direct,
            asked: Asked::Yes,
            priority: 2,
            status: AnalysisStatus::Ok,
            actions: "send numbers".into(),
            summary: "Bob needs numbers.".into(),
            thread_size: 1,
            excerpt: None,
        }
    }

    #[test]
    fn renders_one_label_per_line_in_fixed_order() {
        let block = render_record(&record(), "Alice", None);
        let expected = "\
Subject: Budget
Sender: Bob <bob@x.org>
Context: Q3 planning
Addressing: DIRECT
Asked-Directly: YES
Priority: 2
LLM-Status: OK
Actions for Alice: send numbers
Summary: Bob needs numbers.
";
        assert_eq!(block, expected);
    }

    #[test]
    fn optional_lines_render_only_when_set() {
        let mut r = record();
        r.thread_size = 3;
        r.excerpt = Some("short excerpt".into());
        let block = render_record(&r, "Alice", Some("created"));
        assert!(block.contains("Thread-Size: 3\n"));
        assert!(block.contains("Draft-Status: created\n"));
        assert!(block.ends_with("Raw-Excerpt: short excerpt\n"));

        let plain = render_record(&record(), "Alice", None);
        assert!(!plain.contains("Thread-Size"));
        assert!(!plain.contains("Draft-Status"));
        assert!(!plain.contains("Raw-Excerpt"));
    }

    #[test]
    fn canonical_blocks_survive_a_parse_round_trip() {
        let mut r = record();
        r.thread_size = 2;
        r.excerpt = Some("the excerpt".into());
        let parsed = parse_block(&render_record(&r, "Alice", None));
        assert_eq!(parsed.subject, "Budget");
        assert_eq!(parsed.sender, "Bob <bob@x.org>");
        assert_eq!(parsed.addressing, "DIRECT");
        assert_eq!(parsed.priority, Some(2));
        assert_eq!(parsed.status, "OK");
        assert_eq!(parsed.actions, "send numbers");
        assert_eq!(parsed.summary, "Bob needs numbers.");
        assert_eq!(parsed.thread_size, 2);
        assert_eq!(parsed.raw_excerpt, "the excerpt");
    }

    #[test]
    fn extract_priority_scans_lines_tolerantly() {
        assert_eq!(extract_priority("Priority: 3"), 3);
        assert_eq!(extract_priority("some prose\nPriorität: 1 (hoch)"), 1);
        // Out-of-range digit on one line, usable value further down.
        assert_eq!(extract_priority("Priority: 9\nPriority: 4"), 4);
        // No priority at all sorts last.
        assert_eq!(extract_priority("Subject: x"), 5);
        assert_eq!(extract_priority("Priority: soon"), 5);
    }

    #[test]
    fn sorting_is_stable_and_numbers_items() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("report.txt");
        let output = dir.path().join("report-sorted.txt");

        let blocks = vec![
            "Subject: first-p3\nPriority: 3\nSummary: a".to_string(),
            "Subject: the-p1\nPriority: 1\nSummary: b".to_string(),
            "Subject: second-p3\nPriority: 3\nSummary: c".to_string(),
        ];
        write_report(&input, &assemble_report(&blocks)).unwrap();
        sort_report_by_priority(&input, &output).unwrap();

        let sorted = std::fs::read_to_string(&output).unwrap();
        let p1 = sorted.find("the-p1").unwrap();
        let first3 = sorted.find("first-p3").unwrap();
        let second3 = sorted.find("second-p3").unwrap();
        assert!(p1 < first3 && first3 < second3);
        assert!(sorted.contains("Item: 1\nSubject: the-p1"));
        assert!(sorted.contains("Item: 3\nSubject: second-p3"));
    }

    #[cfg(unix)]
    #[test]
    fn report_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        write_report(&path, "content").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

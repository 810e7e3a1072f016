//! Prompt assembly for the analysis and repair calls.
//!
//! The default analysis template ships embedded so the tool runs
//! without any prompt file; a custom template can replace it via
//! configuration. `{person}` is substituted everywhere.

/// Built-in analysis template. Instructs the model to answer with one
/// marked block in the exact label format the parser expects.
pub const DEFAULT_ANALYSIS_PROMPT: &str = r#"You are the email triage assistant for {person}. You read one email or one email thread and produce a triage block for the daily report.

Reply with ONLY the block between <<BEGIN>> and <<END>>. No greeting, no explanation, no markdown fences.

<<BEGIN>>
Subject: <subject of the newest message>
Sender: <name and address of the newest sender>
Category: SPAM | PHISHING | FYI | ACTIONABLE
Context: <one line on what is going on>
Addressing: DIRECT | CC | GROUP | LIST | UNKNOWN
Asked-Directly: YES | NO
Priority: 1 | 2 | 3 | 4 | 5
Actions for {person}: <concrete next steps, or "none">
Summary: <two to four sentences in plain language>
<<END>>

Guidance:
- SPAM is unsolicited bulk mail. PHISHING tries to obtain credentials, payments or personal data. FYI needs no reaction from {person}. Everything else is ACTIONABLE.
- Asked-Directly is YES only when {person} personally is asked a question or given a task.
- Priority 1 means act today, 2 this week, 3 normal, 4 low, 5 none. Newsletters and automated notifications are 4 or 5.
- The Summary names who wants what from whom. Write it so {person} can decide without opening the mail.
"#;

// Budgets for the repair call, counted in characters so multibyte
// text cannot split.
const REPAIR_EMAIL_LIMIT: usize = 12_000;
const REPAIR_TAIL_LIMIT: usize = 6_000;

/// Compose the first-attempt analysis prompt.
///
/// An optional sender profile goes in front (the model reads context
/// before instructions more reliably), a roles line follows the base
/// template, and the mail text is appended behind a separator.
pub fn analysis_prompt(
    base: &str,
    person: &str,
    roles: &str,
    sender_context: Option<&str>,
    email_text: &str,
) -> String {
    let mut prompt = String::new();
    if let Some(ctx) = sender_context
        && !ctx.trim().is_empty()
    {
        prompt.push_str(ctx.trim_end());
        prompt.push_str("\n\n");
    }
    prompt.push_str(&base.replace("{person}", person));
    if !roles.trim().is_empty() {
        prompt.push_str("\nRoles and responsibilities: ");
        prompt.push_str(roles.trim());
        prompt.push('\n');
    }
    prompt.push_str("\n--- EMAIL START ---\n");
    prompt.push_str(email_text);
    prompt
}

/// Compose the strict reformat prompt for the repair attempt.
///
/// The mail is truncated and only the tail of the broken output is
/// included; the interesting part of a rambling response is its end.
pub fn repair_prompt(person: &str, email_text: &str, broken_output: &str) -> String {
    format!(
        "You are a strict formatter. Reply ONLY with the block between <<BEGIN>> and <<END>>.\n\
         No explanations, no markdown, no extra lines.\n\n\
         Format (every label must appear exactly once):\n\
         <<BEGIN>>\n\
         Subject: ...\n\
         Sender: ...\n\
         Context: ...\n\
         Addressing: DIRECT | CC | GROUP | LIST | UNKNOWN\n\
         Asked-Directly: YES | NO\n\
         Priority: 1 | 2 | 3 | 4 | 5\n\
         Actions for {person}: ...\n\
         Summary: ...\n\
         <<END>>\n\n\
         DEFAULTS when unclear: Addressing=UNKNOWN, Asked-Directly=NO, Priority=5, \
         Actions=none, Summary=Unclear. Please review the original message.\n\n\
         Email (including history as context):\n\
         -----\n\
         {email}\n\
         -----\n\n\
         Model output to repair:\n\
         -----\n\
         {broken}\n\
         -----\n",
        person = person,
        email = truncate_chars(email_text, REPAIR_EMAIL_LIMIT),
        broken = tail_chars(broken_output, REPAIR_TAIL_LIMIT),
    )
}

/// First `limit` characters of `text`.
pub(crate) fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Last `limit` characters of `text`.
pub(crate) fn tail_chars(text: &str, limit: usize) -> &str {
    let total = text.chars().count();
    if total <= limit {
        return text;
    }
    match text.char_indices().nth(total - limit) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

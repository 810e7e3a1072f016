//! Raw tagged-command IMAP session over TLS.
//!
//! Deliberately thin: one struct owning the TLS stream, one method per
//! protocol command, no connection pooling. Responses are read
//! line-wise with RFC 3501 literal handling, so message bodies arrive
//! byte-exact. All calls block; callers run them off the async runtime.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::MailboxError;
use crate::mailbox::{FetchedMail, MailStore, SelectInfo};

const READ_TIMEOUT: Duration = Duration::from_secs(30);

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// One response line; carries the literal payload when the server sent
/// the line with a `{n}` continuation.
#[derive(Debug)]
struct ResponseLine {
    text: String,
    literal: Option<Vec<u8>>,
}

pub struct ImapSession {
    stream: TlsStream,
    tag_counter: u32,
    selected: Option<String>,
}

impl ImapSession {
    /// Connect and read the server greeting. No authentication yet.
    pub fn connect(host: &str, port: u16) -> Result<Self, MailboxError> {
        let tcp = TcpStream::connect((host, port)).map_err(|e| MailboxError::Connect {
            host: host.to_string(),
            port,
            reason: e.to_string(),
        })?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|e| MailboxError::Tls(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| MailboxError::Tls(e.to_string()))?;
        let mut session = ImapSession {
            stream: rustls::StreamOwned::new(conn, tcp),
            tag_counter: 0,
            selected: None,
        };

        let greeting = session.read_line()?;
        if greeting.starts_with("* BYE") {
            return Err(MailboxError::Connect {
                host: host.to_string(),
                port,
                reason: greeting,
            });
        }
        debug!(greeting = %greeting, "connected");
        Ok(session)
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<(), MailboxError> {
        let lines = self.command(&format!("LOGIN {} {}", quote(username), quote(password)))?;
        if !response_ok(&lines) {
            return Err(MailboxError::AuthFailed {
                user: username.to_string(),
            });
        }
        debug!(user = username, "logged in");
        Ok(())
    }

    // ── wire primitives ─────────────────────────────────────────

    /// Read one CRLF-terminated line, without the terminator.
    fn read_line(&mut self) -> Result<String, MailboxError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.stream.read(&mut byte) {
                Ok(0) => {
                    return Err(MailboxError::Protocol("connection closed".to_string()));
                }
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        buf.truncate(buf.len() - 2);
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read one logical response line, consuming any `{n}` literals.
    /// The first literal is kept (a FETCH carries at most one we care
    /// about); later ones are drained to keep the stream in sync.
    fn read_response_line(&mut self) -> Result<ResponseLine, MailboxError> {
        let mut text = self.read_line()?;
        let mut literal: Option<Vec<u8>> = None;
        while let Some(len) = literal_len(&text) {
            let mut buf = vec![0u8; len];
            self.stream.read_exact(&mut buf)?;
            if literal.is_none() {
                literal = Some(buf);
            }
            let continuation = self.read_line()?;
            text.push(' ');
            text.push_str(&continuation);
        }
        Ok(ResponseLine { text, literal })
    }

    fn next_tag(&mut self) -> String {
        self.tag_counter += 1;
        format!("A{}", self.tag_counter)
    }

    /// Send one command and collect every line up to the tagged reply.
    fn command(&mut self, cmd: &str) -> Result<Vec<ResponseLine>, MailboxError> {
        let tag = self.next_tag();
        self.stream
            .write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        self.stream.flush()?;
        self.read_until_tag(&tag)
    }

    fn read_until_tag(&mut self, tag: &str) -> Result<Vec<ResponseLine>, MailboxError> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_response_line()?;
            let done = is_tagged(&line.text, tag);
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    fn checked(&mut self, name: &str, cmd: &str) -> Result<Vec<ResponseLine>, MailboxError> {
        let lines = self.command(cmd)?;
        if !response_ok(&lines) {
            return Err(MailboxError::CommandRejected {
                command: name.to_string(),
                reason: lines.last().map(|l| l.text.clone()).unwrap_or_default(),
            });
        }
        Ok(lines)
    }

    fn require_selected(&self) -> Result<&str, MailboxError> {
        self.selected
            .as_deref()
            .ok_or_else(|| MailboxError::Protocol("no folder selected".to_string()))
    }
}

impl MailStore for ImapSession {
    fn capabilities(&mut self) -> Result<Vec<String>, MailboxError> {
        let lines = self.checked("CAPABILITY", "CAPABILITY")?;
        Ok(parse_capabilities(&lines))
    }

    fn select(&mut self, folder: &str, read_only: bool) -> Result<SelectInfo, MailboxError> {
        let verb = if read_only { "EXAMINE" } else { "SELECT" };
        let lines = self.checked(verb, &format!("{verb} {}", quote(folder)))?;
        self.selected = Some(folder.to_string());
        Ok(parse_select(&lines, read_only))
    }

    fn search(&mut self, query: &str) -> Result<Vec<u32>, MailboxError> {
        self.require_selected()?;
        let lines = self.checked("UID SEARCH", &format!("UID SEARCH {query}"))?;
        Ok(parse_search(&lines))
    }

    fn fetch(&mut self, uid: u32) -> Result<FetchedMail, MailboxError> {
        let folder = self.require_selected()?.to_string();
        let lines = self.checked(
            "UID FETCH",
            &format!("UID FETCH {uid} (BODY.PEEK[] INTERNALDATE FLAGS)"),
        )?;
        parse_fetch(&lines).ok_or(MailboxError::NotFound { uid, folder })
    }

    fn append(
        &mut self,
        folder: &str,
        flags: &[String],
        internal_date: Option<&str>,
        raw: &[u8],
    ) -> Result<(), MailboxError> {
        let tag = self.next_tag();
        let date_part = internal_date
            .map(|d| format!(" \"{d}\""))
            .unwrap_or_default();
        let cmd = format!(
            "{tag} APPEND {} ({}){} {{{}}}\r\n",
            quote(folder),
            flags.join(" "),
            date_part,
            raw.len()
        );
        self.stream.write_all(cmd.as_bytes())?;
        self.stream.flush()?;

        // Wait for the continuation request; the server may interleave
        // untagged lines, or reject the append outright.
        loop {
            let line = self.read_line()?;
            if line.starts_with('+') {
                break;
            }
            if is_tagged(&line, &tag) {
                return Err(MailboxError::CommandRejected {
                    command: "APPEND".to_string(),
                    reason: line,
                });
            }
        }

        self.stream.write_all(raw)?;
        self.stream.write_all(b"\r\n")?;
        self.stream.flush()?;

        let lines = self.read_until_tag(&tag)?;
        if !response_ok(&lines) {
            return Err(MailboxError::CommandRejected {
                command: "APPEND".to_string(),
                reason: lines.last().map(|l| l.text.clone()).unwrap_or_default(),
            });
        }
        Ok(())
    }

    fn add_flags(&mut self, uid: u32, flags: &[String]) -> Result<(), MailboxError> {
        self.require_selected()?;
        self.checked(
            "UID STORE",
            &format!("UID STORE {uid} +FLAGS ({})", flags.join(" ")),
        )?;
        Ok(())
    }

    fn create_folder(&mut self, folder: &str) -> Result<(), MailboxError> {
        self.checked("CREATE", &format!("CREATE {}", quote(folder)))?;
        Ok(())
    }

    fn subscribe_folder(&mut self, folder: &str) -> Result<(), MailboxError> {
        self.checked("SUBSCRIBE", &format!("SUBSCRIBE {}", quote(folder)))?;
        Ok(())
    }

    fn uid_expunge(&mut self, uids: &[u32]) -> Result<(), MailboxError> {
        if uids.is_empty() {
            return Ok(());
        }
        self.require_selected()?;
        let set = uids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        self.checked("UID EXPUNGE", &format!("UID EXPUNGE {set}"))?;
        Ok(())
    }

    fn list_folders(&mut self) -> Result<Vec<String>, MailboxError> {
        let lines = self.checked("LIST", r#"LIST "" "*""#)?;
        Ok(lines
            .iter()
            .filter(|l| l.text.starts_with("* LIST"))
            .map(|l| l.text.clone())
            .collect())
    }
}

impl Drop for ImapSession {
    fn drop(&mut self) {
        // Best effort; the server closes the connection either way.
        if let Err(e) = self.command("LOGOUT") {
            debug!(error = %e, "logout failed");
        }
    }
}

// ── response parsing ────────────────────────────────────────────

static LITERAL_LEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{(\d+)\}$").unwrap());
static FLAGS_LIST: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"FLAGS \(([^)]*)\)").unwrap());
static INTERNAL_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"INTERNALDATE "([^"]+)""#).unwrap());
static PERMANENT_FLAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[PERMANENTFLAGS \(([^)]*)\)\]").unwrap());

/// Quote a string for IMAP (astring with escapes).
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', r"\\").replace('"', "\\\""))
}

fn literal_len(text: &str) -> Option<usize> {
    LITERAL_LEN
        .captures(text)
        .and_then(|c| c[1].parse::<usize>().ok())
}

fn is_tagged(line: &str, tag: &str) -> bool {
    line.strip_prefix(tag)
        .is_some_and(|rest| rest.starts_with(' '))
}

/// The tagged reply (last line) starts with `OK` after the tag.
fn response_ok(lines: &[ResponseLine]) -> bool {
    lines
        .last()
        .and_then(|l| l.text.split_once(' '))
        .is_some_and(|(_, rest)| rest.starts_with("OK"))
}

fn parse_capabilities(lines: &[ResponseLine]) -> Vec<String> {
    for line in lines {
        if let Some(rest) = line.text.strip_prefix("* CAPABILITY ") {
            return rest
                .split_whitespace()
                .map(str::to_uppercase)
                .collect();
        }
    }
    Vec::new()
}

fn parse_search(lines: &[ResponseLine]) -> Vec<u32> {
    let mut uids: Vec<u32> = lines
        .iter()
        .filter_map(|l| l.text.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace())
        .filter_map(|tok| tok.parse::<u32>().ok())
        .collect();
    uids.sort_unstable();
    uids
}

fn parse_select(lines: &[ResponseLine], read_only: bool) -> SelectInfo {
    let mut info = SelectInfo {
        read_only,
        ..SelectInfo::default()
    };
    for line in lines {
        let text = &line.text;
        if let Some(rest) = text.strip_prefix("* ")
            && let Some(count) = rest.strip_suffix(" EXISTS")
            && let Ok(n) = count.trim().parse::<u32>()
        {
            info.exists = n;
        }
        if let Some(caps) = PERMANENT_FLAGS.captures(text) {
            info.permanent_flags = caps[1].split_whitespace().map(str::to_string).collect();
        }
    }
    info
}

/// Pull raw bytes, flags and internal date out of a FETCH response.
/// `\Recent` and `\Deleted` are dropped from the extracted flags; the
/// first never survives a copy and the second must not.
fn parse_fetch(lines: &[ResponseLine]) -> Option<FetchedMail> {
    let line = lines
        .iter()
        .find(|l| l.literal.is_some() && l.text.contains(" FETCH "))?;
    let flags = FLAGS_LIST
        .captures(&line.text)
        .map(|caps| {
            caps[1]
                .split_whitespace()
                .filter(|f| {
                    !f.eq_ignore_ascii_case(r"\Recent") && !f.eq_ignore_ascii_case(r"\Deleted")
                })
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let internal_date = INTERNAL_DATE
        .captures(&line.text)
        .map(|caps| caps[1].to_string());
    if internal_date.is_none() {
        warn!("fetch response carried no internal date");
    }
    Some(FetchedMail {
        raw: line.literal.clone()?,
        internal_date,
        flags,
    })
}

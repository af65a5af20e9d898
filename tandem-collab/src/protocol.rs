//! Textual wire protocol for the sync stream.
//!
//! Every message is one newline-terminated UTF-8 line with `:`-separated
//! fields; textual payloads are escaped so they cannot contain the line or
//! field separators:
//!
//! ```text
//! client → server   new:<display-name>
//!                   s:<seq>:<parent_seq>:<parent_author>:<i|d>:<idx>:<arg>
//! server → client   <author_id>:<secret>:<seqno>:<encoded_text>   (once)
//!                   x:<seq>:<i|d>:<idx>:<arg>
//!                   a:<seq>
//! ```
//!
//! `<arg>` is escaped text for inserts and a decimal byte count for
//! deletes. The escape set covers `\`, the C control names, NUL, and a
//! two-digit lowercase hex form for every other byte below 0x20 plus 0x7f;
//! all other bytes pass through verbatim.

use tandem_core::Op;
use thiserror::Error;

/// Author id reserved for the server itself. Negotiation never assigns it
/// to a client.
pub const SERVER_AUTHOR: u64 = 0;

/// Failures while encoding or decoding wire data. All of these are fatal
/// for the line that produced them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("bad escape `\\{0}`")]
    BadEscape(char),
    #[error("bad hex in `\\x` escape")]
    BadHex,
    #[error("truncated escape at end of field")]
    TruncatedEscape,
    #[error("escaped text is not valid utf-8")]
    BadUtf8,
    #[error("not enough fields: wanted {wanted}, got {got}")]
    NotEnoughFields { wanted: usize, got: usize },
    #[error("bad number field `{0}`")]
    BadNumber(String),
    #[error("unknown message tag `{0}`")]
    UnknownMessage(String),
    #[error("unknown operation type `{0}`")]
    UnknownOpType(String),
    #[error("insert with empty text")]
    EmptyInsert,
    #[error("delete of zero bytes")]
    EmptyDelete,
    #[error("server assigned the reserved author id 0")]
    ReservedAuthor,
}

// ── escape codec ───────────────────────────────────────────────────────

/// Escape `text` for use as a wire field.
pub fn encode_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\0' => out.push_str("\\0"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

fn hex_nibble(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Invert [`encode_text`]. Runs a four-state machine: normal, after `\`,
/// and the two hex digits of `\xHH`.
pub fn decode_text(field: &str) -> Result<String, ProtocolError> {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        i += 1;
        if b != b'\\' {
            out.push(b);
            continue;
        }
        let esc = *bytes.get(i).ok_or(ProtocolError::TruncatedEscape)?;
        i += 1;
        match esc {
            b'\\' => out.push(b'\\'),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'b' => out.push(0x08),
            b'0' => out.push(0x00),
            b'x' => {
                let hi = *bytes.get(i).ok_or(ProtocolError::TruncatedEscape)?;
                let lo = *bytes.get(i + 1).ok_or(ProtocolError::TruncatedEscape)?;
                i += 2;
                let hi = hex_nibble(hi).ok_or(ProtocolError::BadHex)?;
                let lo = hex_nibble(lo).ok_or(ProtocolError::BadHex)?;
                out.push((hi << 4) | lo);
            }
            other => return Err(ProtocolError::BadEscape(other as char)),
        }
    }
    String::from_utf8(out).map_err(|_| ProtocolError::BadUtf8)
}

// ── field splitting ────────────────────────────────────────────────────

/// Split into exactly `n` fields on the first `n - 1` separators; the last
/// field keeps any remaining separators. Fails when fewer fields exist.
pub fn split(s: &str, sep: char, n: usize) -> Result<Vec<&str>, ProtocolError> {
    let fields: Vec<&str> = s.splitn(n, sep).collect();
    if fields.len() < n {
        return Err(ProtocolError::NotEnoughFields {
            wanted: n,
            got: fields.len(),
        });
    }
    Ok(fields)
}

/// Like [`split`] but returns whatever fields exist; with `n` of `None`,
/// splits on every separator.
pub fn split_soft(s: &str, sep: char, n: Option<usize>) -> Vec<&str> {
    match n {
        Some(n) => s.splitn(n, sep).collect(),
        None => s.split(sep).collect(),
    }
}

fn parse_u64(field: &str) -> Result<u64, ProtocolError> {
    field
        .parse()
        .map_err(|_| ProtocolError::BadNumber(field.to_string()))
}

// ── messages ───────────────────────────────────────────────────────────

/// A locally-authored edit on its way to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub seq: u64,
    pub parent_seq: u64,
    pub parent_author: u64,
    pub op: Op,
}

impl Submission {
    /// Wire form, newline included.
    pub fn encode(&self) -> String {
        let (typ, idx, arg) = encode_op(&self.op);
        format!(
            "s:{}:{}:{}:{}:{}:{}\n",
            self.seq, self.parent_seq, self.parent_author, typ, idx, arg
        )
    }
}

fn encode_op(op: &Op) -> (char, usize, String) {
    match op {
        Op::Insert { idx, text } => ('i', *idx, encode_text(text)),
        Op::Delete { idx, nchars, .. } => ('d', *idx, nchars.to_string()),
    }
}

fn decode_op(typ: &str, idx: &str, arg: &str) -> Result<Op, ProtocolError> {
    let idx = parse_u64(idx)? as usize;
    match typ {
        "i" => {
            let text = decode_text(arg)?;
            if text.is_empty() {
                return Err(ProtocolError::EmptyInsert);
            }
            Ok(Op::Insert { idx, text })
        }
        "d" => {
            let nchars = parse_u64(arg)? as usize;
            if nchars == 0 {
                return Err(ProtocolError::EmptyDelete);
            }
            Ok(Op::delete(idx, nchars))
        }
        other => Err(ProtocolError::UnknownOpType(other.to_string())),
    }
}

/// A framed message from the server during a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// An edit authored by another peer, already sequenced.
    External { seq: u64, op: Op },
    /// Our submission with this seq is now canonical.
    Accept { seq: u64 },
}

impl ServerMessage {
    /// Parse one framed line (without its newline).
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let fields = split(line, ':', 2)?;
        match fields[0] {
            "x" => {
                let f = split(fields[1], ':', 4)?;
                Ok(ServerMessage::External {
                    seq: parse_u64(f[0])?,
                    op: decode_op(f[1], f[2], f[3])?,
                })
            }
            "a" => Ok(ServerMessage::Accept {
                seq: parse_u64(fields[1])?,
            }),
            other => Err(ProtocolError::UnknownMessage(other.to_string())),
        }
    }
}

/// The server's negotiation response: identity, resume token, starting
/// sequence number, and the authoritative document snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionGrant {
    pub author_id: u64,
    /// Opaque resume token, stored and replayed verbatim.
    pub reconnect_secret: String,
    pub latest_seq: u64,
    pub text: String,
}

impl SessionGrant {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let f = split(line, ':', 4)?;
        let author_id = parse_u64(f[0])?;
        if author_id == SERVER_AUTHOR {
            return Err(ProtocolError::ReservedAuthor);
        }
        Ok(SessionGrant {
            author_id,
            reconnect_secret: f[1].to_string(),
            latest_seq: parse_u64(f[2])?,
            text: decode_text(f[3])?,
        })
    }
}

/// First line of a fresh session.
pub fn hello_new(display_name: &str) -> String {
    format!("new:{}\n", encode_text(display_name))
}

/// First line of a resumed session: the stored secret, verbatim.
pub fn hello_resume(secret: &str) -> String {
    format!("{secret}\n")
}

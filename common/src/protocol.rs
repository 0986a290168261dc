use std::io::ErrorKind;

/// Every protocol line ends with CR LF.
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Upper bound on unterminated bytes kept between feeds.
pub const MAX_PENDING: usize = 64 * 1024;

/// Command used for channel chat messages.
pub const CHAT_COMMAND: &str = "PRIVMSG";

/// Check if an I/O error means the peer went away (EOF, broken pipe, reset, aborted).
pub fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
    )
}

/// Check if an I/O error is a read timeout rather than a failure.
///
/// Platforms disagree on which kind a socket timeout reports, so both are accepted.
pub fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// Reassembles complete lines from an arbitrarily chunked byte stream.
///
/// Bytes are buffered until a terminator arrives, so a multi-byte UTF-8 character
/// split across two reads decodes correctly. Malformed sequences are replaced with
/// U+FFFD instead of failing. Empty lines are returned as-is; callers skip them.
///
/// A line longer than [`MAX_PENDING`] bytes is dropped whole, through its
/// terminator, however the stream is chunked. No fragment of it is ever returned.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
    discarded: usize,
    /// Inside an oversized line; drop bytes until the next terminator.
    skipping: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every line completed by them, terminators stripped.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = find_terminator(&self.buf[start..]) {
            let end = start + pos;
            if self.skipping || pos > MAX_PENDING {
                self.discarded += pos;
                self.skipping = false;
            } else {
                lines.push(String::from_utf8_lossy(&self.buf[start..end]).into_owned());
            }
            start = end + LINE_TERMINATOR.len();
        }

        // Keep a trailing CR: it may be the first half of a terminator.
        let keep = usize::from(self.buf.len() > start && self.buf.last() == Some(&b'\r'));
        let partial = self.buf.len() - start - keep;
        if self.skipping || partial > MAX_PENDING {
            self.discarded += partial;
            self.skipping = true;
            start += partial;
        }
        self.buf.drain(..start);

        lines
    }

    /// Bytes waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Return and reset the number of bytes dropped because a line exceeded [`MAX_PENDING`].
    pub fn take_discarded(&mut self) -> usize {
        std::mem::take(&mut self.discarded)
    }

    /// Forget any partial line (used when a connection is replaced).
    pub fn clear(&mut self) {
        self.buf.clear();
        self.discarded = 0;
        self.skipping = false;
    }
}

fn find_terminator(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(LINE_TERMINATOR.len())
        .position(|w| w == LINE_TERMINATOR)
}

/// Classification of one inbound protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Server keep-alive; must be answered with [`pong_line`].
    Ping,
    /// Channel chat message.
    Chat { sender: String, text: String },
    /// Anything else (numerics, JOIN echoes, notices, malformed lines).
    Other,
}

/// Classify a line received from the server. Never fails: anything unrecognised is `Other`.
pub fn classify(line: &str) -> Message {
    if line == "PING" || line.starts_with("PING ") {
        return Message::Ping;
    }
    parse_chat(line).unwrap_or(Message::Other)
}

/// `:<sender>!<rest> PRIVMSG #<channel> :<text>`
fn parse_chat(line: &str) -> Option<Message> {
    let rest = line.strip_prefix(':')?;
    let (prefix, rest) = rest.split_once(' ')?;
    let (sender, _) = prefix.split_once('!')?;
    if sender.is_empty() {
        return None;
    }

    let (command, rest) = rest.split_once(' ')?;
    if command != CHAT_COMMAND {
        return None;
    }

    let (channel, trailing) = rest.split_once(' ')?;
    if channel.len() < 2 || !channel.starts_with('#') {
        return None;
    }

    // Everything after the first colon is the body, further colons included.
    let text = trailing.strip_prefix(':')?;
    if text.is_empty() {
        return None;
    }

    Some(Message::Chat {
        sender: sender.to_string(),
        text: text.to_string(),
    })
}

/// Prefix required by the chat server for password tokens.
pub const TOKEN_PREFIX: &str = "oauth:";

/// Trim a token and add the `oauth:` prefix when it is missing.
pub fn normalize_token(token: &str) -> String {
    let token = token.trim();
    if token.is_empty() || token.starts_with(TOKEN_PREFIX) {
        token.to_string()
    } else {
        format!("{TOKEN_PREFIX}{token}")
    }
}

/// Channel names are joined lower-case and without the leading `#`.
pub fn normalize_channel(channel: &str) -> String {
    channel.trim().trim_start_matches('#').to_lowercase()
}

// --- Outbound lines (terminator appended by the transport) ---

pub fn pass_line(token: &str) -> String {
    format!("PASS {token}")
}

pub fn nick_line(nickname: &str) -> String {
    format!("NICK {nickname}")
}

pub fn join_line(channel: &str) -> String {
    format!("JOIN #{channel}")
}

pub fn pong_line(server_host: &str) -> String {
    format!("PONG :{server_host}")
}

/// Line breaks in `text` become spaces so one call can never emit two lines.
pub fn chat_line(channel: &str, text: &str) -> String {
    let text = text.replace(['\r', '\n'], " ");
    format!("{CHAT_COMMAND} #{channel} :{text}")
}

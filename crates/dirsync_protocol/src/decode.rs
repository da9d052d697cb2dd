//! Incremental decoders, fed one line at a time.
//!
//! Both decoders keep the stream aligned after an error: a bad record body
//! is skipped up to its blank terminator line, so the next message parses
//! cleanly.

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{Command, Keyword, PatchMessage, Reply, ServerMessage};
use crate::status::Status;
use dirsync_codec::{Action, CodecError, Record, RecordLimits, RecordReader};

enum Body<H> {
    Idle,
    Reading(H),
    Skipping,
}

enum Step {
    More,
    Done(Record),
}

struct Bodies<H> {
    limits: RecordLimits,
    reader: RecordReader,
    state: Body<H>,
}

impl<H> Bodies<H> {
    fn new(limits: RecordLimits) -> Self {
        Self {
            limits,
            reader: RecordReader::new(limits),
            state: Body::Idle,
        }
    }

    fn is_idle(&self) -> bool {
        matches!(self.state, Body::Idle)
    }

    /// Feeds a body line. On error the rest of the body is skipped.
    fn push(&mut self, line: &str) -> Result<Step, CodecError> {
        match self.reader.push_line(line) {
            Ok(Some(record)) => Ok(Step::Done(record)),
            Ok(None) => Ok(Step::More),
            Err(err) => {
                self.reader = RecordReader::new(self.limits);
                self.state = Body::Skipping;
                Err(err)
            }
        }
    }
}

fn strip_newline(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Splits off the first whitespace-delimited token.
fn next_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    Some((&s[..end], &s[end..]))
}

fn parse_number<T: std::str::FromStr>(token: &str, what: &str) -> ProtocolResult<T> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::malformed(format!("{what} {token:?} is not a number")));
    }
    token
        .parse()
        .map_err(|_| ProtocolError::malformed(format!("{what} {token:?} out of range")))
}

/// Optional leading sequence number, then the rest.
fn split_seq(line: &str) -> ProtocolResult<(Option<u64>, &str)> {
    match next_token(line) {
        Some((first, rest)) if first.bytes().all(|b| b.is_ascii_digit()) => {
            Ok((Some(parse_number(first, "sequence number")?), rest))
        }
        _ => Ok((None, line)),
    }
}

struct CommandHeader {
    seq: Option<u64>,
    keyword: Keyword,
    directory: String,
}

impl CommandHeader {
    fn into_command(self, record: Record) -> Command {
        let Self {
            seq,
            keyword,
            directory,
        } = self;
        if keyword == Keyword::Put {
            Command::Put {
                seq,
                directory,
                record,
            }
        } else {
            Command::Remove {
                seq,
                directory,
                record,
            }
        }
    }
}

enum Parsed {
    Complete(Command),
    Body(String),
}

/// Server-side decoder for client commands.
pub struct CommandDecoder {
    bodies: Bodies<CommandHeader>,
}

impl CommandDecoder {
    /// Creates a decoder enforcing `limits` on record bodies.
    #[must_use]
    pub fn new(limits: RecordLimits) -> Self {
        Self {
            bodies: Bodies::new(limits),
        }
    }

    /// Returns true when no command is partially decoded.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.bodies.is_idle()
    }

    /// Feeds one line; returns a command once it is complete.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] carrying the command's sequence number and
    /// keyword where they could be parsed. The decoder stays usable.
    pub fn push_line(&mut self, line: &str) -> ProtocolResult<Option<Command>> {
        let line = strip_newline(line);
        match std::mem::replace(&mut self.bodies.state, Body::Idle) {
            Body::Idle => self.header(line),
            Body::Skipping => {
                if !line.is_empty() {
                    self.bodies.state = Body::Skipping;
                }
                Ok(None)
            }
            Body::Reading(header) => match self.bodies.push(line) {
                Ok(Step::More) => {
                    self.bodies.state = Body::Reading(header);
                    Ok(None)
                }
                Ok(Step::Done(record)) => Ok(Some(header.into_command(record))),
                Err(source) => Err(ProtocolError::Codec {
                    seq: header.seq,
                    keyword: Some(header.keyword),
                    source,
                }),
            },
        }
    }

    /// Feeds one raw line. A line that is not UTF-8 is a bad request;
    /// inside a record body it also drops the rest of that body.
    ///
    /// # Errors
    ///
    /// As [`CommandDecoder::push_line`], plus `Malformed` for invalid UTF-8.
    pub fn push_bytes(&mut self, line: &[u8]) -> ProtocolResult<Option<Command>> {
        if let Ok(text) = std::str::from_utf8(line) {
            return self.push_line(text);
        }
        let (seq, keyword) = match std::mem::replace(&mut self.bodies.state, Body::Idle) {
            Body::Idle => (None, None),
            Body::Skipping => {
                self.bodies.state = Body::Skipping;
                return Ok(None);
            }
            Body::Reading(header) => {
                self.bodies.reader = RecordReader::new(self.bodies.limits);
                self.bodies.state = Body::Skipping;
                (header.seq, Some(header.keyword))
            }
        };
        Err(ProtocolError::Malformed {
            seq,
            keyword,
            message: "line is not valid UTF-8".into(),
        })
    }

    fn header(&mut self, line: &str) -> ProtocolResult<Option<Command>> {
        if line.trim().is_empty() {
            return Ok(None);
        }
        let (seq, rest) = split_seq(line)?;
        let Some((keyword, rest)) = next_token(rest) else {
            return Err(ProtocolError::Malformed {
                seq,
                keyword: None,
                message: "missing keyword".into(),
            });
        };
        let keyword = match keyword.parse::<Keyword>() {
            Ok(Keyword::Error) | Err(_) => {
                return Err(ProtocolError::UnknownKeyword {
                    seq,
                    keyword: keyword.to_string(),
                })
            }
            Ok(keyword) => keyword,
        };

        let args: Vec<&str> = rest.split_whitespace().collect();
        match Self::arguments(seq, keyword, &args) {
            Ok(Parsed::Complete(command)) => Ok(Some(command)),
            Ok(Parsed::Body(directory)) => {
                self.bodies.state = Body::Reading(CommandHeader {
                    seq,
                    keyword,
                    directory,
                });
                Ok(None)
            }
            Err(err) => {
                // The body follows even when the header is bad; skip it.
                if keyword.has_body() {
                    self.bodies.state = Body::Skipping;
                }
                Err(err.with_context(seq, keyword))
            }
        }
    }

    fn arguments(seq: Option<u64>, keyword: Keyword, args: &[&str]) -> ProtocolResult<Parsed> {
        Ok(match (keyword, args) {
            (Keyword::Sub, [directory]) => Parsed::Complete(Command::Subscribe {
                seq,
                directory: (*directory).to_string(),
                last_version: 0,
            }),
            (Keyword::Sub, [directory, version]) => Parsed::Complete(Command::Subscribe {
                seq,
                directory: (*directory).to_string(),
                last_version: parse_number(version, "version")?,
            }),
            (Keyword::Unsub, [directory]) => Parsed::Complete(Command::Unsubscribe {
                seq,
                directory: (*directory).to_string(),
            }),
            (Keyword::Put | Keyword::Rem, [directory]) => Parsed::Body((*directory).to_string()),
            _ => {
                return Err(ProtocolError::malformed(format!(
                    "wrong number of arguments for {keyword}: {}",
                    args.len()
                )))
            }
        })
    }
}

struct PatchHeader {
    directory: String,
    prev: u64,
    new: u64,
    action: Action,
}

/// Client-side decoder for replies and pushed patches.
pub struct ServerMessageDecoder {
    bodies: Bodies<PatchHeader>,
}

impl ServerMessageDecoder {
    /// Creates a decoder enforcing `limits` on record bodies.
    #[must_use]
    pub fn new(limits: RecordLimits) -> Self {
        Self {
            bodies: Bodies::new(limits),
        }
    }

    /// Returns true when no patch is partially decoded.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.bodies.is_idle()
    }

    /// Feeds one line; returns a message once it is complete.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] for lines outside the grammar.
    pub fn push_line(&mut self, line: &str) -> ProtocolResult<Option<ServerMessage>> {
        let line = strip_newline(line);
        match std::mem::replace(&mut self.bodies.state, Body::Idle) {
            Body::Idle => self.header(line),
            Body::Skipping => {
                if !line.is_empty() {
                    self.bodies.state = Body::Skipping;
                }
                Ok(None)
            }
            Body::Reading(header) => match self.bodies.push(line) {
                Ok(Step::More) => {
                    self.bodies.state = Body::Reading(header);
                    Ok(None)
                }
                Ok(Step::Done(record)) => Ok(Some(ServerMessage::Patch(PatchMessage {
                    directory: header.directory,
                    prev: header.prev,
                    new: header.new,
                    action: header.action,
                    record,
                }))),
                Err(source) => Err(ProtocolError::codec(source)),
            },
        }
    }

    fn header(&mut self, line: &str) -> ProtocolResult<Option<ServerMessage>> {
        if line.trim().is_empty() {
            return Ok(None);
        }
        match next_token(line) {
            Some(("PATCH", rest)) => {
                match Self::patch_header(rest) {
                    Ok(header) => self.bodies.state = Body::Reading(header),
                    Err(err) => {
                        self.bodies.state = Body::Skipping;
                        return Err(err);
                    }
                }
                Ok(None)
            }
            _ => Self::reply(line).map(|reply| Some(ServerMessage::Reply(reply))),
        }
    }

    fn patch_header(rest: &str) -> ProtocolResult<PatchHeader> {
        let args: Vec<&str> = rest.split_whitespace().collect();
        let [directory, prev, new, action] = args.as_slice() else {
            return Err(ProtocolError::malformed(format!(
                "PATCH takes 4 arguments, got {}",
                args.len()
            )));
        };
        let mut chars = action.chars();
        let action = match (chars.next(), chars.next()) {
            (Some(c), None) => Action::from_char(c).map_err(ProtocolError::codec)?,
            _ => {
                return Err(ProtocolError::malformed(format!(
                    "invalid action {action:?}"
                )))
            }
        };
        Ok(PatchHeader {
            directory: (*directory).to_string(),
            prev: parse_number(prev, "version")?,
            new: parse_number(new, "version")?,
            action,
        })
    }

    fn reply(line: &str) -> ProtocolResult<Reply> {
        let (seq, rest) = split_seq(line)?;
        let (keyword, rest) = next_token(rest)
            .ok_or_else(|| ProtocolError::malformed("reply without keyword"))?;
        let keyword: Keyword = keyword.parse()?;
        let (code, rest) = next_token(rest)
            .ok_or_else(|| ProtocolError::malformed("reply without status"))?;
        let code: u16 = parse_number(code, "status")?;
        let status = Status::from_code(code)
            .ok_or_else(|| ProtocolError::malformed(format!("unknown status {code}")))?;
        Ok(Reply {
            seq,
            keyword,
            status,
            text: rest.trim().to_string(),
        })
    }
}

//! Outcome channel between an isolated unit and the scheduler.
//!
//! The unit writes a sequence of [`Record`]s, each in its own frame:
//!
//! ```text
//! [0xC7][u32 little-endian payload length][JSON payload]
//! ```
//!
//! The framing is private to one scheduler/unit pair. [`RecordDecoder`] is
//! incremental: it accepts arbitrary byte chunks and yields complete records,
//! keeping an unfinished frame until more bytes arrive. [`ChannelSummary`]
//! folds the record stream into the inputs of the fault classifier.

use std::fmt;
use std::io::Write;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::run::FailureRecord;

/// First byte of every frame.
pub const FRAME_TAG: u8 = 0xC7;
/// Largest accepted payload.
pub const MAX_FRAME_LEN: usize = 1 << 20;
const HEADER_LEN: usize = 5;

/// Phase of the unit's setup/exec/teardown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Setup,
    Exec,
    Teardown,
}

impl Phase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Exec => "exec",
            Self::Teardown => "teardown",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal verdict written once by the unit before it exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
    Skip,
}

/// An explicit skip request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipNotice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub file: String,
    pub line: u32,
    pub function: String,
}

/// One self-describing record on the outcome channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Phase { phase: Phase },
    Failure(FailureRecord),
    Skip(SkipNotice),
    Terminal { verdict: Verdict },
}

impl Record {
    /// Encode into a complete frame.
    pub fn encode(&self) -> Result<Vec<u8>, ChannelError> {
        let payload = serde_json::to_vec(self)?;
        if payload.len() > MAX_FRAME_LEN {
            return Err(ChannelError::Oversized(payload.len()));
        }
        let len = u32::try_from(payload.len()).map_err(|_| ChannelError::Oversized(payload.len()))?;
        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        frame.push(FRAME_TAG);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// A stand-in for a record whose payload of `len` bytes exceeded the
    /// frame limit, clipped to fit. `None` for records that cannot grow.
    #[must_use]
    pub fn shortened(&self, len: usize) -> Option<Self> {
        match self {
            Self::Failure(f) => Some(Self::Failure(FailureRecord {
                expression: clip(&f.expression, CLIP_LEN),
                file: clip(&f.file, CLIP_LEN),
                line: f.line,
                function: clip(&f.function, CLIP_LEN),
                message: format!("record too large ({len} bytes): {}", clip(&f.message, CLIP_LEN)),
                fatal: f.fatal,
            })),
            Self::Skip(s) => Some(Self::Skip(SkipNotice {
                reason: s
                    .reason
                    .as_deref()
                    .map(|r| format!("record too large ({len} bytes): {}", clip(r, CLIP_LEN))),
                file: clip(&s.file, CLIP_LEN),
                line: s.line,
                function: clip(&s.function, CLIP_LEN),
            })),
            Self::Phase { .. } | Self::Terminal { .. } => None,
        }
    }

    /// Encode and write as a single `write_all`.
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<(), ChannelError> {
        let frame = self.encode()?;
        writer.write_all(&frame)?;
        writer.flush()?;
        Ok(())
    }
}

const CLIP_LEN: usize = 1024;

fn clip(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Errors on the outcome channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed record payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad frame tag {0:#04x}")]
    BadTag(u8),
    #[error("frame length {0} exceeds limit")]
    Oversized(usize),
}

/// Incremental frame decoder.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    buf: Vec<u8>,
}

impl RecordDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every record completed by them.
    ///
    /// After an error the decoder must not be fed again.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Record>, ChannelError> {
        self.buf.extend_from_slice(bytes);
        let mut records = Vec::new();
        let mut offset = 0;
        while self.buf.len() - offset >= HEADER_LEN {
            let header = &self.buf[offset..offset + HEADER_LEN];
            if header[0] != FRAME_TAG {
                return Err(ChannelError::BadTag(header[0]));
            }
            let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
            if len > MAX_FRAME_LEN {
                return Err(ChannelError::Oversized(len));
            }
            let end = offset + HEADER_LEN + len;
            if self.buf.len() < end {
                break;
            }
            records.push(serde_json::from_slice(&self.buf[offset + HEADER_LEN..end])?);
            offset = end;
        }
        self.buf.drain(..offset);
        Ok(records)
    }

    /// Bytes of an unfinished frame held back.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Record stream folded into classifier inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelSummary {
    pub failures: Vec<FailureRecord>,
    pub skip: Option<SkipNotice>,
    /// Last phase marker seen.
    pub phase: Option<Phase>,
    pub terminal: Option<Verdict>,
    /// First protocol violation, if any.
    pub violation: Option<String>,
    /// The stream ended inside a frame.
    pub truncated: bool,
}

impl ChannelSummary {
    pub fn absorb(&mut self, record: Record) {
        if self.violation.is_some() {
            return;
        }
        if self.terminal.is_some() {
            self.violation = Some("record received after terminal record".to_string());
            return;
        }
        match record {
            Record::Phase { phase } => self.phase = Some(phase),
            Record::Failure(failure) => self.failures.push(failure),
            Record::Skip(notice) => self.skip = Some(notice),
            Record::Terminal { verdict } => self.terminal = Some(verdict),
        }
    }

    pub fn absorb_all(&mut self, records: impl IntoIterator<Item = Record>) {
        for record in records {
            self.absorb(record);
        }
    }

    /// Mark the channel corrupt; later records are ignored.
    pub fn corrupt(&mut self, err: &ChannelError) {
        if self.violation.is_none() {
            self.violation = Some(format!("corrupt outcome channel: {err}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(message: &str, fatal: bool) -> Record {
        Record::Failure(FailureRecord {
            expression: "x == 1".into(),
            file: "tests/demo.rs".into(),
            line: 12,
            function: "demo::body".into(),
            message: message.into(),
            fatal,
        })
    }

    fn stream() -> (Vec<Record>, Vec<u8>) {
        let records = vec![
            Record::Phase { phase: Phase::Setup },
            Record::Phase { phase: Phase::Exec },
            failure("check failed", false),
            Record::Skip(SkipNotice {
                reason: Some("no network".into()),
                file: "tests/demo.rs".into(),
                line: 20,
                function: "demo::body".into(),
            }),
            Record::Terminal {
                verdict: Verdict::Fail,
            },
        ];
        let bytes = records.iter().flat_map(|r| r.encode().unwrap()).collect();
        (records, bytes)
    }

    #[test]
    fn decoder_handles_arbitrary_chunking() {
        let (records, bytes) = stream();
        for chunk in [1, 2, 3, 5, 7, 64, bytes.len()] {
            let mut decoder = RecordDecoder::new();
            let mut got = Vec::new();
            for piece in bytes.chunks(chunk) {
                got.extend(decoder.feed(piece).unwrap());
            }
            assert_eq!(got, records, "chunk size {chunk}");
            assert_eq!(decoder.pending(), 0);
        }
    }

    #[test]
    fn truncated_tail_is_held_back() {
        let (records, bytes) = stream();
        let mut decoder = RecordDecoder::new();
        let got = decoder.feed(&bytes[..bytes.len() - 3]).unwrap();
        assert_eq!(got, records[..records.len() - 1]);
        assert!(decoder.pending() > 0);
    }

    #[test]
    fn bad_tag_is_rejected() {
        let mut decoder = RecordDecoder::new();
        let err = decoder.feed(&[0x00, 1, 0, 0, 0, b'x']).unwrap_err();
        assert!(matches!(err, ChannelError::BadTag(0)));
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut decoder = RecordDecoder::new();
        let len = (MAX_FRAME_LEN as u32 + 1).to_le_bytes();
        let err = decoder
            .feed(&[FRAME_TAG, len[0], len[1], len[2], len[3]])
            .unwrap_err();
        assert!(matches!(err, ChannelError::Oversized(_)));
    }

    #[test]
    fn summary_collects_records() {
        let (records, _) = stream();
        let mut summary = ChannelSummary::default();
        summary.absorb_all(records);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.phase, Some(Phase::Exec));
        assert_eq!(summary.terminal, Some(Verdict::Fail));
        assert_eq!(summary.skip.as_ref().and_then(|s| s.reason.as_deref()), Some("no network"));
        assert!(summary.violation.is_none());
    }

    #[test]
    fn record_after_terminal_is_a_violation() {
        let mut summary = ChannelSummary::default();
        summary.absorb(Record::Terminal {
            verdict: Verdict::Pass,
        });
        summary.absorb(failure("late", true));
        assert!(summary.violation.is_some());
        assert!(summary.failures.is_empty());
    }

    #[test]
    fn oversized_failure_is_shortened_to_fit() {
        let huge = Record::Failure(FailureRecord {
            expression: "blob == expected".into(),
            file: "tests/blob.rs".into(),
            line: 9,
            function: "blob::roundtrip".into(),
            message: "é".repeat(MAX_FRAME_LEN),
            fatal: false,
        });
        let Err(ChannelError::Oversized(len)) = huge.encode() else {
            panic!("expected an oversized frame");
        };
        let short = huge.shortened(len).unwrap();
        let frame = short.encode().unwrap();
        let decoded = RecordDecoder::new().feed(&frame).unwrap();
        let Record::Failure(f) = &decoded[0] else {
            panic!("expected a failure record");
        };
        assert!(f.message.starts_with(&format!("record too large ({len} bytes): éé")));
        assert_eq!((f.line, f.fatal), (9, false));
        assert_eq!(f.expression, "blob == expected");
        assert!(Record::Phase { phase: Phase::Exec }.shortened(len).is_none());
    }

    #[test]
    fn wire_form_is_tagged_json() {
        let frame = Record::Terminal {
            verdict: Verdict::Skip,
        }
        .encode()
        .unwrap();
        assert_eq!(frame[0], FRAME_TAG);
        let payload: serde_json::Value = serde_json::from_slice(&frame[HEADER_LEN..]).unwrap();
        assert_eq!(payload["kind"], "terminal");
        assert_eq!(payload["verdict"], "skip");
    }
}

//! Client-side reassembly of a streamed chat turn.
//!
//! Rebuilds the full text and citation list from event-stream bytes and
//! checks the framing rules: frames only before the terminal line, exactly
//! one terminal line, and citations that only grow.

use serde_json::Value;
use stratagem_core::{Citation, SseLineDecoder};
use thiserror::Error;

use crate::stream::{StreamFrame, DONE_SENTINEL};

/// Framing violation observed by the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReassemblyError {
    #[error("payload after the terminal marker: {0}")]
    AfterTerminal(String),

    #[error("stream ended without a terminal marker")]
    Truncated,

    #[error("unreadable frame: {0}")]
    InvalidFrame(String),
}

/// How a completed turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEnding {
    Completed,
    Failed(String),
}

/// Fully reassembled turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    pub citations: Vec<Citation>,
    pub ending: TurnEnding,
    pub frames: usize,
}

/// Incremental reducer over event-stream bytes.
#[derive(Debug, Default)]
pub struct TurnReassembler {
    decoder: SseLineDecoder,
    text: String,
    citations: Vec<Citation>,
    ending: Option<TurnEnding>,
    frames: usize,
}

impl TurnReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes as received from the transport.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), ReassemblyError> {
        for payload in self.decoder.push(chunk) {
            self.apply(&payload)?;
        }
        Ok(())
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Citations surfaced so far, in arrival order.
    pub fn citations(&self) -> &[Citation] {
        &self.citations
    }

    pub fn is_finished(&self) -> bool {
        self.ending.is_some()
    }

    /// Close the reducer once the transport has ended.
    pub fn finish(mut self) -> Result<Transcript, ReassemblyError> {
        if let Some(payload) = self.decoder.finish() {
            self.apply(&payload)?;
        }
        let ending = self.ending.ok_or(ReassemblyError::Truncated)?;
        Ok(Transcript {
            text: self.text,
            citations: self.citations,
            ending,
            frames: self.frames,
        })
    }

    fn apply(&mut self, payload: &str) -> Result<(), ReassemblyError> {
        if self.ending.is_some() {
            return Err(ReassemblyError::AfterTerminal(payload.to_string()));
        }
        if payload.trim() == DONE_SENTINEL {
            self.ending = Some(TurnEnding::Completed);
            return Ok(());
        }

        let value: Value = serde_json::from_str(payload)
            .map_err(|error| ReassemblyError::InvalidFrame(error.to_string()))?;
        if let Some(message) = value.get("error") {
            let message = message
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| message.to_string());
            self.ending = Some(TurnEnding::Failed(message));
            return Ok(());
        }

        let frame: StreamFrame = serde_json::from_value(value)
            .map_err(|error| ReassemblyError::InvalidFrame(error.to_string()))?;
        self.frames += 1;
        self.text.push_str(&frame.text_delta);
        for citation in frame.citations {
            if !self.citations.iter().any(|known| known.uri == citation.uri) {
                self.citations.push(citation);
            }
        }
        Ok(())
    }
}

/// Reassemble a complete byte body.
pub fn reassemble(body: &[u8]) -> Result<Transcript, ReassemblyError> {
    let mut reassembler = TurnReassembler::new();
    reassembler.push(body)?;
    reassembler.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebuilds_text_and_citations() {
        let body = concat!(
            "data: {\"textDelta\":\"Hel\",\"citations\":[]}\n\n",
            "data: {\"textDelta\":\"lo\",\"citations\":[{\"uri\":\"https://a.test\",\"title\":\"A\"}]}\n\n",
            "data: [DONE]\n\n",
        );

        let transcript = reassemble(body.as_bytes()).expect("complete");

        assert_eq!(transcript.text, "Hello");
        assert_eq!(transcript.citations.len(), 1);
        assert_eq!(transcript.ending, TurnEnding::Completed);
        assert_eq!(transcript.frames, 2);
    }

    #[test]
    fn split_chunks_are_joined() {
        let mut reassembler = TurnReassembler::new();
        reassembler.push(b"data: {\"textDelta\":\"a").expect("partial");
        assert_eq!(reassembler.text(), "");
        reassembler.push(b"b\"}\n\ndata: [DO").expect("frame");
        assert_eq!(reassembler.text(), "ab");
        reassembler.push(b"NE]\n\n").expect("done");
        assert!(reassembler.is_finished());
    }

    #[test]
    fn error_frame_is_a_terminal_marker() {
        let body = "data: {\"textDelta\":\"x\"}\n\ndata: {\"error\":\"upstream failed\"}\n\n";
        let transcript = reassemble(body.as_bytes()).expect("terminated");
        assert_eq!(transcript.ending, TurnEnding::Failed(String::from("upstream failed")));
    }

    #[test]
    fn missing_terminal_marker_is_truncation() {
        let body = "data: {\"textDelta\":\"x\"}\n\n";
        assert_eq!(reassemble(body.as_bytes()), Err(ReassemblyError::Truncated));
    }

    #[test]
    fn anything_after_the_terminal_marker_is_rejected() {
        let body = "data: {\"error\":\"boom\"}\n\ndata: [DONE]\n\n";
        assert!(matches!(
            reassemble(body.as_bytes()),
            Err(ReassemblyError::AfterTerminal(_))
        ));
    }
}

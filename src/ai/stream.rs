//! One-shot reducer over the backend's chunked response stream
//!
//! The backend answers with newline-delimited JSON fragments of the form
//! `{"response": "<partial token span>", "done": false}` terminated by one
//! with `done: true`. The decoder accumulates the `response` fields in
//! arrival order and, once the stream ends, matches the result against the
//! `{response: '…', script: '…'}` envelope the prompt asks for.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::{fallback, AiResult};

/// Tolerant envelope match: keys may be bare or quoted, values are
/// single-quoted, the closing brace may be missing when the stream was cut
/// short. Anchored at the end of the buffer so prose that merely mentions
/// braces earlier in the answer is not mistaken for an envelope.
const ENVELOPE_PATTERN: &str =
    r#"(?s)\{\s*["']?response["']?\s*:\s*'(.*?)'\s*,\s*["']?script["']?\s*:\s*'(.*?)'\s*\}?\s*\z"#;

static ENVELOPE: OnceLock<Regex> = OnceLock::new();

fn envelope() -> &'static Regex {
    ENVELOPE.get_or_init(|| Regex::new(ENVELOPE_PATTERN).expect("envelope pattern is valid"))
}

/// One stream fragment. Unknown fields (timings, model name) are ignored.
#[derive(Debug, Deserialize)]
struct Fragment {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
}

/// Incremental decoder for one streaming request.
///
/// Feed raw byte chunks with [`push`](Self::push); call
/// [`finish`](Self::finish) once the terminal fragment arrived or the
/// underlying stream closed. Produces exactly one result, never partials.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    /// Bytes of the current, not yet newline-terminated line
    pending: String,
    /// Accumulated response text across fragments
    text: String,
    /// Saw a fragment with `done: true`
    done: bool,
    /// Count of successfully parsed fragments
    fragments: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one chunk, splitting it into newline-delimited fragments.
    /// A malformed fragment is skipped and logged; it never aborts the
    /// stream.
    pub fn push(&mut self, chunk: &[u8]) {
        self.pending.push_str(&String::from_utf8_lossy(chunk));

        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            let line = line.trim();
            if !line.is_empty() {
                self.take_fragment(line);
            }
        }
    }

    /// True once the terminal `done` fragment has been seen
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of fragments parsed so far
    pub fn fragments(&self) -> usize {
        self.fragments
    }

    /// Finish decoding: flush any trailing unterminated line, then match
    /// the accumulated text against the envelope. No envelope means the
    /// backend answered in plain prose, which is returned as-is.
    pub fn finish(mut self) -> AiResult {
        let trailing = std::mem::take(&mut self.pending);
        let trailing = trailing.trim();
        if !trailing.is_empty() {
            self.take_fragment(trailing);
        }

        let (text, directive) = split_envelope(&self.text);
        let degraded = fallback::is_degraded(&text);
        AiResult {
            text,
            directive,
            degraded,
        }
    }

    fn take_fragment(&mut self, line: &str) {
        match serde_json::from_str::<Fragment>(line) {
            Ok(fragment) => {
                self.fragments += 1;
                if let Some(partial) = fragment.response {
                    self.text.push_str(&partial);
                }
                if fragment.done {
                    self.done = true;
                }
            }
            Err(err) => {
                debug!(error = %err, line_len = line.len(), "skipping malformed stream fragment");
            }
        }
    }
}

/// Split the accumulated text into spoken text and directive if it matches
/// the envelope; otherwise the whole buffer is plain prose.
fn split_envelope(raw: &str) -> (String, Option<String>) {
    if let Some(captures) = envelope().captures(raw) {
        let text = captures[1].trim().to_string();
        let directive = captures[2].trim().to_string();
        let directive = if directive.is_empty() {
            None
        } else {
            Some(directive)
        };
        return (text, directive);
    }
    (raw.trim().to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(chunks: &[&str]) -> AiResult {
        let mut decoder = StreamDecoder::new();
        for chunk in chunks {
            decoder.push(chunk.as_bytes());
        }
        decoder.finish()
    }

    #[test]
    fn test_fragments_accumulate_in_arrival_order() {
        let result = decode(&[
            "{\"response\":\"Hello \"}\n",
            "{\"response\":\"world\",\"done\":true}\n",
        ]);
        assert_eq!(result.text, "Hello world");
        assert_eq!(result.directive, None);
    }

    #[test]
    fn test_fragment_split_across_chunk_boundary() {
        let result = decode(&[
            "{\"respon",
            "se\":\"Hi\"}\n{\"response\":\" there\",",
            "\"done\":true}\n",
        ]);
        assert_eq!(result.text, "Hi there");
    }

    #[test]
    fn test_envelope_is_split_into_text_and_directive() {
        let result = decode(&["{\"response\":\"{response:'Hi there', script:'alert(1)'}\",\"done\":true}\n"]);
        assert_eq!(result.text, "Hi there");
        assert_eq!(result.directive.as_deref(), Some("alert(1)"));
    }

    #[test]
    fn test_envelope_tolerates_missing_closing_brace() {
        let (text, directive) =
            split_envelope("{response: 'Done', script: 'nav:/products'");
        assert_eq!(text, "Done");
        assert_eq!(directive.as_deref(), Some("nav:/products"));
    }

    #[test]
    fn test_envelope_with_quoted_keys() {
        let (text, directive) =
            split_envelope("{\"response\": 'Ok', \"script\": 'highlight(2)'}");
        assert_eq!(text, "Ok");
        assert_eq!(directive.as_deref(), Some("highlight(2)"));
    }

    #[test]
    fn test_plain_prose_has_no_directive() {
        let result = decode(&["{\"response\":\"Just a plain answer.\",\"done\":true}\n"]);
        assert_eq!(result.text, "Just a plain answer.");
        assert_eq!(result.directive, None);
    }

    #[test]
    fn test_braces_mid_prose_are_not_an_envelope() {
        let (text, directive) =
            split_envelope("In JSON you write {response: 'x', script: 'y'} and then more text.");
        assert_eq!(directive, None);
        assert!(text.starts_with("In JSON"));
    }

    #[test]
    fn test_empty_script_capture_means_no_directive() {
        let (text, directive) = split_envelope("{response: 'Hi', script: ''}");
        assert_eq!(text, "Hi");
        assert_eq!(directive, None);
    }

    #[test]
    fn test_malformed_fragment_is_skipped_not_fatal() {
        let result = decode(&[
            "{\"response\":\"Good \"}\n",
            "this line is not json\n",
            "{\"response\":\"answer\",\"done\":true}\n",
        ]);
        assert_eq!(result.text, "Good answer");
    }

    #[test]
    fn test_implicit_end_of_stream_without_done() {
        let mut decoder = StreamDecoder::new();
        decoder.push(b"{\"response\":\"cut off\"}\n");
        assert!(!decoder.is_done());
        let result = decoder.finish();
        assert_eq!(result.text, "cut off");
    }

    #[test]
    fn test_trailing_unterminated_line_is_flushed() {
        let mut decoder = StreamDecoder::new();
        decoder.push(b"{\"response\":\"tail\",\"done\":true}");
        let result = decoder.finish();
        assert_eq!(result.text, "tail");
    }

    #[test]
    fn test_fragment_count_tracks_parses() {
        let mut decoder = StreamDecoder::new();
        decoder.push(b"not json\n");
        assert_eq!(decoder.fragments(), 0);
        decoder.push(b"{\"done\":true}\n");
        assert_eq!(decoder.fragments(), 1);
        assert!(decoder.is_done());
    }

    #[test]
    fn test_degraded_marker_sets_flag() {
        let result = decode(&[
            "{\"response\":\"I'm running in limited mode.\",\"done\":true}\n",
        ]);
        assert!(result.degraded);
    }
}

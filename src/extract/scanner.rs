//! Blocking JSON-LD block scanner driven by the `html5ever` tokenizer.
//!
//! The tokenizer only lexes: there is no tree builder, so the sink tells it
//! which elements switch to raw text. Chunks arrive over a channel from the
//! async reader; an empty chunk marks the end of the stream.

use std::io;

use html5ever::tendril::StrTendril;
use html5ever::tokenizer::states::RawKind;
use html5ever::tokenizer::{
    BufferQueue, Tag, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
};
use tokio::sync::mpsc;

use super::structured_data::decode_payload;
use crate::domain::ProductRecord;
use crate::error::TrackerError;

/// Token sink that captures the text of the first matching script.
#[derive(Debug)]
pub(crate) struct BlockScanner {
    media_type: String,
    max_token_bytes: usize,
    /// Text of the matching script currently open.
    block: Option<String>,
    outcome: Option<Result<ProductRecord, TrackerError>>,
    /// Set whenever the tokenizer emits something other than a parse error.
    progressed: bool,
}

impl BlockScanner {
    pub(crate) fn new(media_type: &str, max_token_bytes: usize) -> Self {
        Self {
            media_type: media_type.to_string(),
            max_token_bytes,
            block: None,
            outcome: None,
            progressed: false,
        }
    }

    /// Tokenizes chunks from `feed` until a block decides the outcome.
    ///
    /// Bytes fed without the tokenizer emitting anything count against
    /// `max_token_bytes`, which bounds unterminated tags and comments. A
    /// channel closed without the end marker yields not-found.
    pub(crate) fn run(
        self,
        mut feed: mpsc::Receiver<Vec<u8>>,
    ) -> Result<ProductRecord, TrackerError> {
        let max_token_bytes = self.max_token_bytes;
        let mut tokenizer = Tokenizer::new(self, TokenizerOpts::default());
        let mut input = BufferQueue::default();
        let mut text = Utf8Chunks::default();
        let mut stalled = 0usize;

        while let Some(chunk) = feed.blocking_recv() {
            if chunk.is_empty() {
                let tail = text.finish();
                if !tail.is_empty() {
                    input.push_back(StrTendril::from(tail));
                }
                // The sink never asks the tokenizer to suspend for a script.
                let _ = tokenizer.feed(&mut input);
                tokenizer.end();
                return tokenizer
                    .sink
                    .outcome
                    .take()
                    .unwrap_or(Err(TrackerError::StructuredDataNotFound));
            }

            stalled = stalled.saturating_add(chunk.len());
            let decoded = text.decode(&chunk);
            if !decoded.is_empty() {
                input.push_back(StrTendril::from(decoded));
            }
            let _ = tokenizer.feed(&mut input);

            let sink = &mut tokenizer.sink;
            if let Some(outcome) = sink.outcome.take() {
                return outcome;
            }
            if std::mem::take(&mut sink.progressed) {
                stalled = 0;
            }
            if stalled > max_token_bytes {
                return Err(oversized(max_token_bytes));
            }
        }
        Err(TrackerError::StructuredDataNotFound)
    }

    fn start_tag(&mut self, tag: &Tag) -> TokenSinkResult<()> {
        if self.block.is_none() && self.is_structured_data(tag) {
            self.block = Some(String::new());
        }
        content_model(&tag.name)
    }

    fn is_structured_data(&self, tag: &Tag) -> bool {
        &*tag.name == "script"
            && tag
                .attrs
                .iter()
                .find(|attr| &*attr.name.local == "type")
                .is_some_and(|attr| attr.value.trim().eq_ignore_ascii_case(&self.media_type))
    }

    fn push_text(&mut self, text: &str) {
        let Some(block) = self.block.as_mut() else {
            return;
        };
        if block.len().saturating_add(text.len()) > self.max_token_bytes {
            self.block = None;
            self.outcome = Some(Err(oversized(self.max_token_bytes)));
            return;
        }
        block.push_str(text);
    }

    fn close_block(&mut self) {
        let Some(block) = self.block.take() else {
            return;
        };
        // An empty block carries nothing to decode; keep looking.
        let payload = block.trim();
        if !payload.is_empty() {
            self.outcome = Some(decode_payload(payload));
        }
    }
}

impl TokenSink for BlockScanner {
    type Handle = ();

    fn process_token(&mut self, token: Token, _line_number: u64) -> TokenSinkResult<()> {
        if self.outcome.is_some() {
            return TokenSinkResult::Continue;
        }
        if !matches!(token, Token::ParseError(_)) {
            self.progressed = true;
        }
        match token {
            Token::TagToken(tag) => match tag.kind {
                TagKind::StartTag => return self.start_tag(&tag),
                TagKind::EndTag if &*tag.name == "script" => self.close_block(),
                TagKind::EndTag => {}
            },
            Token::CharacterTokens(text) => self.push_text(&text),
            Token::NullCharacterToken => self.push_text("\u{FFFD}"),
            Token::EOFToken => self.close_block(),
            Token::CommentToken(_) | Token::DoctypeToken(_) | Token::ParseError(_) => {}
        }
        TokenSinkResult::Continue
    }
}

/// Content model the tokenizer switches to after a start tag.
fn content_model(name: &str) -> TokenSinkResult<()> {
    match name {
        "script" => TokenSinkResult::RawData(RawKind::ScriptData),
        "style" | "xmp" | "iframe" | "noembed" | "noframes" => {
            TokenSinkResult::RawData(RawKind::Rawtext)
        }
        "title" | "textarea" => TokenSinkResult::RawData(RawKind::Rcdata),
        "plaintext" => TokenSinkResult::Plaintext,
        _ => TokenSinkResult::Continue,
    }
}

fn oversized(max_token_bytes: usize) -> TrackerError {
    TrackerError::Io(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("html token exceeds {max_token_bytes} bytes"),
    ))
}

/// Incremental UTF-8 decoding across chunk boundaries.
///
/// Invalid sequences become U+FFFD; a sequence cut by the chunk boundary is
/// held until the next chunk.
#[derive(Debug, Default)]
struct Utf8Chunks {
    pending: Vec<u8>,
}

impl Utf8Chunks {
    fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    let Some(invalid) = e.error_len() else {
                        rest = after;
                        break;
                    };
                    out.push(char::REPLACEMENT_CHARACTER);
                    rest = after.get(invalid..).unwrap_or_default();
                }
            }
        }
        let incomplete = rest.to_vec();
        self.pending = incomplete;
        out
    }

    fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}

//! Incremental UTF-8 decoding of a chunked response body.

const REPLACEMENT: char = '\u{FFFD}';

/// Streaming UTF-8 decoder.
///
/// Bytes of a code point split across chunk boundaries are held back until the
/// rest arrives. Invalid sequences decode to U+FFFD instead of failing.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes the next chunk, returning all text that is complete so far.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::with_capacity(self.pending.len());
        let mut consumed = 0;

        loop {
            match std::str::from_utf8(&self.pending[consumed..]) {
                Ok(text) => {
                    out.push_str(text);
                    consumed = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid = consumed + e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[consumed..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(REPLACEMENT);
                            consumed = valid + len;
                        }
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            consumed = valid;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..consumed);
        out
    }

    /// Flushes any held-back bytes at end of stream.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        self.pending.clear();
        REPLACEMENT.to_string()
    }

    /// Number of bytes waiting for the rest of their code point.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// The growing text buffer of one streaming round.
#[derive(Debug, Default)]
pub struct TextAccumulator {
    decoder: Utf8Decoder,
    text: String,
}

impl TextAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a raw chunk and returns the whole buffer decoded so far.
    pub fn push(&mut self, chunk: &[u8]) -> &str {
        let fragment = self.decoder.decode(chunk);
        self.text.push_str(&fragment);
        &self.text
    }

    /// Flushes the decoder and returns the final buffer.
    pub fn finish(&mut self) -> &str {
        let tail = self.decoder.finish();
        self.text.push_str(&tail);
        &self.text
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

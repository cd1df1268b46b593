use bytes::Bytes;

/// Smallest usable frame: one UTF-8 scalar.
pub const MIN_SEGMENT: usize = 4;

/// One outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    /// Bytes that are not valid UTF-8, forwarded as-is.
    Binary(Bytes),
}

impl Segment {
    pub fn len(&self) -> usize {
        match self {
            Segment::Text(text) => text.len(),
            Segment::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cuts an arbitrary byte stream into frames of at most `max` bytes without
/// splitting a UTF-8 scalar across frames. An incomplete sequence at the end
/// of a chunk is carried into the next one. Concatenating every frame yields
/// the input bytes exactly.
#[derive(Debug)]
pub struct Segmenter {
    max: usize,
    pending: Vec<u8>,
}

impl Segmenter {
    pub fn new(max: usize) -> Self {
        Segmenter {
            max: max.max(MIN_SEGMENT),
            pending: Vec::new(),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Segment> {
        self.pending.extend_from_slice(chunk);
        let max = self.max;
        let mut out = Vec::new();
        // adjacent invalid bytes, sent together
        let mut invalid_run = Vec::new();
        let mut consumed = 0;

        while consumed < self.pending.len() {
            let rest = &self.pending[consumed..];
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    flush_binary(&mut invalid_run, max, &mut out);
                    split_text(text, max, &mut out);
                    consumed = self.pending.len();
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    if valid > 0 {
                        flush_binary(&mut invalid_run, max, &mut out);
                        if let Ok(text) = std::str::from_utf8(&rest[..valid]) {
                            split_text(text, max, &mut out);
                        }
                    }
                    match err.error_len() {
                        Some(invalid) => {
                            invalid_run.extend_from_slice(&rest[valid..valid + invalid]);
                            consumed += valid + invalid;
                        }
                        // incomplete sequence at the end: wait for more input
                        None => {
                            consumed += valid;
                            break;
                        }
                    }
                }
            }
        }

        flush_binary(&mut invalid_run, max, &mut out);
        self.pending.drain(..consumed);
        out
    }

    /// Flushes a trailing incomplete sequence once the source has ended.
    pub fn finish(&mut self) -> Option<Segment> {
        if self.pending.is_empty() {
            return None;
        }
        Some(Segment::Binary(Bytes::from(std::mem::take(&mut self.pending))))
    }
}

fn flush_binary(run: &mut Vec<u8>, max: usize, out: &mut Vec<Segment>) {
    for piece in run.chunks(max) {
        out.push(Segment::Binary(Bytes::copy_from_slice(piece)));
    }
    run.clear();
}

fn split_text(text: &str, max: usize, out: &mut Vec<Segment>) {
    let mut rest = text;
    while !rest.is_empty() {
        let mut end = rest.len().min(max);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        out.push(Segment::Text(rest[..end].to_string()));
        rest = &rest[end..];
    }
}

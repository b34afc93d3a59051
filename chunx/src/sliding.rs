use super::ChunkerError;
use tracing::debug;

/// Default base size of a chunk.
pub const SLIDING_WINDOW_DEFAULT_SIZE: usize = 1000;

/// Default amount of characters carried over from the previous chunk.
pub const SLIDING_WINDOW_DEFAULT_OVERLAP: usize = 20;

/// The most basic of chunkers.
///
/// `size` determines how far the window advances on every step and
/// `overlap` determines how many characters of the previous window are
/// repeated at the start of the next one. Adjacent chunks therefore
/// share exactly `overlap` characters (modulo UTF-8 boundary snapping).
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    pub size: usize,
    pub overlap: usize,
}

impl SlidingWindow {
    /// Create a new `SlidingWindow` chunker.
    /// Errors if `size` is 0 or if `overlap` is not less than `size`.
    pub fn new(size: usize, overlap: usize) -> Result<Self, ChunkerError> {
        if size == 0 {
            return Err(ChunkerError::Config("size must be positive".to_string()));
        }

        if overlap >= size {
            return Err(ChunkerError::Config(
                "overlap must be less than size".to_string(),
            ));
        }

        Ok(Self { size, overlap })
    }
}

impl Default for SlidingWindow {
    fn default() -> Self {
        Self {
            size: SLIDING_WINDOW_DEFAULT_SIZE,
            overlap: SLIDING_WINDOW_DEFAULT_OVERLAP,
        }
    }
}

impl SlidingWindow {
    /// Split `input` into overlapping chunks. Whitespace only input yields no chunks
    /// and input that fits in a single window yields exactly one.
    pub fn chunk<'a>(&self, input: &'a str) -> Vec<&'a str> {
        let SlidingWindow { size, overlap } = self;

        let input = input.trim();

        if input.is_empty() {
            return vec![];
        }

        // Return whole input if it fits
        if input.len() <= *size {
            return vec![input];
        }

        let mut chunks = vec![];
        let input_size = input.len();
        let mut start: usize = 0;

        loop {
            let mut chunk_start = start.saturating_sub(*overlap);
            let mut chunk_end = (start + size).min(input_size);

            // Snap to first char boundary
            while !input.is_char_boundary(chunk_start) {
                chunk_start -= 1;
            }

            // Snap to last char boundary
            while !input.is_char_boundary(chunk_end) {
                chunk_end += 1;
            }

            chunks.push(&input[chunk_start..chunk_end]);

            if chunk_end >= input_size {
                break;
            }

            start = chunk_end;
        }

        debug!(
            "Chunked {} chunks, avg chunk size: {}",
            chunks.len(),
            chunks.iter().fold(0, |acc, el| acc + el.len()) / chunks.len()
        );

        chunks
    }
}

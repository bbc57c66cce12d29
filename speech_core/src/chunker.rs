//! Re-framing of provider byte streams into bounded chunks.
//!
//! Providers deliver audio in whatever sizes their transport produces. The
//! framer buffers those bytes and emits [`AudioChunk`]s of a fixed target
//! size with monotonically increasing indices, holding back at least one
//! byte so the final chunk from [`ChunkFramer::finish`] always carries
//! `is_last` and a non-empty payload.

use crate::chunk::{AudioChunk, AudioFormat};

pub struct ChunkFramer {
    format: AudioFormat,
    target_len: usize,
    buf: Vec<u8>,
    next_index: u64,
}

impl ChunkFramer {
    pub const DEFAULT_CHUNK_BYTES: usize = 32 * 1024;

    pub fn new(format: AudioFormat, target_len: usize) -> Self {
        Self {
            format,
            target_len: target_len.max(1),
            buf: Vec::new(),
            next_index: 0,
        }
    }

    fn make(&mut self, payload: Vec<u8>, is_last: bool) -> AudioChunk {
        let index = self.next_index;
        self.next_index += 1;
        AudioChunk {
            index,
            payload,
            is_last,
            format: self.format,
        }
    }

    /// Feed provider bytes; returns every full chunk now ready to forward.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<AudioChunk> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        while self.buf.len() > self.target_len {
            let payload: Vec<u8> = self.buf.drain(..self.target_len).collect();
            out.push(self.make(payload, false));
        }
        out
    }

    /// Flush the remainder as the final chunk. `None` if nothing was pushed.
    pub fn finish(mut self) -> Option<AudioChunk> {
        if self.buf.is_empty() && self.next_index == 0 {
            return None;
        }
        let payload = std::mem::take(&mut self.buf);
        Some(self.make(payload, true))
    }

    pub fn chunks_emitted(&self) -> u64 {
        self.next_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framer(target: usize) -> ChunkFramer {
        ChunkFramer::new(AudioFormat::Wav, target)
    }

    #[test]
    fn reassembly_matches_input() {
        let input: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let mut f = framer(1024);
        let mut chunks = Vec::new();
        for part in input.chunks(333) {
            chunks.extend(f.push(part));
        }
        chunks.extend(f.finish());

        let rebuilt: Vec<u8> = chunks.iter().flat_map(|c| c.payload.clone()).collect();
        assert_eq!(rebuilt, input);
    }

    #[test]
    fn indices_are_monotone_and_only_final_is_last() {
        let mut f = framer(4);
        let mut chunks = f.push(&[0u8; 13]);
        chunks.extend(f.finish());

        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i as u64);
            assert_eq!(c.is_last, i == chunks.len() - 1);
            assert!(!c.payload.is_empty());
        }
    }

    #[test]
    fn exact_multiple_still_ends_with_last() {
        let mut f = framer(4);
        let mut chunks = f.push(&[7u8; 8]);
        chunks.extend(f.finish());
        // 8 bytes at target 4: one full chunk plus a final 4-byte last chunk.
        assert_eq!(chunks.len(), 2);
        assert!(chunks.last().unwrap().is_last);
        assert_eq!(chunks.iter().map(|c| c.payload.len()).sum::<usize>(), 8);
    }

    #[test]
    fn empty_stream_yields_nothing() {
        assert!(framer(4).finish().is_none());
    }

    #[test]
    fn single_byte_stream_is_one_last_chunk() {
        let mut f = framer(1024);
        assert!(f.push(&[42]).is_empty());
        let last = f.finish().unwrap();
        assert_eq!(last.index, 0);
        assert!(last.is_last);
        assert_eq!(last.payload, vec![42]);
    }
}

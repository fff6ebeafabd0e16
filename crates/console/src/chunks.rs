//! Chunk accumulation for streamed messages.
//!
//! A streaming utterance arrives as `message_chunk` events sharing one id.
//! Chunks for different ids interleave freely; a buffer only leaves this
//! module once its final chunk arrives. A partial whose final chunk never
//! shows up (connection drop) stays inert until the session is torn down -
//! truncated text must never be shown as a finished message.

use std::collections::HashMap;

/// Accumulates streamed message fragments keyed by message id.
#[derive(Debug, Default)]
pub struct ChunkAccumulator {
    buffers: HashMap<String, String>,
}

impl ChunkAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one chunk. Returns the completed content when `is_final`.
    pub fn absorb(&mut self, id: &str, content_chunk: &str, is_final: bool) -> Option<String> {
        if is_final {
            let mut content = self.buffers.remove(id).unwrap_or_default();
            content.push_str(content_chunk);
            Some(content)
        } else {
            self.buffers
                .entry(id.to_string())
                .or_default()
                .push_str(content_chunk);
            None
        }
    }

    /// Drop all partial buffers (session teardown).
    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    /// Number of ids with partial content still buffered.
    pub fn pending(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenates_in_arrival_order() {
        let mut acc = ChunkAccumulator::new();
        assert_eq!(acc.absorb("m1", "Hel", false), None);
        assert_eq!(acc.absorb("m1", "lo", true), Some("Hello".to_string()));
        assert_eq!(acc.pending(), 0);
    }

    #[test]
    fn interleaved_ids_do_not_block_each_other() {
        let mut acc = ChunkAccumulator::new();
        assert_eq!(acc.absorb("a", "one ", false), None);
        assert_eq!(acc.absorb("b", "two ", false), None);
        assert_eq!(acc.absorb("b", "done", true), Some("two done".to_string()));
        // "a" is still buffered and unaffected
        assert_eq!(acc.pending(), 1);
        assert_eq!(acc.absorb("a", "more", true), Some("one more".to_string()));
    }

    #[test]
    fn withheld_final_chunk_stays_inert() {
        let mut acc = ChunkAccumulator::new();
        assert_eq!(acc.absorb("m1", "partial", false), None);
        assert_eq!(acc.pending(), 1);
    }

    #[test]
    fn single_final_chunk_completes_immediately() {
        let mut acc = ChunkAccumulator::new();
        assert_eq!(acc.absorb("m1", "whole", true), Some("whole".to_string()));
    }

    #[test]
    fn clear_drops_partials() {
        let mut acc = ChunkAccumulator::new();
        acc.absorb("m1", "partial", false);
        acc.clear();
        assert_eq!(acc.pending(), 0);
        // A final chunk after clear yields only its own content
        assert_eq!(acc.absorb("m1", "tail", true), Some("tail".to_string()));
    }
}

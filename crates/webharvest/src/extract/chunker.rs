//! Token-aware splitting of normalized content.
//!
//! Content is cut into blocks (lines, with over-long lines broken on word
//! boundaries), and blocks are packed into chunks that never exceed the
//! token budget. Consecutive chunks share a tail of roughly `overlap`
//! tokens so records straddling a boundary are seen whole at least once.

use serde::Serialize;

/// Deterministic token estimate: `max(words, ceil(chars / 4))`.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let chars = text.chars().count();
    words.max(chars.div_ceil(4))
}

/// A contiguous, budget-bounded slice of the content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionChunk {
    pub index: usize,
    pub text: String,
    pub token_estimate: usize,
}

#[derive(Debug)]
struct Block {
    text: String,
    // Includes the joining newline so a packed chunk never exceeds its budget.
    cost: usize,
}

impl Block {
    fn new(text: String) -> Self {
        let words = text.split_whitespace().count();
        let chars = text.chars().count() + 1;
        Self {
            cost: words.max(chars.div_ceil(4)).max(1),
            text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(2);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size / 2),
        }
    }

    pub fn split(&self, text: &str) -> Vec<ExtractionChunk> {
        let blocks = self.blocks(text);
        if blocks.is_empty() {
            return Vec::new();
        }

        let mut ranges: Vec<(usize, usize)> = Vec::new();
        let mut start = 0;
        let mut total = 0;

        for (idx, block) in blocks.iter().enumerate() {
            if idx > start && total + block.cost > self.chunk_size {
                ranges.push((start, idx));
                start = self.overlap_start(&blocks, start, idx);
                total = blocks[start..idx].iter().map(|b| b.cost).sum();
                while start < idx && total + block.cost > self.chunk_size {
                    total -= blocks[start].cost;
                    start += 1;
                }
            }
            total += block.cost;
        }
        ranges.push((start, blocks.len()));

        ranges
            .into_iter()
            .enumerate()
            .map(|(index, (from, to))| {
                let text = blocks[from..to]
                    .iter()
                    .map(|b| b.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                ExtractionChunk {
                    index,
                    token_estimate: estimate_tokens(&text),
                    text,
                }
            })
            .collect()
    }

    /// First block of the tail of `start..end` worth about `overlap` tokens.
    fn overlap_start(&self, blocks: &[Block], start: usize, end: usize) -> usize {
        if self.overlap == 0 {
            return end;
        }
        let mut tokens = 0;
        let mut first = end;
        while first > start + 1 {
            let cost = blocks[first - 1].cost;
            if tokens + cost > self.overlap && tokens > 0 {
                break;
            }
            tokens += cost;
            first -= 1;
            if tokens >= self.overlap {
                break;
            }
        }
        first
    }

    /// Lines, with lines over budget broken into word groups that fit.
    fn blocks(&self, text: &str) -> Vec<Block> {
        let mut blocks = Vec::new();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let block = Block::new(line.to_string());
            if block.cost <= self.chunk_size {
                blocks.push(block);
                continue;
            }
            let mut piece = String::new();
            let (mut words, mut chars) = (0usize, 0usize);
            for word in line.split_whitespace() {
                for part in self.split_word(word) {
                    let part_chars = part.chars().count();
                    let next_words = words + 1;
                    let next_chars = if piece.is_empty() {
                        part_chars
                    } else {
                        chars + 1 + part_chars
                    };
                    let next_cost = next_words.max((next_chars + 1).div_ceil(4));
                    if next_cost > self.chunk_size && !piece.is_empty() {
                        blocks.push(Block::new(std::mem::take(&mut piece)));
                        piece.push_str(part);
                        words = 1;
                        chars = part_chars;
                    } else {
                        if !piece.is_empty() {
                            piece.push(' ');
                        }
                        piece.push_str(part);
                        words = next_words;
                        chars = next_chars;
                    }
                }
            }
            if !piece.is_empty() {
                blocks.push(Block::new(piece));
            }
        }
        blocks
    }

    /// A single word too long for one chunk, cut on char boundaries.
    fn split_word<'a>(&self, word: &'a str) -> Vec<&'a str> {
        let max_chars = (self.chunk_size * 4).saturating_sub(4).max(1);
        if word.chars().count() <= max_chars {
            return vec![word];
        }
        let mut parts = Vec::new();
        let mut rest = word;
        while !rest.is_empty() {
            let cut = rest
                .char_indices()
                .nth(max_chars)
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            let (head, tail) = rest.split_at(cut);
            parts.push(head);
            rest = tail;
        }
        parts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_lines(n: usize) -> String {
        (0..n)
            .map(|i| format!("line {i} alpha beta gamma"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("one two three"), 4); // 13 chars -> 4
        assert_eq!(estimate_tokens("a b c d e f"), 6); // words dominate
    }

    #[test]
    fn test_small_content_is_one_chunk() {
        let chunks = Chunker::new(1_000, 50).split("hello\nworld");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello\nworld");
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn test_chunks_respect_budget_and_order() {
        let text = numbered_lines(200);
        let chunker = Chunker::new(60, 10);
        let chunks = chunker.split(&text);
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.token_estimate <= 60, "chunk {i} is {}", chunk.token_estimate);
        }
        // Every line appears, first occurrences in document order.
        let mut last_seen = None;
        for i in 0..200 {
            let needle = format!("line {i} alpha");
            let pos = chunks
                .iter()
                .position(|c| c.text.lines().any(|l| l.starts_with(&needle)))
                .unwrap_or_else(|| panic!("line {i} missing"));
            if let Some(prev) = last_seen {
                assert!(pos >= prev);
            }
            last_seen = Some(pos);
        }
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let chunks = Chunker::new(60, 10).split(&numbered_lines(50));
        for pair in chunks.windows(2) {
            let last_line = pair[0].text.lines().last().unwrap();
            assert!(pair[1].text.lines().next() == Some(last_line));
        }
    }

    #[test]
    fn test_zero_overlap_partitions() {
        let text = numbered_lines(40);
        let chunks = Chunker::new(50, 0).split(&text);
        let rejoined = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(rejoined, text);
    }

    #[test]
    fn test_long_line_is_split_within_budget() {
        let line = "word ".repeat(500);
        let chunks = Chunker::new(40, 5).split(&line);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.token_estimate <= 40));
        let blob = "x".repeat(1_000);
        let chunks = Chunker::new(40, 0).split(&blob);
        assert!(chunks.iter().all(|c| c.token_estimate <= 40));
        assert_eq!(chunks.iter().map(|c| c.text.len()).sum::<usize>(), 1_000);
    }

    #[test]
    fn test_deterministic() {
        let text = numbered_lines(120);
        let chunker = Chunker::new(70, 15);
        assert_eq!(chunker.split(&text), chunker.split(&text));
    }
}

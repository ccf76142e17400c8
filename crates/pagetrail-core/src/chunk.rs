//! Adaptive block chunker.
//!
//! Groups a document's blocks, in reading order, into [`Chunk`]s bounded by
//! a token budget. Each chunk records the ordered ids of the blocks it was
//! built from, so any chunk traces back to exact blocks and pages.
//!
//! # Algorithm
//!
//! 1. Walk blocks in `(page_number, ordinal)` order.
//! 2. Close the current chunk before a block that would push it past
//!    `max_tokens`, and after any block that brings it to `target_tokens`.
//! 3. A block larger than `max_tokens` on its own is split: text at
//!    sentence boundaries (falling back to word windows), tables at row
//!    boundaries. Its fragments form their own chunks.
//! 4. Zero-token placeholder blocks join a neighbouring chunk: the previous
//!    one, or the next one when they lead the document.
//! 5. Tokens are whitespace-delimited words. Fragments never cut a word,
//!    so token counts across chunks sum to the document total.
//! 6. With an overlap window, each chunk after the first carries the
//!    previous chunk's trailing tokens in `overlap_context`, outside
//!    `token_count` and provenance.
//! 7. Later fragments of a split table carry the table's header row in
//!    `overlap_context` instead, so each fragment keeps its column names.
//!
//! # Example
//!
//! ```rust
//! use pagetrail_core::chunk::{chunk_blocks, ChunkParams};
//!
//! let chunks = chunk_blocks("doc-123", &[], &ChunkParams::default());
//! assert!(chunks.is_empty());
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Block, BlockType, Chunk};

/// Default soft size of a chunk.
pub const DEFAULT_TARGET_TOKENS: usize = 256;
/// Default hard ceiling of a chunk.
pub const DEFAULT_MAX_TOKENS: usize = 512;

/// Token bounds for one chunking run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkParams {
    pub target_tokens: usize,
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            target_tokens: DEFAULT_TARGET_TOKENS,
            max_tokens: DEFAULT_MAX_TOKENS,
            overlap_tokens: 0,
        }
    }
}

impl ChunkParams {
    /// Reject bounds the chunker cannot honor.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_tokens == 0 {
            return Err("max_tokens must be > 0".to_string());
        }
        if self.target_tokens == 0 || self.target_tokens > self.max_tokens {
            return Err(format!(
                "target_tokens must be in 1..={} (got {})",
                self.max_tokens, self.target_tokens
            ));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(format!(
                "overlap_tokens must be < max_tokens ({} >= {})",
                self.overlap_tokens, self.max_tokens
            ));
        }
        Ok(())
    }
}

/// Whitespace-delimited token count.
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Piece of block content placed into a chunk.
struct Piece<'a> {
    block_id: &'a str,
    text: String,
    tokens: usize,
    /// Context repeated on the chunk, outside its tokens.
    context: Option<String>,
}

impl<'a> Piece<'a> {
    fn new(block_id: &'a str, text: String) -> Self {
        let tokens = estimate_tokens(&text);
        Self {
            block_id,
            text,
            tokens,
            context: None,
        }
    }
}

/// Accumulates pieces into chunks with contiguous positions.
struct ChunkBuilder<'a> {
    document_id: &'a str,
    pending: Vec<Piece<'a>>,
    pending_tokens: usize,
    chunks: Vec<Chunk>,
}

impl<'a> ChunkBuilder<'a> {
    fn new(document_id: &'a str) -> Self {
        Self {
            document_id,
            pending: Vec::new(),
            pending_tokens: 0,
            chunks: Vec::new(),
        }
    }

    fn push(&mut self, piece: Piece<'a>) {
        self.pending_tokens += piece.tokens;
        self.pending.push(piece);
    }

    /// Close the pending chunk. Leading placeholders stay pending until a
    /// piece with content arrives.
    fn flush(&mut self) {
        if self.pending_tokens == 0 && self.chunks.is_empty() {
            return;
        }
        self.emit();
    }

    fn emit(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let pieces = std::mem::take(&mut self.pending);
        let tokens = std::mem::take(&mut self.pending_tokens);

        // Trailing zero-token placeholders join the previous chunk rather
        // than forming an empty one.
        if tokens == 0 {
            if let Some(last) = self.chunks.last_mut() {
                for piece in pieces {
                    push_unique(&mut last.source_block_ids, piece.block_id);
                }
                return;
            }
        }

        let mut ids: Vec<String> = Vec::new();
        for piece in &pieces {
            push_unique(&mut ids, piece.block_id);
        }
        let content = pieces
            .iter()
            .filter(|p| !p.text.is_empty())
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let position = self.chunks.len() as i64;
        let mut chunk = make_chunk(self.document_id, position, tokens, ids, content);
        chunk.overlap_context = pieces.into_iter().find_map(|p| p.context);
        self.chunks.push(chunk);
    }

    fn finish(mut self) -> Vec<Chunk> {
        self.emit();
        self.chunks
    }
}

fn push_unique(ids: &mut Vec<String>, id: &str) {
    if ids.last().map(|last| last.as_str()) != Some(id) {
        ids.push(id.to_string());
    }
}

/// Chunk a document's blocks. `blocks` must already be in reading order.
pub fn chunk_blocks(document_id: &str, blocks: &[Block], params: &ChunkParams) -> Vec<Chunk> {
    let max = params.max_tokens.max(1);
    let target = params.target_tokens.clamp(1, max);
    let mut builder = ChunkBuilder::new(document_id);

    for block in blocks {
        let text = block.content.trim();
        let tokens = estimate_tokens(text);

        if tokens > max {
            builder.flush();
            let header = match block.block_type {
                BlockType::Table => table_header(text),
                _ => None,
            };
            for (i, fragment) in split_block(block.block_type, text, max).into_iter().enumerate() {
                let mut piece = Piece::new(&block.id, fragment);
                if i > 0 {
                    piece.context = header.clone();
                }
                builder.push(piece);
                builder.flush();
            }
            continue;
        }

        if builder.pending_tokens + tokens > max {
            builder.flush();
        }
        builder.push(Piece::new(&block.id, text.to_string()));
        if builder.pending_tokens >= target {
            builder.flush();
        }
    }

    let mut chunks = builder.finish();
    if params.overlap_tokens > 0 {
        apply_overlap(&mut chunks, params.overlap_tokens);
    }
    chunks
}

/// Table header context wins over the word overlap.
fn apply_overlap(chunks: &mut [Chunk], overlap_tokens: usize) {
    for i in 1..chunks.len() {
        if chunks[i].overlap_context.is_some() {
            continue;
        }
        let words: Vec<&str> = chunks[i - 1].content.split_whitespace().collect();
        let start = words.len().saturating_sub(overlap_tokens);
        let tail = words[start..].join(" ");
        chunks[i].overlap_context = if tail.is_empty() { None } else { Some(tail) };
    }
}

/// First non-blank row of a table block.
fn table_header(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

/// Split oversized block content into fragments of at most `max` tokens.
///
/// Table rows are never cut; a single row over budget stays whole.
pub fn split_block(block_type: BlockType, text: &str, max: usize) -> Vec<String> {
    let units: Vec<String> = match block_type {
        BlockType::Table => text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.to_string())
            .collect(),
        _ => split_sentences(text)
            .into_iter()
            .flat_map(|s| word_windows(&s, max))
            .collect(),
    };
    let separator = if block_type == BlockType::Table { "\n" } else { " " };
    pack_units(&units, max, separator)
}

/// Greedily pack units into groups of at most `max` tokens.
fn pack_units(units: &[String], max: usize, separator: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_tokens = 0usize;
    for unit in units {
        let tokens = estimate_tokens(unit);
        if !current.is_empty() && current_tokens + tokens > max {
            out.push(current.join(separator));
            current.clear();
            current_tokens = 0;
        }
        current.push(unit);
        current_tokens += tokens;
    }
    if !current.is_empty() {
        out.push(current.join(separator));
    }
    out
}

/// Split text after `.`, `!` or `?` followed by whitespace, and at line
/// breaks. Boundaries always fall on whitespace.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\n' {
            flush_sentence(&mut sentences, &mut current);
            continue;
        }
        current.push(ch);
        let at_end = matches!(ch, '.' | '!' | '?');
        if at_end && chars.peek().map_or(true, |next| next.is_whitespace()) {
            flush_sentence(&mut sentences, &mut current);
        }
    }
    flush_sentence(&mut sentences, &mut current);
    sentences
}

fn flush_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    current.clear();
}

/// Cut a sentence into windows of at most `max` words.
fn word_windows(sentence: &str, max: usize) -> Vec<String> {
    let words: Vec<&str> = sentence.split_whitespace().collect();
    if words.len() <= max {
        return vec![words.join(" ")];
    }
    words.chunks(max).map(|w| w.join(" ")).collect()
}

fn make_chunk(
    document_id: &str,
    position: i64,
    tokens: usize,
    source_block_ids: Vec<String>,
    content: String,
) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        position,
        token_count: tokens as i64,
        source_block_ids,
        content,
        overlap_context: None,
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn block(id: &str, page: i64, block_type: BlockType, content: &str) -> Block {
        Block {
            id: id.to_string(),
            document_id: "doc1".to_string(),
            page_number: page,
            ordinal: 0,
            block_type,
            content: content.to_string(),
            extraction_method: "pdf_text".to_string(),
            confidence: 90.0,
        }
    }

    fn words(n: usize, tag: &str) -> String {
        (0..n).map(|i| format!("{tag}{i}")).collect::<Vec<_>>().join(" ")
    }

    fn params(target: usize, max: usize) -> ChunkParams {
        ChunkParams {
            target_tokens: target,
            max_tokens: max,
            overlap_tokens: 0,
        }
    }

    #[test]
    fn small_blocks_merge_until_target() {
        let blocks = vec![
            block("b1", 1, BlockType::Text, &words(4, "a")),
            block("b2", 1, BlockType::Text, &words(4, "b")),
            block("b3", 2, BlockType::Text, &words(4, "c")),
        ];
        let chunks = chunk_blocks("doc1", &blocks, &params(8, 20));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].source_block_ids, vec!["b1", "b2"]);
        assert_eq!(chunks[0].token_count, 8);
        assert_eq!(chunks[1].source_block_ids, vec!["b3"]);
        assert_eq!(chunks[1].position, 1);
    }

    #[test]
    fn closes_before_exceeding_max() {
        let blocks = vec![
            block("b1", 1, BlockType::Text, &words(6, "a")),
            block("b2", 1, BlockType::Text, &words(6, "b")),
        ];
        let chunks = chunk_blocks("doc1", &blocks, &params(10, 10));
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.token_count <= 10));
    }

    #[test]
    fn token_sum_and_partition_are_exact() {
        let blocks: Vec<Block> = (0..30)
            .map(|i| block(&format!("b{i}"), i / 3 + 1, BlockType::Text, &words(i as usize % 7 + 1, "w")))
            .collect();
        let total: usize = blocks.iter().map(|b| estimate_tokens(&b.content)).sum();
        let chunks = chunk_blocks("doc1", &blocks, &params(10, 16));

        let chunk_total: i64 = chunks.iter().map(|c| c.token_count).sum();
        assert_eq!(chunk_total as usize, total);

        let ids: Vec<&String> = chunks.iter().flat_map(|c| c.source_block_ids.iter()).collect();
        let unique: HashSet<&String> = ids.iter().copied().collect();
        assert_eq!(ids.len(), blocks.len(), "no block duplicated");
        assert_eq!(unique.len(), blocks.len(), "no block omitted");

        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.position, i as i64);
            assert!(c.token_count <= 16);
        }
    }

    #[test]
    fn oversized_text_splits_at_sentences() {
        let text = format!("{}. {}. {}.", words(5, "a"), words(5, "b"), words(5, "c"));
        let blocks = vec![block("big", 1, BlockType::Text, &text)];
        let chunks = chunk_blocks("doc1", &blocks, &params(8, 10));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].token_count, 10);
        assert_eq!(chunks[1].token_count, 5);
        assert!(chunks[0].content.ends_with("b4."));
        assert!(chunks.iter().all(|c| c.source_block_ids == vec!["big"]));
    }

    #[test]
    fn run_on_sentence_falls_back_to_word_windows() {
        let blocks = vec![block("big", 1, BlockType::Text, &words(25, "x"))];
        let chunks = chunk_blocks("doc1", &blocks, &params(10, 10));
        let counts: Vec<i64> = chunks.iter().map(|c| c.token_count).collect();
        assert_eq!(counts, vec![10, 10, 5]);
    }

    #[test]
    fn tables_split_only_at_rows() {
        let rows: Vec<String> = (0..6).map(|i| format!("r{i}a,r{i}b r{i}c,r{i}d")).collect();
        let table = rows.join("\n");
        let blocks = vec![block("t1", 1, BlockType::Table, &table)];
        let chunks = chunk_blocks("doc1", &blocks, &params(4, 5));
        for chunk in &chunks {
            for line in chunk.content.lines() {
                assert!(rows.contains(&line.to_string()), "row cut: {line}");
            }
        }
        let total: i64 = chunks.iter().map(|c| c.token_count).sum();
        assert_eq!(total, 12);
    }

    #[test]
    fn oversized_single_row_is_kept_whole() {
        let row = words(12, "cell");
        let blocks = vec![block("t1", 1, BlockType::Table, &row)];
        let chunks = chunk_blocks("doc1", &blocks, &params(4, 5));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, row);
    }

    #[test]
    fn placeholder_blocks_keep_provenance() {
        let blocks = vec![
            block("b1", 1, BlockType::Text, &words(3, "a")),
            block("gap", 2, BlockType::Empty, ""),
        ];
        let chunks = chunk_blocks("doc1", &blocks, &params(8, 20));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_block_ids, vec!["b1", "gap"]);
        assert_eq!(chunks[0].token_count, 3);
    }

    #[test]
    fn trailing_placeholder_attaches_to_last_chunk() {
        let blocks = vec![
            block("b1", 1, BlockType::Text, &words(8, "a")),
            block("scan", 2, BlockType::ScannedImage, ""),
        ];
        let chunks = chunk_blocks("doc1", &blocks, &params(8, 20));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_block_ids, vec!["b1", "scan"]);
    }

    #[test]
    fn leading_placeholder_joins_split_block() {
        let blocks = vec![
            block("scan", 1, BlockType::ScannedImage, ""),
            block("big", 2, BlockType::Text, &words(700, "w")),
        ];
        let chunks = chunk_blocks("doc1", &blocks, &ChunkParams::default());
        let counts: Vec<i64> = chunks.iter().map(|c| c.token_count).collect();
        assert_eq!(counts, vec![512, 188]);
        assert_eq!(chunks[0].source_block_ids, vec!["scan", "big"]);
        assert_eq!(chunks[0].position, 0);
        assert_eq!(chunks[1].source_block_ids, vec!["big"]);
        assert!(chunks.iter().all(|c| !c.content.is_empty()));
    }

    #[test]
    fn leading_placeholders_join_first_chunk() {
        let blocks = vec![
            block("e1", 1, BlockType::Empty, ""),
            block("e2", 2, BlockType::ScannedImage, ""),
            block("b1", 3, BlockType::Text, &words(3, "a")),
        ];
        let chunks = chunk_blocks("doc1", &blocks, &params(2, 4));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_block_ids, vec!["e1", "e2", "b1"]);
        assert_eq!(chunks[0].token_count, 3);
    }

    #[test]
    fn split_table_repeats_header_row() {
        let rows: Vec<String> = (0..6).map(|i| format!("r{i}a,r{i}b r{i}c,r{i}d")).collect();
        let blocks = vec![block("t1", 1, BlockType::Table, &rows.join("\n"))];
        let chunks = chunk_blocks("doc1", &blocks, &params(4, 5));

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].overlap_context, None);
        assert!(chunks[0].content.starts_with(&rows[0]));
        for chunk in &chunks[1..] {
            assert_eq!(chunk.overlap_context.as_deref(), Some(rows[0].as_str()));
            assert!(!chunk.content.contains(&rows[0]));
        }
        let total: i64 = chunks.iter().map(|c| c.token_count).sum();
        assert_eq!(total, 12);
    }

    #[test]
    fn table_header_wins_over_word_overlap() {
        let rows: Vec<String> = (0..4).map(|i| format!("h{i}x h{i}y")).collect();
        let blocks = vec![block("t1", 1, BlockType::Table, &rows.join("\n"))];
        let p = ChunkParams {
            target_tokens: 4,
            max_tokens: 4,
            overlap_tokens: 1,
        };
        let chunks = chunk_blocks("doc1", &blocks, &p);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].overlap_context.as_deref(), Some("h0x h0y"));
    }

    #[test]
    fn overlap_is_outside_token_count() {
        let blocks = vec![
            block("b1", 1, BlockType::Text, &words(5, "a")),
            block("b2", 1, BlockType::Text, &words(5, "b")),
        ];
        let p = ChunkParams {
            target_tokens: 5,
            max_tokens: 5,
            overlap_tokens: 2,
        };
        let chunks = chunk_blocks("doc1", &blocks, &p);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].overlap_context, None);
        assert_eq!(chunks[1].overlap_context.as_deref(), Some("a3 a4"));
        assert_eq!(chunks[1].token_count, 5);
    }

    #[test]
    fn deterministic_content_and_hash() {
        let blocks = vec![
            block("b1", 1, BlockType::Text, "Alpha beta."),
            block("b2", 1, BlockType::Text, "Gamma delta."),
        ];
        let c1 = chunk_blocks("doc1", &blocks, &params(2, 3));
        let c2 = chunk_blocks("doc1", &blocks, &params(2, 3));
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.content, b.content);
            assert_eq!(a.hash, b.hash);
            assert_eq!(a.source_block_ids, b.source_block_ids);
        }
    }

    #[test]
    fn params_validation() {
        assert!(params(256, 512).validate().is_ok());
        assert!(params(0, 512).validate().is_err());
        assert!(params(600, 512).validate().is_err());
        assert!(params(10, 0).validate().is_err());
        let p = ChunkParams {
            target_tokens: 10,
            max_tokens: 10,
            overlap_tokens: 10,
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn sentence_split_respects_abbreviations_without_space() {
        let s = split_sentences("Version 1.2 shipped. Next one?\nMaybe");
        assert_eq!(s, vec!["Version 1.2 shipped.", "Next one?", "Maybe"]);
    }
}

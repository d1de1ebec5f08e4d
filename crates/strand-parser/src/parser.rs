//! Character-level block parser.
//!
//! [`BlockParser`] classifies an append-only text stream into ordered
//! blocks: free text, and fenced JSON. Input is consumed one `char` at a time
//! because a fence marker can be split across chunk boundaries, so feeding a
//! text in one chunk or one character at a time produces the same blocks.
//!
//! ```text
//!            `             `              `            \n (tag == json)
//!   Text ─────────▶ MaybeFence ─▶ (x3) FenceType ───────────────▶ InJsonBlock ◀─┐
//!    ▲  ◀── other ──┘                    │ \n (other tag)              │ `      │ other
//!    │                                   ▼                             ▼        │
//!    └──────── ``` ──────────── InOtherCodeBlock      Text ◀─ ``` ─ MaybeEndFence
//! ```
//!
//! Non-JSON fences are swallowed. Each block id is derived from the parser's
//! instance id, the block kind and its index, so the id of the block being
//! streamed is known before it is finalized and stays the same afterwards.

use serde_json::Value;
use strand_core::{Block, BlockKind};
use strand_settings::ParserSettings;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{ParseError, Result};
use crate::repair::parse_partial_json;

const FENCE_LEN: usize = 3;

/// Parser phase. Exactly one is active at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParserState {
    /// Plain prose.
    Text,
    /// One or two backticks seen in prose.
    MaybeFence,
    /// Reading the language tag after an opening fence.
    FenceType,
    /// Inside a JSON fence.
    InJsonBlock,
    /// One or two backticks seen inside a JSON fence.
    MaybeEndFence,
    /// Inside a non-JSON fence (content discarded).
    InOtherCodeBlock,
}

/// Buffer caps, in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParserLimits {
    /// Soft cap on the free-text buffer.
    pub text_buffer_limit: usize,
    /// Hard cap on the in-fence buffer.
    pub structured_buffer_limit: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self::from(&ParserSettings::default())
    }
}

impl From<&ParserSettings> for ParserLimits {
    fn from(settings: &ParserSettings) -> Self {
        Self {
            text_buffer_limit: settings.text_buffer_limit,
            structured_buffer_limit: settings.structured_buffer_limit,
        }
    }
}

/// Incremental text → block classifier.
#[derive(Debug)]
pub struct BlockParser {
    instance_id: String,
    limits: ParserLimits,
    state: ParserState,
    text_buffer: String,
    fence_buffer: String,
    fence_tag: String,
    json_buffer: String,
    end_ticks: usize,
    other_ticks: usize,
    blocks: Vec<Block>,
    next_index: u32,
    json_complete: bool,
}

impl Default for BlockParser {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockParser {
    /// Parser with default limits and a random instance id.
    pub fn new() -> Self {
        Self::with_limits(ParserLimits::default())
    }

    /// Parser with explicit limits and a random instance id.
    pub fn with_limits(limits: ParserLimits) -> Self {
        Self::with_instance_id(Uuid::now_v7().to_string(), limits)
    }

    /// Parser with a caller-chosen instance id (block ids become reproducible).
    pub fn with_instance_id(instance_id: impl Into<String>, limits: ParserLimits) -> Self {
        Self {
            instance_id: instance_id.into(),
            limits,
            state: ParserState::Text,
            text_buffer: String::new(),
            fence_buffer: String::new(),
            fence_tag: String::new(),
            json_buffer: String::new(),
            end_ticks: 0,
            other_ticks: 0,
            blocks: Vec::new(),
            next_index: 0,
            json_complete: false,
        }
    }

    /// Instance id every block id is derived from.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Current phase.
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Feed a chunk of model output.
    ///
    /// Fails only when an open JSON fence outgrows its cap; characters after
    /// the failing one are not consumed.
    pub fn append(&mut self, chunk: &str) -> Result<()> {
        for ch in chunk.chars() {
            self.step(ch)?;
        }
        Ok(())
    }

    fn step(&mut self, ch: char) -> Result<()> {
        match self.state {
            ParserState::Text => {
                if ch == '`' {
                    self.fence_buffer.push(ch);
                    self.state = ParserState::MaybeFence;
                } else {
                    self.push_text(ch);
                }
            }
            ParserState::MaybeFence => {
                if ch == '`' {
                    self.fence_buffer.push(ch);
                    if self.fence_buffer.len() == FENCE_LEN {
                        self.fence_buffer.clear();
                        self.fence_tag.clear();
                        self.state = ParserState::FenceType;
                    }
                } else {
                    let pending = std::mem::take(&mut self.fence_buffer);
                    for tick in pending.chars() {
                        self.push_text(tick);
                    }
                    self.push_text(ch);
                    self.state = ParserState::Text;
                }
            }
            ParserState::FenceType => {
                if ch == '\n' {
                    let tag = self.fence_tag.trim().to_lowercase();
                    if tag == "json" {
                        self.flush_text_block();
                        self.json_buffer.clear();
                        self.state = ParserState::InJsonBlock;
                        debug!(index = self.next_index, "json fence opened");
                    } else {
                        self.other_ticks = 0;
                        self.state = ParserState::InOtherCodeBlock;
                        debug!(tag = %tag, "non-json fence skipped");
                    }
                } else {
                    self.fence_tag.push(ch);
                }
            }
            ParserState::InJsonBlock => {
                if ch == '`' {
                    self.end_ticks = 1;
                    self.state = ParserState::MaybeEndFence;
                } else {
                    self.push_json(ch)?;
                }
            }
            ParserState::MaybeEndFence => {
                if ch == '`' {
                    self.end_ticks += 1;
                    if self.end_ticks == FENCE_LEN {
                        self.end_ticks = 0;
                        self.finalize_json();
                        self.state = ParserState::Text;
                    }
                } else {
                    // Backticks inside a string value, not a closing fence.
                    for _ in 0..self.end_ticks {
                        self.push_json('`')?;
                    }
                    self.end_ticks = 0;
                    self.push_json(ch)?;
                    self.state = ParserState::InJsonBlock;
                }
            }
            ParserState::InOtherCodeBlock => {
                if ch == '`' {
                    self.other_ticks += 1;
                    if self.other_ticks == FENCE_LEN {
                        self.other_ticks = 0;
                        self.state = ParserState::Text;
                    }
                } else {
                    self.other_ticks = 0;
                }
            }
        }
        Ok(())
    }

    fn push_text(&mut self, ch: char) {
        self.text_buffer.push(ch);
        if self.text_buffer.len() > self.limits.text_buffer_limit {
            self.trim_text_front();
        }
    }

    /// Drop the oldest free text down to three quarters of the cap, cutting
    /// just after a whitespace character.
    fn trim_text_front(&mut self) {
        let limit = self.limits.text_buffer_limit;
        let keep = limit - limit / 4;
        let excess = self.text_buffer.len().saturating_sub(keep);
        let cut = self
            .text_buffer
            .char_indices()
            .skip_while(|(i, _)| *i < excess)
            .find(|(_, c)| c.is_whitespace())
            .map_or_else(
                || {
                    (excess..=self.text_buffer.len())
                        .find(|i| self.text_buffer.is_char_boundary(*i))
                        .unwrap_or(self.text_buffer.len())
                },
                |(i, c)| i + c.len_utf8(),
            );
        self.text_buffer.replace_range(..cut, "");
        debug!(dropped = cut, kept = self.text_buffer.len(), "free-text buffer trimmed");
    }

    fn push_json(&mut self, ch: char) -> Result<()> {
        let limit = self.limits.structured_buffer_limit;
        if self.json_buffer.len() + ch.len_utf8() > limit {
            warn!(limit, "structured block exceeded buffer cap");
            return Err(ParseError::StructuredOverflow { limit });
        }
        self.json_buffer.push(ch);
        Ok(())
    }

    fn block_id(&self, kind: BlockKind, index: u32) -> String {
        format!("{}:{}:{index}", self.instance_id, kind.as_str())
    }

    fn flush_text_block(&mut self) {
        let text = self.text_buffer.trim();
        if !text.is_empty() {
            let id = self.block_id(BlockKind::Text, self.next_index);
            self.blocks.push(Block::text(id, self.next_index, text));
            self.next_index += 1;
        }
        self.text_buffer.clear();
    }

    fn finalize_json(&mut self) {
        let source = self.json_buffer.trim().to_string();
        self.json_buffer.clear();
        if source.is_empty() {
            debug!("empty json fence ignored");
            return;
        }
        let data = parse_partial_json(&source);
        if data.is_none() {
            warn!(
                index = self.next_index,
                preview = %source.chars().take(80).collect::<String>(),
                "json fence did not parse, keeping source only"
            );
        }
        let id = self.block_id(BlockKind::Structured, self.next_index);
        self.blocks
            .push(Block::structured(id, self.next_index, data, source));
        self.next_index += 1;
        self.json_complete = true;
        debug!(index = self.next_index - 1, "json fence finalized");
    }

    /// Live free-text buffer (text since the last fence, untrimmed).
    pub fn streaming_text(&self) -> &str {
        &self.text_buffer
    }

    /// Best-effort parse of the open JSON fence, without finalizing it.
    ///
    /// `None` outside a JSON fence or when the content cannot be repaired yet.
    pub fn try_parse_partial_json(&self) -> Option<Value> {
        if self.is_in_json_block() {
            parse_partial_json(&self.json_buffer)
        } else {
            None
        }
    }

    /// Raw content of the open JSON fence so far.
    pub fn partial_json_source(&self) -> Option<&str> {
        self.is_in_json_block().then_some(self.json_buffer.as_str())
    }

    /// Whether a JSON fence is open.
    pub fn is_in_json_block(&self) -> bool {
        matches!(
            self.state,
            ParserState::InJsonBlock | ParserState::MaybeEndFence
        )
    }

    /// Whether a JSON fence has been finalized since creation or the last reset.
    pub fn is_json_complete(&self) -> bool {
        self.json_complete
    }

    /// Id the pending free-text segment will carry once it becomes a block.
    pub fn pending_text_block_id(&self) -> String {
        self.block_id(BlockKind::Text, self.next_index)
    }

    /// Id the open JSON fence will carry once finalized.
    pub fn pending_structured_block_id(&self) -> String {
        self.block_id(BlockKind::Structured, self.next_index)
    }

    /// Index the next block will be assigned.
    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    /// Blocks finalized so far, in the order they were produced.
    pub fn finalized_blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Finalize a JSON fence the input never closed. Backticks of a partial
    /// closing fence are dropped. No-op outside a JSON fence.
    pub fn close_open_fence(&mut self) {
        if !self.is_in_json_block() {
            return;
        }
        debug!(index = self.next_index, "closing unterminated json fence");
        self.end_ticks = 0;
        self.finalize_json();
        self.state = ParserState::Text;
    }

    /// Finalized blocks plus any non-empty trailing free text, by index.
    pub fn blocks(&self) -> Vec<Block> {
        let mut blocks = self.blocks.clone();
        let mut trailing = self.text_buffer.clone();
        if self.state == ParserState::MaybeFence {
            trailing.push_str(&self.fence_buffer);
        }
        let trailing = trailing.trim();
        if !trailing.is_empty() {
            blocks.push(Block::text(
                self.pending_text_block_id(),
                self.next_index,
                trailing,
            ));
        }
        strand_core::block::sort_by_index(&mut blocks);
        blocks
    }

    /// Clear blocks and buffers. The instance id, and therefore the block id
    /// scheme, is kept.
    pub fn reset(&mut self) {
        self.state = ParserState::Text;
        self.text_buffer.clear();
        self.fence_buffer.clear();
        self.fence_tag.clear();
        self.json_buffer.clear();
        self.end_ticks = 0;
        self.other_ticks = 0;
        self.blocks.clear();
        self.next_index = 0;
        self.json_complete = false;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn parser() -> BlockParser {
        BlockParser::with_instance_id("p", ParserLimits::default())
    }

    fn feed(chunks: &[&str]) -> BlockParser {
        let mut p = parser();
        for c in chunks {
            p.append(c).unwrap();
        }
        p
    }

    #[test]
    fn end_to_end_three_blocks() {
        let p = feed(&["Hello ", "world\n```json\n{\"x\":", "1}\n```\nbye"]);
        let blocks = p.blocks();
        assert_eq!(blocks.len(), 3);

        assert_eq!(blocks[0].kind, BlockKind::Text);
        assert_eq!(blocks[0].text.as_deref(), Some("Hello world"));
        assert_eq!(blocks[0].index, 0);

        assert_eq!(blocks[1].kind, BlockKind::Structured);
        assert_eq!(blocks[1].data, Some(json!({"x": 1})));
        assert_eq!(blocks[1].source_text.as_deref(), Some("{\"x\":1}"));
        assert_eq!(blocks[1].index, 1);

        assert_eq!(blocks[2].kind, BlockKind::Text);
        assert_eq!(blocks[2].text.as_deref(), Some("bye"));
        assert_eq!(blocks[2].index, 2);
    }

    #[test]
    fn single_fence_round_trip() {
        let p = feed(&["```json\n{\"a\":1,\"b\":[2,3]}\n```"]);
        let blocks = p.blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].data, Some(json!({"a": 1, "b": [2, 3]})));
        assert_eq!(blocks[0].source_text.as_deref(), Some("{\"a\":1,\"b\":[2,3]}"));
        assert!(p.is_json_complete());
    }

    #[test]
    fn partial_fence_is_repaired_then_completes() {
        let mut p = feed(&["```json\n{\"a\": 1, \"b\": [2, 3"]);
        assert!(p.is_in_json_block());
        assert!(!p.is_json_complete());
        assert_eq!(p.try_parse_partial_json(), Some(json!({"a": 1, "b": [2, 3]})));
        assert!(p.blocks().is_empty());

        p.append("]}\n```").unwrap();
        assert!(p.is_json_complete());
        assert!(!p.is_in_json_block());
        assert_eq!(p.try_parse_partial_json(), None);

        p.append("\nmore text").unwrap();
        assert!(p.is_json_complete());
        p.reset();
        assert!(!p.is_json_complete());
    }

    #[test]
    fn stray_backticks_stay_in_text() {
        let p = feed(&["use `x` and ``y`` here"]);
        let blocks = p.blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text.as_deref(), Some("use `x` and ``y`` here"));
    }

    #[test]
    fn backticks_inside_json_strings_survive() {
        let p = feed(&["```json\n{\"code\": \"run `ls` or ``pwd``\"}\n```"]);
        let blocks = p.blocks();
        assert_eq!(blocks[0].data, Some(json!({"code": "run `ls` or ``pwd``"})));
    }

    #[test]
    fn non_json_fence_is_swallowed() {
        let p = feed(&["before\n```python\nprint('hi')\n```\nafter"]);
        let blocks = p.blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text.as_deref(), Some("before\n\nafter"));
    }

    #[test]
    fn fence_tag_is_case_insensitive_and_trimmed() {
        let p = feed(&["``` JSON \n[1]\n```"]);
        assert_eq!(p.blocks()[0].data, Some(json!([1])));
    }

    #[test]
    fn unparseable_fence_keeps_source_without_data() {
        let p = feed(&["```json\n{\"a\": tru\n```"]);
        let blocks = p.blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].data, None);
        assert_eq!(blocks[0].source_text.as_deref(), Some("{\"a\": tru"));
    }

    #[test]
    fn truncated_fence_is_repaired_at_finalization() {
        let p = feed(&["```json\n{\"a\": [1, 2\n```"]);
        assert_eq!(p.blocks()[0].data, Some(json!({"a": [1, 2]})));
    }

    #[test]
    fn empty_fence_yields_no_block() {
        let p = feed(&["```json\n  \n```done"]);
        let blocks = p.blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::Text);
        assert!(!p.is_json_complete());
    }

    #[test]
    fn each_fence_gets_its_own_id() {
        let p = feed(&["```json\n{\"a\":1}\n```\n```json\n{\"b\":2}\n```"]);
        let blocks = p.blocks();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].id, "p:structured:0");
        assert_eq!(blocks[1].id, "p:structured:1");
    }

    #[test]
    fn pending_ids_match_final_ids() {
        let mut p = feed(&["intro\n```json\n{\"a\":"]);
        let pending = p.pending_structured_block_id();
        p.append("1}\n```\ntail").unwrap();
        let text_pending = p.pending_text_block_id();
        let blocks = p.blocks();
        assert_eq!(blocks[1].id, pending);
        assert_eq!(blocks[2].id, text_pending);
    }

    #[test]
    fn reset_reuses_id_scheme() {
        let mut p = feed(&["```json\n{}\n```"]);
        let first = p.blocks()[0].id.clone();
        p.reset();
        assert!(p.blocks().is_empty());
        assert_eq!(p.state(), ParserState::Text);
        p.append("```json\n{}\n```").unwrap();
        assert_eq!(p.blocks()[0].id, first);
    }

    #[test]
    fn close_open_fence_finalizes_and_drops_partial_ticks() {
        let mut p = feed(&["note\n```json\n{\"a\": [1, 2]}\n``"]);
        assert_eq!(p.finalized_blocks().len(), 1);
        p.close_open_fence();
        assert_eq!(p.state(), ParserState::Text);
        assert!(p.is_json_complete());
        let blocks = p.blocks();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].data, Some(json!({"a": [1, 2]})));
        assert_eq!(blocks[1].source_text.as_deref(), Some("{\"a\": [1, 2]}"));

        p.close_open_fence();
        assert_eq!(p.blocks().len(), 2);
    }

    #[test]
    fn trailing_backtick_counts_as_text() {
        let p = feed(&["cost: 5`"]);
        assert_eq!(p.blocks()[0].text.as_deref(), Some("cost: 5`"));
    }

    #[test]
    fn streaming_text_is_live_buffer() {
        let mut p = feed(&["Hello"]);
        assert_eq!(p.streaming_text(), "Hello");
        p.append(" wor").unwrap();
        assert_eq!(p.streaming_text(), "Hello wor");
        p.append("\n```json\n{").unwrap();
        assert_eq!(p.streaming_text(), "");
        assert_eq!(p.partial_json_source(), Some("{"));
    }

    #[test]
    fn text_buffer_trims_front_at_whitespace() {
        let limits = ParserLimits {
            text_buffer_limit: 16,
            structured_buffer_limit: 1024,
        };
        let mut p = BlockParser::with_instance_id("p", limits);
        p.append("alpha beta gamma delta").unwrap();
        let text = p.streaming_text();
        assert!(text.len() <= 16);
        assert!(text.ends_with("delta"));
        // Cut lands after whitespace, never mid-word.
        assert!(["beta", "gamma", "delta"].iter().any(|w| text.starts_with(w)));
    }

    #[test]
    fn text_trim_does_not_touch_emitted_blocks() {
        let limits = ParserLimits {
            text_buffer_limit: 8,
            structured_buffer_limit: 1024,
        };
        let mut p = BlockParser::with_instance_id("p", limits);
        p.append("```json\n{\"k\":\"v\"}\n```").unwrap();
        p.append(" one two three four five six").unwrap();
        let blocks = p.blocks();
        assert_eq!(blocks[0].data, Some(json!({"k": "v"})));
        assert!(blocks[1].text_or_empty().ends_with("six"));
    }

    #[test]
    fn text_trim_respects_multibyte_chars() {
        let limits = ParserLimits {
            text_buffer_limit: 8,
            structured_buffer_limit: 1024,
        };
        let mut p = BlockParser::with_instance_id("p", limits);
        p.append("ééééééééééé").unwrap();
        assert!(p.streaming_text().chars().all(|c| c == 'é'));
        assert!(p.streaming_text().len() <= 8);
    }

    #[test]
    fn structured_overflow_fails_append() {
        let limits = ParserLimits {
            text_buffer_limit: 1024,
            structured_buffer_limit: 8,
        };
        let mut p = BlockParser::with_instance_id("p", limits);
        let err = p.append("```json\n{\"long\": 12345}").unwrap_err();
        assert_matches!(err, ParseError::StructuredOverflow { limit: 8 });
        assert!(p.is_in_json_block());
    }

    #[test]
    fn char_by_char_equals_single_chunk() {
        let text = "Intro `code` text\n```json\n{\"a\": \"b`c\", \"n\": [1, {\"d\": null}]}\n```\nOutro";
        let whole = feed(&[text]);
        let mut split = parser();
        for ch in text.chars() {
            split.append(&ch.to_string()).unwrap();
        }
        assert_eq!(whole.blocks(), split.blocks());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        const DOC: &str = "Lead ``in``\n```json\n{\"title\": \"x`y\", \"items\": [1, 2, {\"z\": \"é\"}]}\n```\ntrailing `tick` words";

        proptest! {
            #[test]
            fn chunk_boundaries_never_change_blocks(cuts in proptest::collection::vec(0usize..200, 0..12)) {
                let chars: Vec<char> = DOC.chars().collect();
                let mut points: Vec<usize> = cuts.into_iter().map(|c| c % (chars.len() + 1)).collect();
                points.sort_unstable();
                points.dedup();

                let mut p = parser();
                let mut start = 0;
                for point in points.into_iter().chain(std::iter::once(chars.len())) {
                    let chunk: String = chars[start..point].iter().collect();
                    p.append(&chunk).unwrap();
                    start = point;
                }
                prop_assert_eq!(p.blocks(), feed(&[DOC]).blocks());
            }
        }
    }
}

//! A streamed answer, replayed through the event processor in shuffled
//! order, must materialize the same blocks that history reconstruction
//! produces from the persisted message.

use futures::stream;
use serde_json::json;
use strand_core::{Block, BlockKind, PersistedMessage, TargetMode, UiEvent};
use strand_events::{EventProcessor, HistoryReconstructor, ProcessorConfig};
use strand_stream::{
    KeyTransforms, ModelDelta, RunScope, StreamOutcome, StructuredOutputStreamer, TransformError,
};

const CHUNKS: [&str; 6] = [
    "Here is the ",
    "plan:\n```js",
    "on\n{\"steps\": [\"fetch\", ",
    "\"parse\"], \"done\": fal",
    "se}\n```\nLet me know",
    " if it looks right.",
];

/// The same answer with a shell snippet the parser skips.
const CHUNKS_WITH_CODE: [&str; 6] = [
    "Here is the plan:\n```json\n",
    "{\"steps\": [\"fetch\"]}\n```\nRun ",
    "``",
    "`python\nprint('hi')\n``",
    "`\nthen ",
    "stop.",
];

fn step_count() -> KeyTransforms {
    KeyTransforms::new().with("steps", |v| {
        v.as_array()
            .map(|a| json!(a.len()))
            .ok_or_else(|| TransformError::new("steps not a list"))
    })
}

async fn stream_answer(target: TargetMode) -> (StreamOutcome, Vec<UiEvent>) {
    stream_chunks(StructuredOutputStreamer::new(target), &CHUNKS).await
}

async fn stream_chunks(
    streamer: StructuredOutputStreamer,
    chunks: &[&str],
) -> (StreamOutcome, Vec<UiEvent>) {
    let streamer = streamer.with_message_id("msg-1");
    let mut events = Vec::new();
    let mut scope = RunScope::enter("live");
    let deltas = stream::iter(chunks.iter().map(|c| ModelDelta::from(*c)));
    let outcome = streamer
        .run(deltas, &mut scope, &mut |e: UiEvent| events.push(e))
        .await
        .unwrap();
    (outcome, events)
}

/// Deterministic interleaving: odd positions first, then even ones reversed.
fn shuffle(events: &[UiEvent]) -> Vec<UiEvent> {
    let odd = events.iter().skip(1).step_by(2);
    let even = events.iter().step_by(2).rev();
    odd.chain(even).cloned().collect()
}

fn shape(blocks: &[Block]) -> Vec<(BlockKind, u32, Option<String>, Option<serde_json::Value>)> {
    blocks
        .iter()
        .map(|b| (b.kind, b.index, b.text.clone(), b.data.clone()))
        .collect()
}

#[tokio::test]
async fn shuffled_live_events_match_recorded_history() {
    let (outcome, events) = stream_answer(TargetMode::Messages).await;
    assert!(events.len() > 4);

    let mut processor = EventProcessor::new(ProcessorConfig { max_pending: None });
    let _ = processor.process_all(shuffle(&events));
    assert_eq!(processor.pending_len(), 0);
    let live = processor.message(outcome.message.id.clone());

    let history = HistoryReconstructor::new().reconstruct_message(&outcome.message);

    assert_eq!(live, history);
    assert_eq!(live.blocks.len(), 3);
    assert_eq!(live.blocks[1].data, Some(json!({"steps": ["fetch", "parse"], "done": false})));
    assert_eq!(outcome.parsed, live.blocks[1].data);
}

#[tokio::test]
async fn legacy_history_matches_live_shape() {
    let (outcome, events) = stream_answer(TargetMode::Messages).await;

    let mut processor = EventProcessor::default();
    let _ = processor.process_all(events);

    let legacy = PersistedMessage {
        metadata: None,
        ..outcome.message.clone()
    };
    let history = HistoryReconstructor::new().reconstruct_message(&legacy);

    assert_eq!(shape(&processor.blocks()), shape(&history.blocks));
    assert_eq!(history.blocks[0].text.as_deref(), Some("Here is the plan:"));
    assert_eq!(history.blocks[2].text.as_deref(), Some("Let me know if it looks right."));
}

#[tokio::test]
async fn legacy_history_skips_other_fences_like_live() {
    let streamer = StructuredOutputStreamer::new(TargetMode::Messages);
    let (outcome, events) = stream_chunks(streamer, &CHUNKS_WITH_CODE).await;

    let mut processor = EventProcessor::default();
    let _ = processor.process_all(shuffle(&events));

    let legacy = PersistedMessage {
        metadata: None,
        ..outcome.message.clone()
    };
    let history = HistoryReconstructor::new().reconstruct_message(&legacy);

    assert_eq!(shape(&processor.blocks()), shape(&history.blocks));
    assert_eq!(history.blocks.len(), 3);
    assert_eq!(history.blocks[2].text.as_deref(), Some("Run \nthen stop."));
}

#[tokio::test]
async fn transforms_keep_live_and_history_in_step() {
    let streamer = StructuredOutputStreamer::new(TargetMode::Messages).with_transforms(step_count());
    let (outcome, events) = stream_chunks(streamer, &CHUNKS).await;
    let mut processor = EventProcessor::default();
    let _ = processor.process_all(shuffle(&events));

    let history = HistoryReconstructor::new()
        .with_transforms(step_count())
        .reconstruct_message(&outcome.message);
    assert_eq!(processor.message(outcome.message.id.clone()), history);
    assert_eq!(history.blocks[1].data, Some(json!({"steps": ["fetch", "parse"], "done": false})));

    let streamer = StructuredOutputStreamer::new(TargetMode::State).with_transforms(step_count());
    let (outcome, events) = stream_chunks(streamer, &CHUNKS).await;
    let mut processor = EventProcessor::default();
    let _ = processor.process_all(shuffle(&events));

    let mut scope = RunScope::enter("history");
    let state = HistoryReconstructor::new()
        .with_transforms(step_count())
        .final_state(&outcome.message, &mut scope);
    assert_eq!(processor.state(), &state);
    assert_eq!(state.get("steps"), Some(&json!(2)));
}

#[tokio::test]
async fn state_target_finalizes_every_key() {
    let (_, events) = stream_answer(TargetMode::State).await;

    let mut processor = EventProcessor::default();
    let _ = processor.process_all(shuffle(&events));

    assert!(processor.is_finalized("steps"));
    assert!(processor.is_finalized("done"));
    assert_eq!(processor.state().get("steps"), Some(&json!(["fetch", "parse"])));
    assert_eq!(processor.state().get("done"), Some(&json!(false)));
    assert!(processor.blocks().iter().all(|b| b.kind == BlockKind::Text));
}

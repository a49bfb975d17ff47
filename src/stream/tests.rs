use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use super::accumulator::decode_data_uri;
use super::splitter::tail_preview;
use super::*;
use crate::core::error::{ProviderError, UiError};
use crate::core::provider::ByteStream;
use crate::core::ui::{ChatId, ChatUi, MessageId, UiChannel};

#[derive(Debug, Clone, PartialEq)]
enum UiCall {
    Send(String),
    Edit(MessageId, String),
    Image(String, Vec<u8>),
}

#[derive(Default)]
struct RecordingUi {
    calls: Mutex<Vec<UiCall>>,
    next_id: AtomicI64,
    failing: AtomicBool,
}

impl RecordingUi {
    /// Records every call but reports each one as failed.
    fn failing() -> Self {
        Self {
            failing: AtomicBool::new(true),
            ..Default::default()
        }
    }

    fn record(&self, call: UiCall) -> Result<(), UiError> {
        self.calls.lock().unwrap().push(call);
        if self.failing.load(Ordering::SeqCst) {
            return Err(UiError::Send("chat unavailable".into()));
        }
        Ok(())
    }

    fn calls(&self) -> Vec<UiCall> {
        self.calls.lock().unwrap().clone()
    }

    fn edits(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                UiCall::Edit(_, text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChatUi for RecordingUi {
    async fn send_message(&self, _chat: ChatId, content: &str) -> Result<MessageId, UiError> {
        self.record(UiCall::Send(content.into()))?;
        Ok(MessageId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn edit_message(&self, _chat: ChatId, id: MessageId, content: &str) -> Result<(), UiError> {
        self.record(UiCall::Edit(id, content.into()))
    }

    async fn send_image(&self, _chat: ChatId, media_type: &str, data: &[u8]) -> Result<(), UiError> {
        self.record(UiCall::Image(media_type.into(), data.to_vec()))
    }
}

fn channel(ui: &Arc<RecordingUi>) -> UiChannel {
    UiChannel::new(ui.clone(), ChatId(1))
}

fn byte_stream(chunks: Vec<&'static str>) -> ByteStream {
    Box::pin(tokio_stream::iter(
        chunks
            .into_iter()
            .map(|c| Ok::<_, ProviderError>(Bytes::from_static(c.as_bytes()))),
    ))
}

fn text_frame(text: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({"id": "gen-1", "choices": [{"delta": {"content": text}}]})
    )
}

const HELLO_BODY: &str = concat!(
    "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
    "data: [DONE]\n\n",
);

fn decode_all(chunks: &[&[u8]]) -> Vec<Frame> {
    let mut decoder = FrameDecoder::new();
    chunks.iter().flat_map(|c| decoder.push(c)).collect()
}

async fn payloads(source: ByteStream) -> Vec<String> {
    event_payloads(source)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect()
}

// ---- framing ----

#[test]
fn test_decoder_basic_body() {
    let frames = decode_all(&[HELLO_BODY.as_bytes()]);
    assert_eq!(
        frames,
        vec![
            Frame::Data(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#.into()),
            Frame::Data(r#"{"choices":[{"delta":{"content":"lo"}}]}"#.into()),
            Frame::Done,
        ]
    );
}

#[test]
fn test_decoder_independent_of_chunk_boundaries() {
    let body = HELLO_BODY.as_bytes();
    let expected = decode_all(&[body]);

    for split in 0..=body.len() {
        let (a, b) = body.split_at(split);
        assert_eq!(decode_all(&[a, b]), expected, "split at {split}");
    }

    let bytewise: Vec<&[u8]> = body.chunks(1).collect();
    assert_eq!(decode_all(&bytewise), expected);
}

#[test]
fn test_decoder_ignores_non_data_lines() {
    let frames = decode_all(&[b": keep-alive\n\nevent: message\ndata: a\nid: 3\n\n"]);
    assert_eq!(frames, vec![Frame::Data("a".into())]);
}

#[test]
fn test_decoder_accepts_crlf_and_missing_space() {
    let frames = decode_all(&[b"data:a\r\n\r\ndata: b\r\n\r\n"]);
    assert_eq!(frames, vec![Frame::Data("a".into()), Frame::Data("b".into())]);
}

#[test]
fn test_decoder_multiple_data_lines_in_block() {
    let frames = decode_all(&[b"data: one\ndata: two\n\n"]);
    assert_eq!(frames, vec![Frame::Data("one".into()), Frame::Data("two".into())]);
}

#[test]
fn test_decoder_stops_at_sentinel() {
    let mut decoder = FrameDecoder::new();
    let frames = decoder.push(b"data: a\n\ndata: [DONE]\n\ndata: b\n\n");
    assert_eq!(frames, vec![Frame::Data("a".into()), Frame::Done]);
    assert!(decoder.is_finished());
    assert!(decoder.push(b"data: c\n\n").is_empty());
}

#[test]
fn test_decoder_holds_partial_event() {
    let mut decoder = FrameDecoder::new();
    assert!(decoder.push(b"data: a\n\ndata: b").len() == 1);
    assert!(decoder.has_partial_event());
    assert_eq!(decoder.push(b"c\n\n"), vec![Frame::Data("bc".into())]);
    assert!(!decoder.has_partial_event());
}

#[tokio::test]
async fn test_event_payloads_never_yield_sentinel() {
    let got = payloads(byte_stream(vec![HELLO_BODY, "data: after\n\n"])).await;
    assert_eq!(got.len(), 2);
    assert!(got.iter().all(|p| p != "[DONE]"));
}

#[tokio::test]
async fn test_event_payloads_drop_unterminated_tail() {
    let got = payloads(byte_stream(vec!["data: a\n\n", "data: b\n"])).await;
    assert_eq!(got, vec!["a".to_string()]);
}

#[tokio::test]
async fn test_event_payloads_surface_read_error() {
    let source: ByteStream = Box::pin(tokio_stream::iter(vec![
        Ok(Bytes::from_static(b"data: a\n\n")),
        Err(ProviderError::Stream("connection reset".into())),
        Ok(Bytes::from_static(b"data: b\n\n")),
    ]));

    let items: Vec<_> = event_payloads(source).collect().await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_deref().unwrap(), "a");
    assert!(matches!(items[1], Err(ProviderError::Stream(_))));
}

// ---- accumulation ----

#[test]
fn test_accumulator_appends_text() {
    let mut message = InProgressMessage::new();
    assert!(message.apply(r#"{"id":"gen-9","choices":[{"delta":{"content":"Hel"}}]}"#).changed);
    assert!(message.apply(r#"{"id":"gen-10","choices":[{"delta":{"content":"lo"}}]}"#).changed);
    assert_eq!(message.text, "Hello");
    assert_eq!(message.generation_id.as_deref(), Some("gen-9"));
}

#[test]
fn test_accumulator_skips_malformed_payload() {
    let mut message = InProgressMessage::new();
    message.apply(r#"{"choices":[{"delta":{"content":"ok"}}]}"#);
    let before = message.clone();

    let applied = message.apply("{not json");
    assert!(!applied.changed);
    assert!(applied.images.is_empty());
    assert_eq!(message.text, before.text);
    assert_eq!(message.images, before.images);
}

#[test]
fn test_accumulator_empty_delta_is_no_change() {
    let mut message = InProgressMessage::new();
    assert!(!message.apply(r#"{"choices":[{"delta":{"content":""}}]}"#).changed);
    assert!(!message.apply(r#"{"choices":[{"delta":{}}]}"#).changed);
    assert!(!message.apply(r#"{"choices":[]}"#).changed);
    assert!(message.is_empty());
}

#[test]
fn test_accumulator_reads_inline_cost() {
    let mut message = InProgressMessage::new();
    message.apply(r#"{"choices":[],"usage":{"prompt_tokens":3,"cost":0.0042}}"#);
    assert_eq!(message.reported_cost, Some(0.0042));
}

#[test]
fn test_accumulator_decodes_images() {
    let mut message = InProgressMessage::new();
    let applied = message.apply(
        r#"{"choices":[{"delta":{"images":[
            {"type":"image_url","image_url":{"url":"data:image/jpeg;base64,YWJj"}},
            {"type":"image_url","image_url":{"url":"data:image/png;base64,!!!"}},
            {"type":"image_url","image_url":{"url":""}}
        ]}}]}"#,
    );

    assert!(!applied.changed);
    assert_eq!(
        applied.images,
        vec![DecodedImage {
            media_type: "image/jpeg".into(),
            data: b"abc".to_vec(),
        }]
    );
    assert_eq!(message.images.len(), 1);
    assert_eq!(message.image_parts().len(), 1);
}

#[test]
fn test_accumulator_bad_image_entry_keeps_text() {
    let mut message = InProgressMessage::new();

    let applied = message.apply(r#"{"choices":[{"delta":{"content":"Hi","images":[{"type":"image_url"}]}}]}"#);
    assert!(applied.changed);
    assert_eq!(message.text, "Hi");

    let applied = message.apply(
        r#"{"choices":[{"delta":{"content":" there","images":[
            {"image_url":{"url":null}},
            {"image_url":{"url":"data:image/png;base64,YWJj"}}
        ]}}]}"#,
    );
    assert!(applied.changed);
    assert_eq!(message.text, "Hi there");
    assert_eq!(applied.images.len(), 1);
    assert_eq!(message.images[0].data, b"abc");
}

#[test]
fn test_accumulator_ignores_non_string_content() {
    let mut message = InProgressMessage::new();
    let applied = message.apply(
        r#"{"choices":[{"delta":{"content":[{"type":"text"}],"images":[{"image_url":{"url":"data:image/png;base64,YWJj"}}]}}]}"#,
    );
    assert!(!applied.changed);
    assert!(message.text.is_empty());
    assert_eq!(applied.images.len(), 1);
}

#[test]
fn test_decode_data_uri_without_prefix() {
    let image = decode_data_uri("YWJj").unwrap();
    assert_eq!(image.media_type, "image/png");
    assert_eq!(image.data, b"abc");
    assert!(decode_data_uri("data:image/png;base64,%%%").is_err());
}

// ---- splitting ----

#[test]
fn test_split_long_text() {
    let text = "a".repeat(9000);
    let chunks = split_chunks(&text, 4096);
    let lengths: Vec<usize> = chunks.iter().map(|c| c.chars().count()).collect();
    assert_eq!(lengths, vec![4096, 4096, 808]);
    assert_eq!(chunks.concat(), text);
}

#[test]
fn test_split_prefers_newline() {
    let chunks = split_chunks("aaaa\nbbbbbb\ncc", 8);
    assert_eq!(chunks, vec!["aaaa\n", "bbbbbb\n", "cc"]);
}

#[test]
fn test_split_counts_characters() {
    let chunks = split_chunks("ééééé", 2);
    assert_eq!(chunks, vec!["éé", "éé", "é"]);
}

#[test]
fn test_split_short_and_empty() {
    assert_eq!(split_chunks("hi", 4096), vec!["hi"]);
    assert!(split_chunks("", 10).is_empty());
    let chunks = split_chunks("\n\n\n\n", 1);
    assert!(chunks.iter().all(|c| !c.is_empty()));
    assert_eq!(chunks.concat(), "\n\n\n\n");
}

#[test]
fn test_tail_preview() {
    assert_eq!(tail_preview("abc", 5), "abc");
    assert_eq!(tail_preview("abcdefgh", 5), "…efgh");
    assert_eq!(tail_preview("abcdefgh", 5).chars().count(), 5);
}

// ---- throttling ----

#[test]
fn test_throttle_gate_timing() {
    let policy = ThrottlePolicy {
        initial_interval: Duration::from_millis(500),
        settled_interval: Duration::from_millis(2000),
    };
    let mut gate = ThrottleGate::new(policy);
    let t0 = tokio::time::Instant::now();

    assert!(!gate.should_push("", t0));
    assert!(gate.should_push("Hel", t0));
    gate.mark_pushed("Hel", t0);

    assert!(!gate.should_push("Hel", t0 + Duration::from_secs(10)));
    assert!(!gate.should_push("Hello", t0 + Duration::from_millis(499)));
    assert!(gate.should_push("Hello", t0 + Duration::from_millis(500)));

    gate.mark_pushed("Hello", t0 + Duration::from_millis(500));
    let para = "Hello\n\nworld";
    assert!(!gate.should_push(para, t0 + Duration::from_millis(1500)));
    assert!(gate.should_push(para, t0 + Duration::from_millis(2500)));
    assert_eq!(gate.last_pushed_text(), "Hello");
}

// ---- presenting ----

#[tokio::test]
async fn test_presenter_throttles_updates() {
    let ui = Arc::new(RecordingUi::default());
    let mut presenter =
        LivePresenter::new(channel(&ui), MessageId(7), ThrottlePolicy::fixed(Duration::from_secs(60)), 4096);

    assert!(presenter.update("Hel").await);
    assert!(!presenter.update("Hello").await);
    assert_eq!(presenter.push_count(), 1);
    assert_eq!(ui.calls(), vec![UiCall::Edit(MessageId(7), "Hel".into())]);
}

#[tokio::test]
async fn test_presenter_previews_tail_of_long_text() {
    let ui = Arc::new(RecordingUi::default());
    let mut presenter = LivePresenter::new(channel(&ui), MessageId(1), ThrottlePolicy::fixed(Duration::ZERO), 5);

    presenter.update("abcdefgh").await;
    assert_eq!(ui.edits(), vec!["…efgh".to_string()]);
}

#[tokio::test]
async fn test_presenter_sends_images_immediately() {
    let ui = Arc::new(RecordingUi::default());
    let presenter = LivePresenter::new(channel(&ui), MessageId(1), ThrottlePolicy::fixed(Duration::from_secs(60)), 4096);

    presenter
        .push_image(&DecodedImage {
            media_type: "image/png".into(),
            data: vec![1, 2],
        })
        .await;
    assert_eq!(ui.calls(), vec![UiCall::Image("image/png".into(), vec![1, 2])]);
}

#[tokio::test]
async fn test_presenter_finalize_splits_into_messages() {
    let ui = Arc::new(RecordingUi::default());
    let presenter = LivePresenter::new(channel(&ui), MessageId(42), ThrottlePolicy::fixed(Duration::ZERO), 10);

    let text = "x".repeat(25);
    let delivered = presenter.finalize(&text, "unused").await;

    assert_eq!(delivered, vec![MessageId(42), MessageId(1), MessageId(2)]);
    assert_eq!(
        ui.calls(),
        vec![
            UiCall::Edit(MessageId(42), "x".repeat(10)),
            UiCall::Send("x".repeat(10)),
            UiCall::Send("x".repeat(5)),
        ]
    );
}

#[tokio::test]
async fn test_presenter_failed_edit_still_advances_gate() {
    let ui = Arc::new(RecordingUi::failing());
    let mut presenter =
        LivePresenter::new(channel(&ui), MessageId(7), ThrottlePolicy::fixed(Duration::from_secs(60)), 4096);

    assert!(presenter.update("Hel").await);
    assert!(!presenter.update("Hel").await);
    assert!(!presenter.update("Hello").await);
    assert_eq!(presenter.push_count(), 1);
    assert_eq!(ui.edits(), vec!["Hel".to_string()]);
}

#[tokio::test]
async fn test_presenter_finalize_reports_only_delivered_chunks() {
    let ui = Arc::new(RecordingUi::failing());
    let presenter = LivePresenter::new(channel(&ui), MessageId(42), ThrottlePolicy::fixed(Duration::ZERO), 10);

    let delivered = presenter.finalize(&"x".repeat(25), "unused").await;
    assert!(delivered.is_empty());
    assert_eq!(ui.calls().len(), 3);
}

#[tokio::test]
async fn test_presenter_finalize_empty_uses_placeholder() {
    let ui = Arc::new(RecordingUi::default());
    let presenter = LivePresenter::new(channel(&ui), MessageId(3), ThrottlePolicy::fixed(Duration::ZERO), 4096);

    let delivered = presenter.finalize("", "Image generated.").await;
    assert_eq!(delivered, vec![MessageId(3)]);
    assert_eq!(ui.edits(), vec!["Image generated.".to_string()]);
}

// ---- loading indicator ----

#[tokio::test(start_paused = true)]
async fn test_loading_indicator_animates_until_handoff() {
    let ui = Arc::new(RecordingUi::default());
    let loading = LoadingIndicator::start(channel(&ui), "Thinking", Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(ui.calls()[0], UiCall::Send("Thinking".into()));

    tokio::time::sleep(Duration::from_millis(1600)).await;
    let message_id = loading.handoff().await;
    assert_eq!(message_id, MessageId(1));

    let edits = ui.edits();
    assert_eq!(edits, vec!["Thinking.", "Thinking..", "Thinking..."]);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(ui.edits(), edits);
}

#[tokio::test(start_paused = true)]
async fn test_loading_indicator_immediate_handoff() {
    let ui = Arc::new(RecordingUi::default());
    let loading = LoadingIndicator::start(channel(&ui), "Thinking", Duration::from_millis(500))
        .await
        .unwrap();
    loading.cancel();
    loading.cancel();
    assert!(loading.is_cancelled());
    loading.handoff().await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(ui.edits().is_empty());
}

// ---- relay ----

#[tokio::test]
async fn test_relay_stream_hello() {
    let ui = Arc::new(RecordingUi::default());
    let mut presenter =
        LivePresenter::new(channel(&ui), MessageId(1), ThrottlePolicy::fixed(Duration::from_secs(60)), 4096);

    let outcome = relay_stream(byte_stream(vec![HELLO_BODY]), &mut presenter, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.termination, Termination::Completed);
    assert_eq!(outcome.message.text, "Hello");
    assert!(outcome.message.images.is_empty());
    assert_eq!(presenter.push_count(), 1);

    presenter.finalize(&outcome.message.text, "").await;
    assert_eq!(ui.edits(), vec!["Hel".to_string(), "Hello".to_string()]);
}

#[tokio::test]
async fn test_relay_stream_skips_bad_frames_and_forwards_images() {
    let ui = Arc::new(RecordingUi::default());
    let mut presenter =
        LivePresenter::new(channel(&ui), MessageId(1), ThrottlePolicy::fixed(Duration::from_secs(60)), 4096);

    let source = byte_stream(vec![
        "data: garbage\n\n",
        "data: {\"choices\":[{\"delta\":{\"images\":[{\"image_url\":{\"url\":\"data:image/png;base64,YWJj\"}}]}}]}\n\n",
        "data: [DONE]\n\n",
    ]);
    let outcome = relay_stream(source, &mut presenter, &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.message.text.is_empty());
    assert_eq!(outcome.message.images.len(), 1);
    assert_eq!(presenter.push_count(), 0);
    assert_eq!(ui.calls(), vec![UiCall::Image("image/png".into(), b"abc".to_vec())]);
}

#[tokio::test]
async fn test_relay_stream_survives_failing_ui() {
    let ui = Arc::new(RecordingUi::failing());
    let mut presenter =
        LivePresenter::new(channel(&ui), MessageId(1), ThrottlePolicy::fixed(Duration::from_secs(60)), 4096);

    let source = byte_stream(vec![
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"images\":[{\"image_url\":{\"url\":\"data:image/png;base64,YWJj\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: [DONE]\n\n",
    ]);
    let outcome = relay_stream(source, &mut presenter, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.termination, Termination::Completed);
    assert_eq!(outcome.message.text, "Hello");
    assert_eq!(outcome.message.images.len(), 1);
    assert_eq!(presenter.push_count(), 1);
    assert!(ui.calls().contains(&UiCall::Image("image/png".into(), b"abc".to_vec())));
}

#[tokio::test]
async fn test_relay_stream_read_error() {
    let ui = Arc::new(RecordingUi::default());
    let mut presenter = LivePresenter::new(channel(&ui), MessageId(1), ThrottlePolicy::fixed(Duration::ZERO), 4096);

    let first = text_frame("partial");
    let source: ByteStream = Box::pin(tokio_stream::iter(vec![
        Ok(Bytes::from(first)),
        Err(ProviderError::Stream("reset".into())),
    ]));

    let result = relay_stream(source, &mut presenter, &CancellationToken::new()).await;
    assert!(matches!(result, Err(ProviderError::Stream(_))));
    assert_eq!(ui.edits(), vec!["partial".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_relay_stream_cancel_keeps_partial_text() {
    let ui = Arc::new(RecordingUi::default());
    let mut presenter = LivePresenter::new(channel(&ui), MessageId(1), ThrottlePolicy::fixed(Duration::ZERO), 4096);

    let first = text_frame("Hel");
    let source: ByteStream = Box::pin(
        tokio_stream::iter(vec![Ok::<_, ProviderError>(Bytes::from(first))])
            .chain(tokio_stream::pending()),
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let outcome = relay_stream(source, &mut presenter, &cancel).await.unwrap();
    assert_eq!(outcome.termination, Termination::Cancelled);
    assert_eq!(outcome.message.text, "Hel");
}

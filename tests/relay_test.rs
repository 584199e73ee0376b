//! Tests for the chat relay processor and reply chunking.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use keyq::engine::{Dispatcher, EngineConfig, Failure, TaskProcessor};
use keyq::error::ProcessError;
use keyq::model::{Key, NewWorkItem, WorkItem};
use keyq::relay::chunk::{split_reply, strip_citations};
use keyq::relay::{Completion, DeliverySink, EchoCompletion, Inbound, ReplyProcessor};

// ---------------------------------------------------------------------------
// Stubs
// ---------------------------------------------------------------------------

/// Replies with a fixed text, or fails.
struct Scripted {
    reply: Result<String, ProcessError>,
    calls: AtomicUsize,
}

impl Scripted {
    fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    fn failing(error: ProcessError) -> Self {
        Self {
            reply: Err(error),
            calls: AtomicUsize::new(0),
        }
    }
}

impl Completion for Scripted {
    async fn complete(&self, _conversation: &Key, _prompt: &str) -> Result<String, ProcessError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone()
    }
}

/// Records deliveries; fails the delivery with the given index.
#[derive(Default)]
struct Recording {
    sent: Mutex<Vec<(String, String)>>,
    typing: AtomicUsize,
    fail_at: Option<usize>,
    attempts: AtomicUsize,
}

impl Recording {
    fn failing_at(index: usize) -> Self {
        Self {
            fail_at: Some(index),
            ..Self::default()
        }
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, text)| text).collect()
    }
}

impl DeliverySink for Recording {
    async fn deliver(&self, recipient: &Key, text: &str) -> Result<(), ProcessError> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(n) {
            return Err(ProcessError::Delivery("channel rejected message".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), text.to_string()));
        Ok(())
    }

    async fn typing(&self, _recipient: &Key) -> Result<(), ProcessError> {
        self.typing.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Stalls on one delivery, then behaves like [`Recording`].
struct SlowOnce {
    inner: Recording,
    calls: AtomicUsize,
    slow_at: usize,
}

impl SlowOnce {
    fn at(slow_at: usize) -> Self {
        Self {
            inner: Recording::default(),
            calls: AtomicUsize::new(0),
            slow_at,
        }
    }
}

impl DeliverySink for SlowOnce {
    async fn deliver(&self, recipient: &Key, text: &str) -> Result<(), ProcessError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == self.slow_at {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        self.inner.deliver(recipient, text).await
    }
}

fn inbound(key: &str, body: &str) -> WorkItem<Inbound> {
    WorkItem {
        key: Key::from(key),
        fingerprint: keyq::model::Fingerprint::new("m1"),
        payload: std::sync::Arc::new(Inbound {
            body: body.to_string(),
        }),
        enqueued_at: chrono::Utc::now(),
        attempts: 0,
    }
}

// ---------------------------------------------------------------------------
// Chunking
// ---------------------------------------------------------------------------

#[test]
fn reply_is_split_at_blank_lines() {
    let chunks = split_reply("Hello there.\n\nHere is the plan:\n1. one\n2. two\n\n\n\nBye!");
    assert_eq!(
        chunks,
        vec!["Hello there.", "Here is the plan:\n1. one\n2. two", "Bye!"]
    );
}

#[test]
fn whitespace_only_paragraphs_are_dropped() {
    let chunks = split_reply("  \n\nFirst\r\n\r\n   \n\n Second  ");
    assert_eq!(chunks, vec!["First", "Second"]);
}

#[test]
fn citation_markers_are_removed() {
    assert_eq!(
        strip_citations("Opening hours are 9-5【4:0†hours.pdf】 on weekdays."),
        "Opening hours are 9-5on weekdays."
    );
    assert_eq!(
        strip_citations("See the menu【1†menu】."),
        "See the menu."
    );
    assert_eq!(strip_citations("no markers here"), "no markers here");
}

#[test]
fn unterminated_citation_is_kept() {
    assert_eq!(strip_citations("broken 【marker"), "broken 【marker");
}

#[test]
fn paragraph_made_only_of_citations_disappears() {
    let chunks = split_reply("Answer.\n\n【1†a】 【2†b】");
    assert_eq!(chunks, vec!["Answer."]);
}

// ---------------------------------------------------------------------------
// ReplyProcessor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reply_chunks_are_delivered_in_order_to_the_sender() {
    let processor = ReplyProcessor::new(
        Scripted::replying("Hi!\n\nHow can I help【3†faq】 today?"),
        Recording::default(),
    );

    processor
        .process(&inbound("whatsapp:+100", "hello"))
        .await
        .unwrap();

    let sent = processor.sink().sent();
    assert_eq!(
        sent,
        vec![
            ("whatsapp:+100".to_string(), "Hi!".to_string()),
            ("whatsapp:+100".to_string(), "How can I helptoday?".to_string()),
        ]
    );
    assert_eq!(processor.sink().typing.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_body_fails_without_calling_the_assistant() {
    let processor = ReplyProcessor::new(Scripted::replying("unused"), Recording::default());

    let err = processor.process(&inbound("u1", "   ")).await.unwrap_err();

    assert!(matches!(err, ProcessError::InvalidPayload(_)));
    assert!(!err.is_retryable());
    assert_eq!(processor.completion().calls.load(Ordering::SeqCst), 0);
    assert!(processor.sink().sent().is_empty());
}

#[tokio::test]
async fn completion_failure_is_retryable() {
    let processor = ReplyProcessor::new(
        Scripted::failing(ProcessError::Completion("503".to_string())),
        Recording::default(),
    );

    let err = processor.process(&inbound("u1", "hi")).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(processor.sink().sent().is_empty());
}

#[tokio::test]
async fn first_chunk_failure_is_retryable_later_ones_are_not() {
    let processor = ReplyProcessor::new(Scripted::replying("a\n\nb\n\nc"), Recording::failing_at(0));
    let err = processor.process(&inbound("u1", "hi")).await.unwrap_err();
    assert!(matches!(err, ProcessError::Delivery(_)));
    assert!(err.is_retryable());

    let processor = ReplyProcessor::new(Scripted::replying("a\n\nb\n\nc"), Recording::failing_at(1));
    let err = processor.process(&inbound("u1", "hi")).await.unwrap_err();
    assert_eq!(
        err,
        ProcessError::PartialDelivery {
            delivered: 1,
            total: 3,
            reason: "delivery failed: channel rejected message".to_string(),
        }
    );
    assert!(!err.is_retryable());
    assert_eq!(processor.sink().texts(), vec!["a"]);
}

#[tokio::test]
async fn retry_resumes_delivery_without_asking_again() {
    let processor = ReplyProcessor::new(Scripted::replying("a\n\nb"), Recording::failing_at(0));
    let item = inbound("u1", "hi");

    let err = processor.process(&item).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(processor.unfinished(), 1);

    processor.process(&item).await.unwrap();
    assert_eq!(processor.completion().calls.load(Ordering::SeqCst), 1);
    assert_eq!(processor.sink().texts(), vec!["a", "b"]);
    assert_eq!(processor.unfinished(), 0);
}

#[tokio::test]
async fn dropped_item_forgets_its_unfinished_reply() {
    let processor = ReplyProcessor::new(Scripted::replying("a"), Recording::failing_at(0));
    let item = inbound("u1", "hi");

    let error = processor.process(&item).await.unwrap_err();
    assert_eq!(processor.unfinished(), 1);

    let failure = Failure {
        error,
        attempt: 1,
        will_retry: false,
    };
    processor.on_failure(&item, &failure).await;
    assert_eq!(processor.unfinished(), 0);
}

#[tokio::test]
async fn failure_notice_is_sent_only_when_item_is_dropped() {
    let processor = ReplyProcessor::new(Scripted::replying("unused"), Recording::default())
        .with_failure_notice("Sorry, please try again.");
    let item = inbound("u1", "hi");

    let retrying = Failure {
        error: ProcessError::Completion("503".to_string()),
        attempt: 1,
        will_retry: true,
    };
    processor.on_failure(&item, &retrying).await;
    assert!(processor.sink().sent().is_empty());

    let final_failure = Failure {
        will_retry: false,
        attempt: 2,
        ..retrying
    };
    processor.on_failure(&item, &final_failure).await;
    assert_eq!(processor.sink().texts(), vec!["Sorry, please try again."]);
}

// ---------------------------------------------------------------------------
// Through the dispatcher
// ---------------------------------------------------------------------------

#[tokio::test]
async fn relay_answers_each_message_in_order() {
    let processor = ReplyProcessor::new(EchoCompletion, Recording::default());
    let dispatcher = Dispatcher::new(processor, EngineConfig::default());

    dispatcher.submit(
        "u1",
        NewWorkItem::new(Inbound {
            body: "first".to_string(),
        })
        .fingerprint("SM1"),
    );
    dispatcher.submit(
        "u1",
        NewWorkItem::new(Inbound {
            body: "second".to_string(),
        })
        .fingerprint("SM2"),
    );
    // Redelivery of SM1.
    dispatcher.submit(
        "u1",
        NewWorkItem::new(Inbound {
            body: "first".to_string(),
        })
        .fingerprint("SM1"),
    );

    tokio::time::timeout(Duration::from_secs(5), dispatcher.wait_idle())
        .await
        .expect("relay did not drain");

    assert_eq!(
        dispatcher.processor().sink().texts(),
        vec!["You said:", "first", "You said:", "second"]
    );
}

#[tokio::test]
async fn dropped_message_gets_one_apology() {
    let processor = ReplyProcessor::new(
        Scripted::failing(ProcessError::Completion("overloaded".to_string())),
        Recording::default(),
    )
    .with_failure_notice("Sorry!");
    let config = EngineConfig {
        max_attempts: 2,
        retry_backoff: Duration::from_millis(1),
        ..EngineConfig::default()
    };
    let dispatcher = Dispatcher::new(processor, config);

    dispatcher.submit(
        "u1",
        NewWorkItem::new(Inbound {
            body: "hi".to_string(),
        }),
    );
    tokio::time::timeout(Duration::from_secs(5), dispatcher.wait_idle())
        .await
        .expect("relay did not drain");

    let processor = dispatcher.processor();
    assert_eq!(processor.completion().calls.load(Ordering::SeqCst), 2);
    assert_eq!(processor.sink().texts(), vec!["Sorry!"]);
}

#[tokio::test(start_paused = true)]
async fn timed_out_delivery_never_repeats_a_chunk() {
    let processor = ReplyProcessor::new(EchoCompletion, SlowOnce::at(1));
    let config = EngineConfig {
        max_attempts: 2,
        retry_backoff: Duration::from_millis(10),
        item_timeout: Some(Duration::from_millis(100)),
        ..EngineConfig::default()
    };
    let dispatcher = Dispatcher::new(processor, config);

    dispatcher.submit(
        "u1",
        NewWorkItem::new(Inbound {
            body: "hello".to_string(),
        })
        .fingerprint("SM1"),
    );
    tokio::time::timeout(Duration::from_secs(60), dispatcher.wait_idle())
        .await
        .expect("relay did not drain");

    let processor = dispatcher.processor();
    assert_eq!(processor.sink().inner.texts(), vec!["You said:", "hello"]);
    assert_eq!(processor.sink().calls.load(Ordering::SeqCst), 3);
    assert_eq!(processor.unfinished(), 0);
}

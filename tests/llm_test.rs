//! Tests for the per-conversation transcript kept by the assistant.

use keyq::llm::{Transcript, Turn};
use keyq::model::Key;

fn turn(user: &str, assistant: &str) -> Turn {
    Turn {
        user: user.to_string(),
        assistant: assistant.to_string(),
    }
}

#[test]
fn each_key_has_its_own_history() {
    let transcript = Transcript::default();
    let alice = Key::from("whatsapp:+100");
    let bob = Key::from("whatsapp:+200");

    transcript.record(&alice, "hi", "hello alice");
    transcript.record(&bob, "hey", "hello bob");
    transcript.record(&alice, "what's open today?", "the library");

    assert_eq!(
        transcript.turns(&alice),
        vec![turn("hi", "hello alice"), turn("what's open today?", "the library")]
    );
    assert_eq!(transcript.turns(&bob), vec![turn("hey", "hello bob")]);
    assert_eq!(transcript.messages(&alice).len(), 4);
    assert_eq!(transcript.conversations(), 2);
}

#[test]
fn oldest_turns_fall_off_past_the_cap() {
    let transcript = Transcript::new(2);
    let key = Key::from("u1");

    for n in 1..=4 {
        transcript.record(&key, format!("q{n}"), format!("a{n}"));
    }

    assert_eq!(transcript.turns(&key), vec![turn("q3", "a3"), turn("q4", "a4")]);
}

#[test]
fn zero_turns_keeps_nothing() {
    let transcript = Transcript::new(0);
    let key = Key::from("u1");

    transcript.record(&key, "hi", "hello");

    assert!(transcript.turns(&key).is_empty());
    assert!(transcript.messages(&key).is_empty());
    assert_eq!(transcript.conversations(), 0);
}

#[test]
fn forget_clears_one_conversation() {
    let transcript = Transcript::default();
    let (a, b) = (Key::from("a"), Key::from("b"));
    transcript.record(&a, "1", "one");
    transcript.record(&b, "2", "two");

    transcript.forget(&a);

    assert!(transcript.turns(&a).is_empty());
    assert_eq!(transcript.turns(&b), vec![turn("2", "two")]);
}

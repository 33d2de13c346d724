#![forbid(unsafe_code)]

//! Tracing contract for [`History`].
//!
//! Every transition of the present value emits one DEBUG event; no-op
//! edits and empty undo/redo emit nothing.
//!
//! Run:
//!   cargo test -p storyloom-runtime --test history_tracing

use std::sync::{Arc, Mutex};

use tracing_subscriber::layer::SubscriberExt;

use storyloom_runtime::History;

#[derive(Clone, Default)]
struct Messages(Arc<Mutex<Vec<String>>>);

struct MessageVisitor(Option<String>);

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = Some(format!("{value:?}"));
        }
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for Messages {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        if *event.metadata().level() != tracing::Level::DEBUG {
            return;
        }
        let mut visitor = MessageVisitor(None);
        event.record(&mut visitor);
        if let Some(message) = visitor.0 {
            self.0.lock().unwrap().push(message);
        }
    }
}

fn with_capture(f: impl FnOnce()) -> Vec<String> {
    let messages = Messages::default();
    let subscriber = tracing_subscriber::registry()
        .with(tracing_subscriber::filter::LevelFilter::TRACE)
        .with(messages.clone());
    tracing::subscriber::with_default(subscriber, f);
    let captured = messages.0.lock().unwrap().clone();
    captured
}

#[test]
fn every_transition_is_logged() {
    let messages = with_capture(|| {
        let mut history = History::new(0u32);
        assert!(history.set(1));
        assert!(history.update(|v| v + 1));
        assert!(history.undo());
        assert!(history.redo());
        history.reset(9);
    });
    assert_eq!(
        messages,
        vec![
            "history commit",
            "history commit",
            "history undo",
            "history redo",
            "history reset"
        ]
    );
}

#[test]
fn noops_are_silent() {
    let messages = with_capture(|| {
        let mut history = History::new(0u32);
        assert!(!history.set(0));
        assert!(!history.undo());
        assert!(!history.redo());
    });
    assert!(messages.is_empty(), "unexpected events: {messages:?}");
}

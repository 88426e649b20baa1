//! Streaming facade over the engine's event stream.
//!
//! [`run_stream`] converts a run into a consumer-facing async sequence of
//! [`TraceEvent`]s. Internally an unbounded channel is spliced in front of
//! the configured sink: every event is pushed to the stream *and*
//! forwarded to the caller's sink. An optional handler observes the same
//! events; when it returns a value for `before_tool_execution`, that value
//! replaces the tool arguments — the mechanism that lets a stream consumer
//! modify tool inputs in flight.
//!
//! The run future is driven by the same task that yields the stream, and
//! the channel is drained after the run completes, so the stream always
//! ends only after the final `run_end` event.

use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::events::{EventSink, TraceEvent};
use crate::state::RunState;

use super::{RunConfig, Runner};

/// Sink wrapper pushing every event onto the stream channel.
struct ChannelSink {
    tx: mpsc::UnboundedSender<TraceEvent>,
    inner: Option<Arc<dyn EventSink>>,
    handler: Option<Arc<dyn EventSink>>,
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn on_event(&self, event: &TraceEvent) -> Option<Value> {
        // Push is non-blocking; a dropped consumer just stops observing.
        let _ = self.tx.send(event.clone());

        let mut replacement = None;
        if let Some(handler) = &self.handler {
            replacement = handler.on_event(event).await;
        }
        if let Some(inner) = &self.inner {
            let inner_replacement = inner.on_event(event).await;
            if replacement.is_none() {
                replacement = inner_replacement;
            }
        }
        replacement
    }
}

/// Run the engine and yield its trace events as an async sequence.
///
/// The returned stream ends after the `run_end` event. The caller's
/// original sink (if any) still observes every event; `handler`
/// additionally observes them and may replace tool arguments through the
/// `before_tool_execution` return value.
//
// The `tail_expr_drop_order` warning originates inside the `stream!` macro
// expansion, where temporaries in the generated async block's tail
// expression have a different drop order under Rust 2024. This is harmless
// and is a known upstream issue in `async-stream`.
#[allow(tail_expr_drop_order)]
pub fn run_stream(
    initial_state: RunState,
    mut config: RunConfig,
    handler: Option<Arc<dyn EventSink>>,
) -> impl Stream<Item = TraceEvent> + Send {
    let (tx, mut rx) = mpsc::unbounded_channel();
    config.event_sink = Some(Arc::new(ChannelSink {
        tx,
        inner: config.event_sink.take(),
        handler,
    }));

    async_stream::stream! {
        let run_fut = Runner::run(initial_state, &config);
        tokio::pin!(run_fut);
        let mut finished = false;

        loop {
            if finished {
                // The run emitted everything it will; drain and end.
                while let Ok(event) = rx.try_recv() {
                    yield event;
                }
                break;
            }

            let mut next_event = None;
            tokio::select! {
                event = rx.recv() => next_event = event,
                _result = &mut run_fut => finished = true,
            }
            match next_event {
                Some(event) => yield event,
                None if finished => {}
                None => break,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::StreamExt as _;

    use crate::agent::{Agent, AgentRegistry};
    use crate::provider::{Completion, MockProvider};

    fn config_for(completions: Vec<Completion>) -> RunConfig {
        let registry = AgentRegistry::new().with_agent(
            Agent::new("echo")
                .instructions("Echo things.")
                .model("mock-model"),
        );
        RunConfig::new(registry, Arc::new(MockProvider::new(completions)))
    }

    #[tokio::test]
    async fn stream_yields_events_in_order_and_ends_after_run_end() {
        let config = config_for(vec![Completion::from_text("hello")]);
        let state = RunState::new("echo", "hi");

        let events: Vec<TraceEvent> = run_stream(state, config, None).collect().await;
        let kinds: Vec<&str> = events.iter().map(TraceEvent::kind).collect();

        assert_eq!(kinds.first(), Some(&"run_start"));
        assert_eq!(kinds.last(), Some(&"run_end"));
        assert!(kinds.contains(&"turn_start"));
        assert!(kinds.contains(&"final_output"));
    }

    #[tokio::test]
    async fn stream_forwards_to_original_sink_too() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        #[derive(Default)]
        struct Counter(AtomicUsize);

        #[async_trait]
        impl EventSink for Counter {
            async fn on_event(&self, _event: &TraceEvent) -> Option<Value> {
                self.0.fetch_add(1, Ordering::SeqCst);
                None
            }
        }

        let counter = Arc::new(Counter::default());
        let mut config = config_for(vec![Completion::from_text("hello")]);
        config.event_sink = Some(Arc::clone(&counter) as Arc<dyn EventSink>);

        let streamed: Vec<TraceEvent> =
            run_stream(RunState::new("echo", "hi"), config, None).collect().await;

        assert_eq!(counter.0.load(Ordering::SeqCst), streamed.len());
    }
}

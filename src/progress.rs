// Server-push progress over a request/response transport
//
// The transport has no native bidirectional channel, so progress is a
// unidirectional poll-and-diff event stream: read the registry on a short
// interval, emit only when the text changed, and close on a terminal phase
// or a hard wall-clock ceiling. A slow consumer only ever sees the latest
// value at poll time; intermediate states may be lost by design.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::Event;
use futures::stream::{self, Stream, StreamExt};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::registry::JobRegistry;

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Hard ceiling per subscription; the progress entry is reclaimed when it
/// fires even if the job never reached a terminal phase. A pending cancel
/// flag is left in place for the job itself to act on.
pub const SUBSCRIPTION_CEILING: Duration = Duration::from_secs(600);

/// Lazy, finite, non-restartable SSE sequence for one session.
pub fn progress_events(
    registry: Arc<JobRegistry>,
    session_id: String,
) -> impl Stream<Item = Result<Event, Infallible>> {
    progress_messages(registry, session_id, POLL_INTERVAL, SUBSCRIPTION_CEILING)
        .map(|message| Ok(frame(&message)))
}

struct PollState {
    registry: Arc<JobRegistry>,
    session_id: String,
    last_emitted: Option<String>,
    deadline: Instant,
    poll_interval: Duration,
    done: bool,
}

/// De-duplicated message sequence backing the SSE stream. Split from the
/// frame encoding so the polling logic is observable in tests.
fn progress_messages(
    registry: Arc<JobRegistry>,
    session_id: String,
    poll_interval: Duration,
    ceiling: Duration,
) -> impl Stream<Item = String> {
    let state = PollState {
        registry,
        session_id,
        last_emitted: None,
        deadline: Instant::now() + ceiling,
        poll_interval,
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.done {
            state.registry.clear(&state.session_id);
            return None;
        }

        loop {
            if Instant::now() >= state.deadline {
                // Only the progress entry is reclaimed here: the job may
                // still be running, and a pending cancel flag must keep
                // reaching it.
                state.registry.clear_progress(&state.session_id);
                return None;
            }

            if let Some(progress) = state.registry.get_progress(&state.session_id) {
                let message = progress.message().to_string();
                let changed = state.last_emitted.as_ref() != Some(&message);

                if changed {
                    state.last_emitted = Some(message.clone());
                    if progress.phase.is_terminal() {
                        // Emit the terminal frame, then close on the next
                        // pull and reclaim the entry.
                        state.done = true;
                    }
                    return Some((message, state));
                }

                if progress.phase.is_terminal() {
                    state.registry.clear(&state.session_id);
                    return None;
                }
            }

            tokio::time::sleep(state.poll_interval).await;
        }
    })
}

fn frame(message: &str) -> Event {
    let payload = serde_json::json!({ "message": message }).to_string();
    let event = Event::default().data(payload);
    match OffsetDateTime::now_utc().format(&Rfc3339) {
        Ok(stamp) => event.id(stamp),
        Err(_) => event,
    }
}

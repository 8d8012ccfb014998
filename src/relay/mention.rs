//! Mention handling: query extraction, the Dify call, and bookkeeping.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;
use log::{error, info, warn};

use crate::dify::AnswerSource;
use crate::error::RelayError;
use crate::types::{MentionEvent, Reply};

use super::{MALFORMED_EVENT_MESSAGE, RelayController, SYSTEM_ERROR_MESSAGE};

impl<C: AnswerSource> RelayController<C> {
    /// Produce exactly one reply for a mention, whatever happens on the way.
    pub async fn relay_mention(&self, event: &MentionEvent) -> Reply {
        match AssertUnwindSafe(self.handle_mention(event))
            .catch_unwind()
            .await
        {
            Ok(reply) => reply,
            Err(_) => {
                error!("Mention pipeline panicked for event {event:?}");
                Reply::new(SYSTEM_ERROR_MESSAGE, None)
            }
        }
    }

    async fn handle_mention(&self, event: &MentionEvent) -> Reply {
        info!("Mention event received: {event:?}");

        let (Some(text), Some(user)) = (event.text.as_deref(), event.user.as_deref()) else {
            warn!("Could not get message content: {event:?}");
            return Reply::new(MALFORMED_EVENT_MESSAGE, None);
        };

        let query = self.extract_query(text);
        let thread = event.conversation_key();

        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.client.answer(&query, user, thread))
            .catch_unwind()
            .await;
        let elapsed = started.elapsed().as_secs_f64();

        let (response, failed) = match outcome {
            Ok(Ok(answer)) => {
                info!("Relayed answer to {user} in {elapsed:.2}s");
                (answer, false)
            }
            Ok(Err(RelayError::InvalidInput)) => {
                warn!("Mention from {user} contained no question");
                return Reply::new(RelayError::InvalidInput.user_message(), thread);
            }
            Ok(Err(e)) => {
                error!(
                    "Error processing request from {user} ({}): {e}",
                    e.kind()
                );
                (e.user_message().to_string(), true)
            }
            Err(_) => {
                error!("Dify call panicked for {user} with query '{query}'");
                (SYSTEM_ERROR_MESSAGE.to_string(), true)
            }
        };

        if let Err(e) = self
            .store
            .save(user, &query, &response, elapsed, failed)
            .await
        {
            error!("Exchange for {user} was not persisted: {e}");
        }

        Reply::new(response, thread)
    }
}

//! Conversation session: one thread, its store, and the request in flight
//!
//! Every store mutation happens under the session lock and the listener is
//! notified before the lock is released, so observers see events in exactly
//! the order the chunks were decoded. Listeners must not call back into the
//! session.

use std::sync::Arc;

use futures::future::{AbortHandle, Abortable};
use futures::StreamExt;
use parking_lot::Mutex;

use crate::client::{AssistantBackend, Attachment, ClientError, Turn};
use crate::conversation::{ConversationStore, StoreEvent, ThreadId, Update};
use crate::stream;

/// Receives every observable store mutation
pub type Listener = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Message is empty and no files are attached")]
    EmptyMessage,

    #[error("A request is already in flight")]
    Busy,

    #[error("This assistant does not accept attachments")]
    AttachmentsUnsupported,
}

/// How a submitted turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The stream ended with `[DONE]` or ran out
    Completed,
    /// The request or the stream failed; an error message was appended
    Failed,
    /// Aborted by `cancel` or `new_thread`
    Cancelled,
}

struct InFlight {
    handle: AbortHandle,
    request: u64,
}

struct SessionState {
    thread: ThreadId,
    store: ConversationStore,
    staged: Vec<Attachment>,
    in_flight: Option<InFlight>,
    requests: u64,
}

pub struct ConversationSession {
    backend: Arc<dyn AssistantBackend>,
    state: Mutex<SessionState>,
    listener: Option<Listener>,
}

/// Releases the busy state when a submit future finishes or is dropped
struct RequestGuard<'a> {
    session: &'a ConversationSession,
    request: u64,
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.session.release(self.request);
    }
}

impl ConversationSession {
    pub fn new(backend: Arc<dyn AssistantBackend>) -> Self {
        Self {
            backend,
            state: Mutex::new(SessionState {
                thread: ThreadId::generate(),
                store: ConversationStore::new(),
                staged: Vec::new(),
                in_flight: None,
                requests: 0,
            }),
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: impl Fn(&StoreEvent) + Send + Sync + 'static) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    pub fn thread_id(&self) -> ThreadId {
        self.state.lock().thread.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.state.lock().in_flight.is_some()
    }

    pub fn with_store<R>(&self, f: impl FnOnce(&ConversationStore) -> R) -> R {
        f(&self.state.lock().store)
    }

    pub fn stage_attachment(&self, attachment: Attachment) -> Result<(), SessionError> {
        if !self.backend.accepts_attachments() {
            return Err(SessionError::AttachmentsUnsupported);
        }
        self.state.lock().staged.push(attachment);
        Ok(())
    }

    pub fn staged(&self) -> Vec<String> {
        self.state
            .lock()
            .staged
            .iter()
            .map(|a| a.file_name.clone())
            .collect()
    }

    pub fn clear_staged(&self) {
        self.state.lock().staged.clear();
    }

    fn emit(&self, event: &StoreEvent) {
        if let Some(listener) = &self.listener {
            listener(event);
        }
    }

    /// Send one user turn and stream the reply into the store.
    ///
    /// The human message is appended before the request goes out. Transport
    /// and HTTP failures are reported in-band as an error message, so the
    /// only errors returned here are rejections that leave the store untouched.
    pub async fn submit(&self, text: &str) -> Result<TurnOutcome, SessionError> {
        let (thread, turn, registration, request) = {
            let mut state = self.state.lock();
            if state.in_flight.is_some() {
                return Err(SessionError::Busy);
            }
            if text.trim().is_empty() && state.staged.is_empty() {
                return Err(SessionError::EmptyMessage);
            }

            let attachments = std::mem::take(&mut state.staged);
            let names = attachments.iter().map(|a| a.file_name.clone()).collect();
            let event = state.store.push_human(text, names);
            self.emit(&event);

            let (handle, registration) = AbortHandle::new_pair();
            state.requests += 1;
            let request = state.requests;
            state.in_flight = Some(InFlight { handle, request });

            let turn = Turn {
                message: text.to_string(),
                attachments,
            };
            (state.thread.clone(), turn, registration, request)
        };

        let _guard = RequestGuard {
            session: self,
            request,
        };

        match Abortable::new(self.run(&thread, &turn, request), registration).await {
            Ok(outcome) => Ok(outcome),
            Err(_) => {
                tracing::info!("Run on {} was cancelled", thread);
                Ok(TurnOutcome::Cancelled)
            }
        }
    }

    async fn run(&self, thread: &ThreadId, turn: &Turn, request: u64) -> TurnOutcome {
        let chunks = match self.backend.open_run(thread, turn).await {
            Ok(chunks) => chunks,
            Err(e) => {
                self.fail(request, &e);
                return TurnOutcome::Failed;
            }
        };

        let updates = stream::updates(chunks);
        futures::pin_mut!(updates);

        while let Some(update) = updates.next().await {
            match update {
                Ok(update) => self.fold(request, update),
                Err(e) => {
                    self.fail(request, &e);
                    return TurnOutcome::Failed;
                }
            }
        }

        TurnOutcome::Completed
    }

    fn fold(&self, request: u64, update: Update) {
        let mut state = self.state.lock();
        if !state.is_current(request) {
            return;
        }
        for event in state.store.apply(update) {
            self.emit(&event);
        }
    }

    fn fail(&self, request: u64, error: &ClientError) {
        tracing::warn!("Run failed: {}", error);
        let mut state = self.state.lock();
        if !state.is_current(request) {
            return;
        }
        let event = state
            .store
            .push_error(&format!("Sorry, I encountered an error: {}", error));
        self.emit(&event);
    }

    /// Clear the busy state for `request` and freeze its reply
    fn release(&self, request: u64) {
        let mut state = self.state.lock();
        if !state.is_current(request) {
            return;
        }
        state.in_flight = None;
        if let Some(event) = state.store.settle() {
            self.emit(&event);
        }
    }

    /// Abort the request in flight, keeping whatever was streamed so far.
    /// Returns `false` when there was nothing to cancel.
    pub fn cancel(&self) -> bool {
        let request = {
            let state = self.state.lock();
            match &state.in_flight {
                Some(in_flight) => {
                    in_flight.handle.abort();
                    in_flight.request
                }
                None => return false,
            }
        };
        self.release(request);
        true
    }

    /// Start a fresh conversation.
    ///
    /// Aborts any request in flight, rotates the thread id and empties the
    /// store. Files held for the old thread are deleted in the background;
    /// a failure there is only logged. Must be called within a Tokio runtime.
    pub fn new_thread(&self) -> ThreadId {
        let (previous, next, dropped) = {
            let mut state = self.state.lock();
            if let Some(in_flight) = state.in_flight.take() {
                in_flight.handle.abort();
            }

            let next = ThreadId::generate();
            let previous = std::mem::replace(&mut state.thread, next.clone());
            state.staged.clear();
            let dropped = state.store.len();
            let event = state.store.clear();
            self.emit(&event);
            (previous, next, dropped)
        };

        tracing::info!(
            "Started {} (replacing {}, {} message(s) dropped)",
            next,
            previous,
            dropped
        );

        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            if let Err(e) = backend.clear_thread_files(&previous).await {
                tracing::warn!("Could not clear files for {}: {}", previous, e);
            }
        });

        next
    }
}

impl SessionState {
    fn is_current(&self, request: u64) -> bool {
        self.in_flight
            .as_ref()
            .map_or(false, |in_flight| in_flight.request == request)
    }
}

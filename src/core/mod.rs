//! Core conversation components
//!
//! A [`ConversationSession`] is the single owner of one thread's state. Views
//! subscribe to it instead of keeping their own copy of the conversation.

mod session;

pub use session::{ConversationSession, Listener, SessionError, TurnOutcome};

//! Plain-text transcript rendering

use std::io::Write;

use parking_lot::Mutex;

use crate::conversation::{Message, MessageId, Role, StoreEvent};

struct RenderState<W> {
    out: W,
    /// The assistant message currently being printed and what is on screen
    open: Option<(MessageId, String)>,
}

/// Prints store events as they happen. Streaming replies are written
/// incrementally: only the new suffix when content grows, a fresh line
/// when it is rewritten.
pub struct TerminalRenderer<W> {
    assistant_name: String,
    state: Mutex<RenderState<W>>,
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W, assistant_name: impl Into<String>) -> Self {
        Self {
            assistant_name: assistant_name.into(),
            state: Mutex::new(RenderState { out, open: None }),
        }
    }

    pub fn render(&self, event: &StoreEvent) {
        let mut state = self.state.lock();
        // Terminal write errors are not worth interrupting a conversation for
        let _ = self.write_event(&mut state, event);
        let _ = state.out.flush();
    }

    fn write_event(&self, state: &mut RenderState<W>, event: &StoreEvent) -> std::io::Result<()> {
        match event {
            StoreEvent::Appended(message) if message.role == Role::Assistant => {
                close_line(state)?;
                write!(state.out, "{}> {}", self.assistant_name, message.content)?;
                state.open = Some((message.id, message.content.clone()));
            }
            StoreEvent::Appended(message) => {
                close_line(state)?;
                writeln!(state.out, "{}", self.line(message))?;
            }
            StoreEvent::Updated(message) => {
                let shown = match &state.open {
                    Some((id, shown)) if *id == message.id => Some(shown.clone()),
                    _ => None,
                };
                match shown {
                    Some(shown) if message.content.starts_with(&shown) => {
                        write!(state.out, "{}", &message.content[shown.len()..])?;
                    }
                    _ => {
                        close_line(state)?;
                        write!(state.out, "{}> {}", self.assistant_name, message.content)?;
                    }
                }
                state.open = Some((message.id, message.content.clone()));
            }
            StoreEvent::Settled(id) => {
                if matches!(&state.open, Some((open, _)) if open == id) {
                    close_line(state)?;
                }
            }
            StoreEvent::Cleared => {
                close_line(state)?;
                writeln!(state.out, "--- new conversation ---")?;
            }
        }
        Ok(())
    }

    fn line(&self, message: &Message) -> String {
        let prefix = match message.role {
            Role::Human => "you",
            Role::Error => "error",
            Role::Assistant => self.assistant_name.as_str(),
        };
        if message.attachments.is_empty() {
            format!("{}> {}", prefix, message.content)
        } else {
            format!(
                "{}> {} [attached: {}]",
                prefix,
                message.content,
                message.attachments.join(", ")
            )
        }
    }
}

fn close_line<W: Write>(state: &mut RenderState<W>) -> std::io::Result<()> {
    if state.open.take().is_some() {
        writeln!(state.out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(renderer: TerminalRenderer<Vec<u8>>) -> String {
        String::from_utf8(renderer.state.into_inner().out).unwrap()
    }

    fn assistant(id: u64, content: &str) -> Message {
        Message::new(MessageId(id), Role::Assistant, content)
    }

    #[test]
    fn test_streaming_reply_prints_suffixes() {
        let renderer = TerminalRenderer::new(Vec::new(), "energy");
        renderer.render(&StoreEvent::Appended(
            Message::new(MessageId(1), Role::Human, "hi").with_attachments(vec!["a.pdf".into()]),
        ));
        renderer.render(&StoreEvent::Appended(assistant(2, "He")));
        renderer.render(&StoreEvent::Updated(assistant(2, "Hello")));
        renderer.render(&StoreEvent::Updated(assistant(2, "Hello!")));
        renderer.render(&StoreEvent::Settled(MessageId(2)));

        assert_eq!(output(renderer), "you> hi [attached: a.pdf]\nenergy> Hello!\n");
    }

    #[test]
    fn test_rewritten_reply_is_reprinted() {
        let renderer = TerminalRenderer::new(Vec::new(), "bot");
        renderer.render(&StoreEvent::Appended(assistant(1, "draft")));
        renderer.render(&StoreEvent::Updated(assistant(1, "final")));
        renderer.render(&StoreEvent::Appended(Message::new(
            MessageId(2),
            Role::Error,
            "lost connection",
        )));
        renderer.render(&StoreEvent::Settled(MessageId(1)));
        renderer.render(&StoreEvent::Cleared);

        assert_eq!(
            output(renderer),
            "bot> draft\nbot> final\nerror> lost connection\n--- new conversation ---\n"
        );
    }
}

//! Line-oriented driver for a conversation session

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::client::{AssistantClient, Attachment};
use crate::config::{AssistantConfig, PortalConfig};
use crate::conversation::Entry;
use crate::core::{ConversationSession, SessionError, TurnOutcome};

const HELP: &str = "\
Commands:
  /new             start a new conversation
  /attach <path>   stage a file for the next message
  /detach          drop staged files
  /files           list files uploaded for this assistant
  /upload <path>   upload a file for this assistant
  /rm <name>       delete an uploaded file
  /clear-files     delete every uploaded file for this assistant
  /assistants      list available assistants
  /history         reprint this conversation
  /thread          show the current thread id
  /help            show this help
  /quit            exit
Anything else is sent to the assistant. Ctrl-C cancels a reply in progress.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    NewThread,
    Attach(PathBuf),
    Detach,
    ListFiles,
    Upload(PathBuf),
    Remove(String),
    ClearFiles,
    Assistants,
    History,
    Thread,
    Help,
    Quit,
    Invalid(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if !trimmed.starts_with('/') {
            return Command::Say(line.trim_end_matches(['\r', '\n']).to_string());
        }

        let (name, arg) = match trimmed.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (trimmed, ""),
        };

        match (name, arg.is_empty()) {
            ("/new", _) => Command::NewThread,
            ("/attach", false) => Command::Attach(PathBuf::from(arg)),
            ("/detach", _) => Command::Detach,
            ("/files", _) => Command::ListFiles,
            ("/upload", false) => Command::Upload(PathBuf::from(arg)),
            ("/rm", false) => Command::Remove(arg.to_string()),
            ("/clear-files", _) => Command::ClearFiles,
            ("/assistants", _) => Command::Assistants,
            ("/history", _) => Command::History,
            ("/thread", _) => Command::Thread,
            ("/help", _) => Command::Help,
            ("/quit", _) | ("/exit", _) => Command::Quit,
            ("/attach", true) | ("/upload", true) => {
                Command::Invalid(format!("{} needs a file path", name))
            }
            ("/rm", true) => Command::Invalid("/rm needs a file name".to_string()),
            _ => Command::Invalid(format!("Unknown command: {} (try /help)", name)),
        }
    }
}

pub struct Repl {
    pub session: Arc<ConversationSession>,
    pub client: Arc<AssistantClient>,
    pub portal: PortalConfig,
    pub assistant: AssistantConfig,
}

impl Repl {
    pub async fn run<R: AsyncBufRead + Unpin>(&self, input: R) -> anyhow::Result<()> {
        self.run_until(input, || async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Could not listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Read commands until EOF, `/quit`, or `interrupt` resolving while idle.
    /// While a reply streams, Ctrl-C cancels the reply instead.
    async fn run_until<R, F, Fut>(&self, input: R, interrupt: F) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        F: Fn() -> Fut,
        Fut: Future<Output = ()>,
    {
        println!(
            "{}{}",
            self.assistant.name,
            self.assistant
                .description
                .as_deref()
                .map(|d| format!(" - {}", d))
                .unwrap_or_default()
        );
        println!("Type /help for commands.");

        let mut lines = input.lines();
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = interrupt() => {
                    println!();
                    break;
                }
            };
            let Some(line) = line else { break };

            match Command::parse(&line) {
                Command::Quit => break,
                command => self.dispatch(command).await,
            }
        }

        Ok(())
    }

    async fn dispatch(&self, command: Command) {
        let domain = self.assistant.id.as_str();
        let files = self.client.files();

        match command {
            Command::Say(text) => self.say(&text).await,
            Command::NewThread => {
                let thread = self.session.new_thread();
                tracing::debug!("Now on {}", thread);
            }
            Command::Attach(path) => match Attachment::from_path(&path, &self.portal.uploads).await {
                Ok(attachment) => {
                    let name = attachment.file_name.clone();
                    let kind = if attachment.is_image() { "image" } else { "document" };
                    match self.session.stage_attachment(attachment) {
                        Ok(()) => println!(
                            "staged {} {} ({} file(s) ready)",
                            kind,
                            name,
                            self.session.staged().len()
                        ),
                        Err(e) => println!("! {}", e),
                    }
                }
                Err(e) => println!("! {}", e),
            },
            Command::Detach => {
                self.session.clear_staged();
                println!("staged files cleared");
            }
            Command::ListFiles => match files.list(domain).await {
                Ok(names) if names.is_empty() => println!("no files uploaded for {}", domain),
                Ok(names) => names.iter().for_each(|n| println!("  {}", n)),
                Err(e) => println!("! {}", e),
            },
            Command::Upload(path) => {
                let result = match Attachment::from_path(&path, &self.portal.uploads).await {
                    Ok(attachment) => files
                        .upload(domain, &attachment)
                        .await
                        .map(|_| attachment.file_name)
                        .map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                match result {
                    Ok(name) => println!("uploaded {}", name),
                    Err(e) => println!("! {}", e),
                }
            }
            Command::Remove(name) => match files.delete(domain, &name).await {
                Ok(()) => println!("deleted {}", name),
                Err(e) => println!("! {}", e),
            },
            Command::ClearFiles => match files.clear(domain).await {
                Ok(()) => println!("cleared files for {}", domain),
                Err(e) => println!("! {}", e),
            },
            Command::Assistants => {
                for a in &self.portal.assistants {
                    let marker = if a.id == self.assistant.id { "*" } else { " " };
                    println!("{} {:<14} {}", marker, a.id, a.name);
                }
            }
            Command::History => self.session.with_store(|store| {
                if store.is_empty() {
                    println!("no messages yet");
                }
                for entry in store.entries() {
                    println!("{}", history_line(entry));
                }
            }),
            Command::Thread => {
                let busy = if self.session.is_busy() { " (reply in progress)" } else { "" };
                println!("{}{}", self.session.thread_id(), busy);
            }
            Command::Help => println!("{}", HELP),
            Command::Invalid(reason) => println!("! {}", reason),
            Command::Quit => {}
        }
    }

    async fn say(&self, text: &str) {
        let turn = self.session.submit(text);
        tokio::pin!(turn);

        let result = tokio::select! {
            result = &mut turn => result,
            _ = tokio::signal::ctrl_c() => {
                self.session.cancel();
                turn.await
            }
        };

        match result {
            Ok(TurnOutcome::Cancelled) => println!("(cancelled)"),
            Ok(_) => {}
            // Nothing to send; stay quiet like a disabled send button
            Err(SessionError::EmptyMessage) => {}
            Err(e) => println!("! {}", e),
        }
    }
}

fn history_line(entry: &Entry) -> String {
    let message = entry.message();
    let mut line = format!("[{}] {}", message.role.as_str(), message.content);
    if !message.attachments.is_empty() {
        line.push_str(&format!(" [attached: {}]", message.attachments.join(", ")));
    }
    if entry.is_in_progress() {
        line.push_str(" ...");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FilesClient;
    use crate::config::RequestFormat;

    use reqwest::Client;

    fn repl() -> Repl {
        // Nothing listens on port 1; none of these tests reach the network
        let files = FilesClient::new(Client::new(), "http://127.0.0.1:1").unwrap();
        let client = Arc::new(
            AssistantClient::new(Client::new(), "http://127.0.0.1:1", RequestFormat::Json, files)
                .unwrap(),
        );
        let portal = PortalConfig::builtin();
        let assistant = portal.assistant("energy").cloned().unwrap();
        Repl {
            session: Arc::new(ConversationSession::new(client.clone())),
            client,
            portal,
            assistant,
        }
    }

    #[tokio::test]
    async fn test_interrupt_exits_idle_prompt() {
        let repl = repl();
        // Writer stays open, so the reader never reaches EOF
        let (_writer, reader) = tokio::io::duplex(64);

        let finished = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            repl.run_until(tokio::io::BufReader::new(reader), || async {}),
        )
        .await;
        tokio_test::assert_ok!(finished.unwrap());
    }

    #[tokio::test]
    async fn test_quit_and_eof_end_the_loop() {
        let repl = repl();
        let pending = || std::future::pending::<()>();

        tokio_test::assert_ok!(repl.run_until(&b"/thread\n/quit\n/new\n"[..], pending).await);
        tokio_test::assert_ok!(repl.run_until(&b"/history\n"[..], pending).await);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("hello there"), Command::Say("hello there".to_string()));
        assert_eq!(Command::parse(""), Command::Say(String::new()));
        assert_eq!(Command::parse("/new"), Command::NewThread);
        assert_eq!(
            Command::parse("/attach  ~/bills/march.pdf "),
            Command::Attach(PathBuf::from("~/bills/march.pdf"))
        );
        assert_eq!(Command::parse("/rm q1 report.pdf"), Command::Remove("q1 report.pdf".to_string()));
        assert_eq!(Command::parse("/exit"), Command::Quit);
        assert!(matches!(Command::parse("/attach"), Command::Invalid(_)));
        assert!(matches!(Command::parse("/bogus"), Command::Invalid(_)));
        assert_eq!(Command::parse("/history"), Command::History);
    }

    #[test]
    fn test_history_line() {
        use crate::conversation::{Message, MessageId, Role};

        let human = Message::new(MessageId(1), Role::Human, "my bill")
            .with_attachments(vec!["march.pdf".into()]);
        assert_eq!(
            history_line(&Entry::Settled(human)),
            "[human] my bill [attached: march.pdf]"
        );

        let reply = Message::new(MessageId(2), Role::Assistant, "Looking");
        let streaming = Entry::InProgress {
            remote_id: None,
            message: reply,
        };
        assert_eq!(history_line(&streaming), "[assistant] Looking ...");
    }
}

//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Lobby door: a small chat room run as the default session script
//!
//! Users pick a name, register or enter a password, and then chat with
//! everyone else in the lobby. Accounts live in the `lobby/users` table.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use termgate_service::{
    LineEditor, LogLevel, Result, SessionContext, SessionId, SessionInput, SessionScript, env,
};
use tracing::debug;

const BANNER: &str = "\r\n\
    \x20 ╔════════════════════════════╗\r\n\
    \x20 ║   Welcome to the termgate  ║\r\n\
    \x20 ║           lobby            ║\r\n\
    \x20 ╚════════════════════════════╝\r\n\r\n";

const HELP: &str = "Commands:\r\n\
    \x20 /tell <session> <text>  private message\r\n\
    \x20 /whoami                 session details\r\n\
    \x20 /idle <minutes>         change the idle limit\r\n\
    \x20 /kick <session>         disconnect a session (sysop only)\r\n\
    \x20 /quit                   leave\r\n";

const PROMPT: &str = "> ";
const CHAT: &str = "chat";
const SCHEMA: &str = "lobby";
const USERS: &str = "users";
const SYSOP: &str = "sysop";
const MAX_ATTEMPTS: usize = 3;
const MAX_NAME_LEN: usize = 16;

/// The lobby session script
pub struct Lobby;

#[async_trait]
impl SessionScript for Lobby {
    async fn run(&self, ctx: &mut SessionContext) -> Result<()> {
        ctx.write(BANNER).await?;
        let Some(name) = ask_name(ctx).await? else {
            ctx.write("Too many invalid names. Goodbye.\r\n").await?;
            return Ok(());
        };
        if !authenticate(ctx, &name).await? {
            ctx.write("Login failed. Goodbye.\r\n").await?;
            return Ok(());
        }

        let visits = record_visit(ctx, &name).await?;
        ctx.write(format!(
            "\r\nHello {name}, this is visit number {visits}. Type /help for commands.\r\n"
        ))
        .await?;
        ctx.log(LogLevel::Info, format!("{name} entered the lobby")).await?;
        announce(ctx, format!("{name} has joined")).await?;

        chat(ctx, &name).await?;

        announce(ctx, format!("{name} has left")).await?;
        ctx.write("Goodbye!\r\n").await
    }
}

fn valid_name(name: &str) -> bool {
    (2..=MAX_NAME_LEN).contains(&name.len())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

async fn ask_name(ctx: &mut SessionContext) -> Result<Option<String>> {
    for _ in 0..MAX_ATTEMPTS {
        ctx.write("Name: ").await?;
        let name = ctx.read_line(true).await?.trim().to_lowercase();
        if valid_name(&name) {
            return Ok(Some(name));
        }
        ctx.write(format!(
            "Names are 2 to {MAX_NAME_LEN} letters, digits or underscores.\r\n"
        ))
        .await?;
    }
    Ok(None)
}

async fn read_secret(ctx: &mut SessionContext, prompt: &str) -> Result<String> {
    ctx.write(prompt).await?;
    let secret = ctx.read_line(false).await?;
    ctx.write("\r\n").await?;
    Ok(secret)
}

/// Register a new user or check an existing one's password
async fn authenticate(ctx: &mut SessionContext, name: &str) -> Result<bool> {
    let mut record = ctx.db(SCHEMA).get(USERS, name, Value::Null).await?;
    if record.is_null() {
        let password = read_secret(ctx, "New user. Choose a password: ").await?;
        record = ctx
            .db(SCHEMA)
            .call(USERS, "setdefault", vec![json!(name), json!({"password": password, "visits": 0})])
            .await?;
        // setdefault hands back whichever registration landed first
        if record["password"].as_str() == Some(password.as_str()) {
            return Ok(true);
        }
        ctx.write("Someone registered that name first.\r\n").await?;
    }

    for _ in 0..MAX_ATTEMPTS {
        let password = read_secret(ctx, "Password: ").await?;
        if record["password"].as_str() == Some(password.as_str()) {
            return Ok(true);
        }
        ctx.login_failed().await?;
        ctx.write("Incorrect password.\r\n").await?;
    }
    Ok(false)
}

/// Bump the visit counter under the table lock
async fn record_visit(ctx: &mut SessionContext, name: &str) -> Result<u64> {
    let mut db = ctx.db(SCHEMA);
    let _lock = db.lock(USERS).await;
    let mut record = db.get(USERS, name, json!({})).await?;
    let visits = record["visits"].as_u64().unwrap_or(0) + 1;
    record["visits"] = json!(visits);
    db.set(USERS, name, record).await?;
    Ok(visits)
}

async fn announce(ctx: &SessionContext, text: String) -> Result<()> {
    ctx.broadcast(CHAT, json!({"from": "*", "text": text})).await
}

async fn chat(ctx: &mut SessionContext, name: &str) -> Result<()> {
    let encoding = ctx.encoding();
    let mut editor = LineEditor::new();
    ctx.write(PROMPT).await?;
    loop {
        match ctx.recv().await? {
            SessionInput::Input(mut bytes) => loop {
                let (echoed, finished) = editor.feed(&bytes, encoding);
                if !echoed.is_empty() {
                    ctx.write(echoed).await?;
                }
                let Some((line, rest)) = finished else {
                    break;
                };
                if !command(ctx, name, line.trim()).await? {
                    return Ok(());
                }
                ctx.write(PROMPT).await?;
                bytes = rest;
            },
            SessionInput::Event { name: event, payload } if event == CHAT => {
                let from = payload["from"].as_str().unwrap_or("?");
                let text = payload["text"].as_str().unwrap_or_default();
                // redraw the prompt and the partly typed line below the message
                let typed = encoding.decode(editor.pending());
                ctx.write(format!("\r\x1b[K{from}: {text}\r\n{PROMPT}{typed}"))
                    .await?;
            }
            SessionInput::Refresh { columns, rows } => {
                debug!(columns, rows, "Lobby terminal resized");
            }
            other => debug!(event = %other, "Lobby ignored event"),
        }
    }
}

/// Run one typed line; false ends the chat
async fn command(ctx: &mut SessionContext, name: &str, line: &str) -> Result<bool> {
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    match verb {
        "" => {}
        "/quit" => return Ok(false),
        "/help" => ctx.write(HELP).await?,
        "/whoami" => {
            let (columns, rows) = ctx.terminal_size();
            let term = ctx.environment().get(env::TERM).unwrap_or("unknown").to_string();
            ctx.write(format!(
                "{name} on {} via {}, {term} {columns}x{rows}, {}\r\n",
                ctx.id(),
                ctx.kind(),
                ctx.encoding()
            ))
            .await?;
        }
        "/tell" => match rest.split_once(' ') {
            Some((target, text)) if !text.trim().is_empty() => {
                let message = json!({"from": format!("{name} (private)"), "text": text.trim()});
                ctx.route(&SessionId::from(target), CHAT, message).await?;
                ctx.write(format!("to {target}: {}\r\n", text.trim())).await?;
            }
            _ => ctx.write("Usage: /tell <session> <text>\r\n").await?,
        },
        "/idle" => match rest.trim().parse::<u64>() {
            Ok(minutes) if minutes > 0 => {
                ctx.set_timeout(Duration::from_secs(minutes * 60)).await?;
                ctx.write(format!("Idle limit set to {minutes} minutes.\r\n")).await?;
            }
            _ => ctx.write("Usage: /idle <minutes>\r\n").await?,
        },
        "/kick" if name == SYSOP => {
            let target = rest.trim();
            ctx.disconnect(&SessionId::from(target)).await?;
            ctx.log(LogLevel::Warn, format!("{name} disconnected {target}")).await?;
            ctx.write(format!("Disconnected {target}.\r\n")).await?;
        }
        "/kick" => ctx.write("Only the sysop may do that.\r\n").await?,
        verb if verb.starts_with('/') => {
            ctx.write(format!("Unknown command {verb}. Try /help.\r\n")).await?;
        }
        _ => {
            ctx.broadcast(CHAT, json!({"from": name, "text": line})).await?;
            ctx.write(format!("{name}: {line}\r\n")).await?;
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc;
    use termgate_service::{
        EngineConfig, Environment, KvCommand, KvLocks, KvProxy, ProtocolKind, SessionHandle,
        SessionInfo, SessionMessage, spawn_session,
    };

    /// Plays the engine's part for one lobby session
    struct Driver {
        handle: SessionHandle,
        kv: KvProxy,
        screen: String,
        messages: Vec<SessionMessage>,
        _dir: tempfile::TempDir,
    }

    impl Driver {
        fn start() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let kv = KvProxy::new(dir.path());
            let mut environment = Environment::new();
            environment.set_size(80, 24);
            let handle = spawn_session(
                Arc::new(Lobby),
                SessionInfo {
                    id: SessionId::from("telnet-127.0.0.1:4000"),
                    kind: ProtocolKind::Telnet,
                    peer: "127.0.0.1:4000".parse().unwrap(),
                    environment,
                },
                Arc::new(EngineConfig::default()),
                KvLocks::new(),
            );
            Self {
                handle,
                kv,
                screen: String::new(),
                messages: Vec::new(),
                _dir: dir,
            }
        }

        fn add_user(&self, name: &str, password: &str) {
            self.kv
                .execute(&KvCommand {
                    schema: SCHEMA.to_string(),
                    table: USERS.to_string(),
                    method: "set".to_string(),
                    args: vec![json!(name), json!({"password": password, "visits": 4})],
                    streaming: false,
                })
                .unwrap();
        }

        async fn type_line(&self, text: &str) {
            let bytes = Bytes::from(format!("{text}\r\n"));
            self.handle.input.send(SessionInput::Input(bytes)).await.unwrap();
        }

        /// Serve the session until the screen shows `text`
        async fn until(&mut self, text: &str) {
            while !self.screen.contains(text) {
                let message = tokio::time::timeout(Duration::from_secs(5), self.handle.output.recv())
                    .await
                    .unwrap()
                    .unwrap_or_else(|| panic!("session ended before {text:?}"));
                self.serve(message).await;
            }
            let at = self.screen.find(text).unwrap() + text.len();
            self.screen.drain(..at);
        }

        /// Serve the session until it exits
        async fn until_exit(&mut self) {
            loop {
                let message = tokio::time::timeout(Duration::from_secs(5), self.handle.output.recv())
                    .await
                    .unwrap();
                match message {
                    Some(SessionMessage::Exit) | None => return,
                    Some(message) => self.serve(message).await,
                }
            }
        }

        async fn serve(&mut self, message: SessionMessage) {
            match message {
                SessionMessage::Output { text, .. } => self.screen.push_str(&text),
                SessionMessage::Db(command) => {
                    for reply in self.kv.replies(&command) {
                        let input = SessionInput::Db { schema: command.schema.clone(), reply };
                        self.handle.input.send(input).await.unwrap();
                    }
                }
                other => self.messages.push(other),
            }
        }
    }

    #[test]
    fn test_valid_name() {
        assert!(valid_name("bob"));
        assert!(valid_name("sysop_2"));
        assert!(!valid_name("b"));
        assert!(!valid_name("bob smith"));
        assert!(!valid_name("abcdefghijklmnopq"));
    }

    #[tokio::test]
    async fn test_new_user_registers_and_chats() {
        let mut driver = Driver::start();
        driver.until("Name: ").await;
        driver.type_line("Alice").await;
        driver.until("Choose a password: ").await;
        driver.type_line("secret").await;
        driver.until("visit number 1.").await;
        driver.until(PROMPT).await;

        driver.type_line("hello all").await;
        driver.until("alice: hello all").await;
        assert!(driver.messages.iter().any(|message| matches!(
            message,
            SessionMessage::Global { event, payload } if event == CHAT && payload["text"] == "hello all"
        )));

        driver.type_line("/quit").await;
        driver.until("Goodbye!").await;
        driver.until_exit().await;
    }

    #[tokio::test]
    async fn test_returning_user_visit_counted() {
        let mut driver = Driver::start();
        driver.add_user("bob", "pw");
        driver.until("Name: ").await;
        driver.type_line("bob").await;
        driver.until("Password: ").await;
        driver.type_line("pw").await;
        driver.until("visit number 5.").await;
    }

    #[tokio::test]
    async fn test_name_taken_while_choosing_password() {
        let mut driver = Driver::start();
        driver.until("Name: ").await;
        driver.type_line("bob").await;
        driver.until("Choose a password: ").await;
        // another session registers bob first
        driver.add_user("bob", "theirs");
        driver.type_line("mine").await;
        driver.until("Someone registered that name first.").await;
        driver.until("Password: ").await;
        driver.type_line("theirs").await;
        driver.until("visit number 5.").await;
    }

    #[tokio::test]
    async fn test_wrong_passwords_report_failures() {
        let mut driver = Driver::start();
        driver.add_user("bob", "pw");
        driver.until("Name: ").await;
        driver.type_line("bob").await;
        for _ in 0..MAX_ATTEMPTS {
            driver.until("Password: ").await;
            driver.type_line("guess").await;
        }
        driver.until("Login failed.").await;
        driver.until_exit().await;
        let failures = driver
            .messages
            .iter()
            .filter(|message| matches!(message, SessionMessage::LoginFailed))
            .count();
        assert_eq!(failures, MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_chat_event_redraws_prompt() {
        let mut driver = Driver::start();
        driver.until("Name: ").await;
        driver.type_line("carol").await;
        driver.until("password: ").await;
        driver.type_line("x").await;
        driver.until(PROMPT).await;

        driver
            .handle
            .input
            .send(SessionInput::Input(Bytes::from_static(b"hal")))
            .await
            .unwrap();
        driver.until("hal").await;
        driver
            .handle
            .input
            .send(SessionInput::Event {
                name: CHAT.to_string(),
                payload: json!({"from": "dave", "text": "hi carol"}),
            })
            .await
            .unwrap();
        driver.until("dave: hi carol\r\n> hal").await;
    }
}

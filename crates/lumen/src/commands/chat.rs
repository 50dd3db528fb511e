use async_trait::async_trait;
use eyre::{Result, bail, eyre};
use futures_util::StreamExt;
use std::future::Future;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use super::select::report;
use super::{ClientContext, Command};
use lumen_core::chat::{ChatEvent, ChatStreamClient};

const CLEAR_COMMAND: &str = "/clear";
const EXIT_COMMANDS: &[&str] = &["/exit", "/quit"];

pub struct ChatCommand {
    pub relay: Option<String>,
    pub model: Option<String>,
    pub min_update_interval_ms: Option<u64>,
    pub prompt: Option<String>,
}

#[async_trait]
impl Command for ChatCommand {
    async fn execute(&self) -> Result<()> {
        let context =
            ClientContext::connect(self.relay.as_deref(), self.min_update_interval_ms).await?;

        if let Some(model) = &self.model {
            report(model, context.lifecycle.select_model(model).await)?;
        }
        let Some(model) = context.store.get_state().selected_model else {
            bail!("No model selected; run `lumen select <model>` first");
        };

        match &self.prompt {
            Some(prompt) => stream_reply(&context.chat, prompt).await,
            None => interactive(&context.chat, &model).await,
        }
    }
}

async fn interactive(chat: &ChatStreamClient, model: &str) -> Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(
        stdout,
        "Chatting with {model}. {CLEAR_COMMAND} resets the conversation, /exit quits."
    )?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            () = interrupted() => None,
        };
        let Some(line) = line else {
            writeln!(stdout)?;
            return Ok(());
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if EXIT_COMMANDS.contains(&input) {
            return Ok(());
        }
        if input == CLEAR_COMMAND {
            chat.clear_history()?;
            writeln!(stdout, "Conversation cleared.")?;
            continue;
        }

        if let Err(e) = stream_reply(chat, input).await {
            writeln!(stdout, "\nError: {e}")?;
        }
    }
}

/// Send `prompt` and print the reply as it streams. Ctrl+C stops generation.
async fn stream_reply(chat: &ChatStreamClient, prompt: &str) -> Result<()> {
    let mut stdout = std::io::stdout();
    write_reply(chat, prompt, &mut stdout, interrupted).await
}

/// Resolves on Ctrl+C; never resolves if the handler cannot be installed.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Stream the reply to `prompt` into `out`, stopping generation whenever
/// `interrupt` resolves, including while the relay has not answered yet.
async fn write_reply<W, I, F>(
    chat: &ChatStreamClient,
    prompt: &str,
    out: &mut W,
    mut interrupt: I,
) -> Result<()>
where
    W: Write,
    I: FnMut() -> F,
    F: Future<Output = ()>,
{
    let sent = tokio::select! {
        sent = chat.send_message(prompt) => sent,
        () = interrupt() => {
            debug!(target: "lumen::chat", "Interrupted while waiting for the relay");
            chat.stop_response_generation();
            writeln!(out, "\n[Stopped]")?;
            return Ok(());
        }
    };
    let mut stream = match sent {
        Ok(stream) => stream,
        Err(e) if e.is_cancelled() => return Ok(()),
        Err(e) => return Err(eyre!(e)),
    };

    loop {
        let event = tokio::select! {
            event = stream.next() => event,
            () = interrupt() => {
                debug!(target: "lumen::chat", "Interrupted by user");
                chat.stop_response_generation();
                continue;
            }
        };

        match event {
            Some(Ok(ChatEvent::Chunk { chunk, .. })) => {
                write!(out, "{chunk}")?;
                out.flush()?;
            }
            Some(Ok(ChatEvent::Completed { stats, .. })) => {
                writeln!(out, "\n\n({stats})")?;
                return Ok(());
            }
            Some(Ok(ChatEvent::Stopped { .. })) => {
                writeln!(out, "\n\n[Stopped]")?;
                return Ok(());
            }
            Some(Err(e)) => return Err(e.into()),
            None => return Ok(()),
        }
    }
}

use crate::history::History;
use crate::provider::{ChatMessage, ChatRequest, ChunkStream, Provider, Role};
use crate::render::{ConsoleRenderer, RenderSink, DEFAULT_RENDER_INTERVAL};
use crate::stream::{Segment, StreamTextClassifier, Update};
use anyhow::Context;
use std::future::Future;
use std::io::Write;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_stream::StreamExt;

/// The streamed answer as received, before any classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub interrupted: bool,
}

fn render(sink: &mut impl RenderSink, update: Update) -> anyhow::Result<()> {
    for segment in update.segments {
        match segment {
            Segment::Text(text) => sink.plain_text(&text)?,
            Segment::Code(block) => sink.code_block(&block)?,
        }
    }
    Ok(())
}

/// Drive one reply through the classifier into `sink`.
///
/// Trailing state is finalized however the stream ends: normally, with an
/// error, or when `interrupt` resolves first. The sink is ticked every
/// render interval so throttled prose still reaches the screen while a
/// code block streams.
pub async fn stream_reply(
    mut stream: ChunkStream,
    sink: &mut impl RenderSink,
    interrupt: impl Future<Output = ()>,
) -> anyhow::Result<Reply> {
    let mut classifier = StreamTextClassifier::new();
    let mut text = String::new();
    let mut interrupted = false;
    let mut failure: Option<anyhow::Error> = None;

    let mut ticker = tokio::time::interval(DEFAULT_RENDER_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            item = stream.next() => match item {
                Some(Ok(chunk)) => {
                    text.push_str(&chunk.text);
                    if let Err(e) = render(sink, classifier.process(&chunk.text)) {
                        failure = Some(e.context("failed to render reply"));
                        break;
                    }
                }
                Some(Err(e)) => {
                    failure = Some(e.context("stream chunk error"));
                    break;
                }
                None => break,
            },
            _ = ticker.tick() => {
                if let Err(e) = sink.tick() {
                    failure = Some(e.context("failed to render reply"));
                    break;
                }
            }
            _ = &mut interrupt => {
                interrupted = true;
                break;
            }
        }
    }

    let tail = render(sink, classifier.finalize());
    let finished = sink.finish();
    if let Some(e) = failure {
        return Err(e);
    }
    tail?;
    finished?;

    tracing::debug!(chars = text.chars().count(), interrupted, "reply complete");
    Ok(Reply { text, interrupted })
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Start the request and stream its reply. `interrupt` covers both the
/// connection (including retries) and the streaming.
async fn ask<W: Write>(
    provider: &(dyn Provider + Send + Sync),
    model: &str,
    messages: Vec<ChatMessage>,
    out: &mut ConsoleRenderer<W>,
    interrupt: impl Future<Output = ()>,
) -> anyhow::Result<Reply> {
    let req = ChatRequest {
        model: model.to_string(),
        messages,
    };

    tokio::pin!(interrupt);
    let started = tokio::select! {
        res = provider.stream_chat(req) => Some(res),
        _ = &mut interrupt => None,
    };
    let Some(started) = started else {
        tracing::debug!(provider = provider.name(), "interrupted before the reply started");
        out.interrupted()?;
        return Ok(Reply {
            text: String::new(),
            interrupted: true,
        });
    };
    let stream = started
        .with_context(|| format!("{} provider failed to start streaming", provider.name()))?;

    let reply = stream_reply(stream, out, interrupt).await?;
    if reply.interrupted {
        out.interrupted()?;
    }
    Ok(reply)
}

/// Ask one question and print the answer.
pub async fn single_chat<W: Write>(
    provider: &(dyn Provider + Send + Sync),
    model: &str,
    system_prompt: &str,
    question: &str,
    out: &mut ConsoleRenderer<W>,
) -> anyhow::Result<()> {
    out.question(question)?;
    let messages = vec![
        ChatMessage::new(Role::System, system_prompt),
        ChatMessage::new(Role::User, question),
    ];
    ask(provider, model, messages, out, ctrl_c()).await?;
    Ok(())
}

/// What a block of user input asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Message(String),
    Exit,
    Clear,
    History,
}

/// Accumulates input lines until a terminator or command arrives.
#[derive(Debug, Default)]
pub struct InputCollector {
    lines: Vec<String>,
}

impl InputCollector {
    /// `.` alone ends a message; `.exit`, `.clear` and `.history` are
    /// commands and discard any partial message.
    pub fn feed(&mut self, line: &str) -> Option<Input> {
        let input = match line.trim() {
            ".exit" => Input::Exit,
            ".clear" => Input::Clear,
            ".history" => Input::History,
            "." => Input::Message(self.lines.join("\n")),
            _ => {
                self.lines.push(line.to_string());
                return None;
            }
        };
        self.lines.clear();
        Some(input)
    }

    /// Input ended. Whatever was typed is sent; otherwise the chat ends.
    pub fn finish(&mut self) -> Input {
        if self.lines.is_empty() {
            Input::Exit
        } else {
            Input::Message(std::mem::take(&mut self.lines).join("\n"))
        }
    }
}

/// Read stdin on a plain thread so a pending read never holds up shutdown.
pub fn spawn_line_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        use std::io::BufRead;
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn next_input(lines: &mut mpsc::UnboundedReceiver<String>) -> Input {
    let mut collector = InputCollector::default();
    while let Some(line) = lines.recv().await {
        if let Some(input) = collector.feed(&line) {
            return input;
        }
    }
    collector.finish()
}

/// One conversation turn: send the history, record the reply.
async fn turn<W: Write>(
    provider: &(dyn Provider + Send + Sync),
    model: &str,
    history: &mut History,
    question: String,
    out: &mut ConsoleRenderer<W>,
) -> anyhow::Result<()> {
    out.question(&question)?;
    history.push_user(question);

    match ask(provider, model, history.managed(), out, ctrl_c()).await {
        Ok(reply) if !reply.text.is_empty() => history.push_assistant(reply.text),
        Ok(_) => {
            // Nothing came back, so the question has no answer to pair with.
            history.pop_failed_user();
        }
        Err(e) => {
            tracing::debug!(error = %format!("{e:#}"), "turn failed");
            history.pop_failed_user();
            out.error(&format!("{e:#}"))?;
        }
    }
    Ok(())
}

/// Interactive multi-turn chat on stdin/stdout.
pub async fn continuous_chat<W: Write>(
    provider: &(dyn Provider + Send + Sync),
    model: &str,
    system_prompt: &str,
    initial: Option<String>,
    out: &mut ConsoleRenderer<W>,
) -> anyhow::Result<()> {
    let mut history = History::new(system_prompt);

    out.info("End a message with '.' on its own line.")?;
    out.info("Commands: .exit ends the chat, .clear forgets history, .history lists it.")?;

    if let Some(question) = initial.filter(|q| !q.trim().is_empty()) {
        turn(provider, model, &mut history, question, out).await?;
    }

    let mut lines = spawn_line_reader();
    loop {
        out.info("you (finish with '.'):")?;
        let input = tokio::select! {
            input = next_input(&mut lines) => input,
            _ = ctrl_c() => Input::Exit,
        };

        match input {
            Input::Exit => {
                out.info("Chat ended.")?;
                return Ok(());
            }
            Input::Clear => {
                history.reset();
                out.info("History cleared.")?;
            }
            Input::History => out.history(&history)?,
            Input::Message(text) if text.trim().is_empty() => {}
            Input::Message(text) => turn(provider, model, &mut history, text, out).await?,
        }
    }
}

use super::{ChatChunk, ChatRequest, ChunkStream, Provider, Role};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Offline provider that drips a canned answer.
///
/// Fragment boundaries deliberately fall inside fence markers and language
/// tags, which makes it handy for exercising the renderer without a key.
#[derive(Debug, Clone)]
pub struct StubProvider {
    delay: Duration,
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StubProvider {
    pub fn new() -> Self {
        Self {
            delay: Duration::from_millis(40),
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

/// The canned reply, split the way a real stream might split it.
pub fn script(model: &str, question: &str) -> Vec<String> {
    vec![
        format!("[stub provider, model: {model}]\n\nYou said: {question}\n\nHere is an ``"),
        "`ru".to_string(),
        "st\nfn main() {\n    println!(\"hi\");\n}\n``".to_string(),
        "`\nand some trailing prose.".to_string(),
    ]
}

impl Provider for StubProvider {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn stream_chat(
        &self,
        req: ChatRequest,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<ChunkStream>> + Send>> {
        let delay = self.delay;

        Box::pin(async move {
            let question = req
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let parts = script(&req.model, &question);

            let (tx, rx) = mpsc::channel::<anyhow::Result<ChatChunk>>(32);

            tokio::spawn(async move {
                for text in parts {
                    tokio::time::sleep(delay).await;
                    if tx.send(Ok(ChatChunk { text })).await.is_err() {
                        break;
                    }
                }
            });

            Ok(Box::pin(ReceiverStream::new(rx)) as ChunkStream)
        })
    }
}

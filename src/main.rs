use ag::{app, chat, cli, config, paths, render};
use anyhow::Context;
use clap::Parser;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr and stay quiet by default so they do not interleave with replies.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let config_path = paths::config_path()?;
    let cfg = config::Config::load_optional(&config_path)?;
    tracing::debug!(?config_path, ?cfg, "resolved config");

    let mut stdout = std::io::stdout();
    match args.cmd {
        Some(cli::Command::Config { action, api_key }) => {
            return app::cmd_config(action, api_key, &config_path, &mut stdout);
        }
        Some(cli::Command::ListModels) => {
            return app::cmd_list_models(cfg.as_ref(), &mut stdout);
        }
        None if args.list_models => {
            return app::cmd_list_models(cfg.as_ref(), &mut stdout);
        }
        None => {}
    }

    let provider_name = args
        .provider
        .clone()
        .or_else(|| cfg.as_ref().and_then(|c| c.provider.clone()))
        .unwrap_or_else(|| config::DEFAULT_PROVIDER.to_string());

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;

    let session = app::build_session(
        &http,
        cfg.as_ref(),
        &provider_name,
        args.model.as_deref(),
        &config_path,
    )?;
    tracing::debug!(provider = session.provider.name(), model = %session.model, "session ready");

    let mut out = render::ConsoleRenderer::stdout();
    let question = args.question.join(" ");

    if args.continuous || question.trim().is_empty() {
        let initial = (!question.trim().is_empty()).then_some(question);
        chat::continuous_chat(
            session.provider.as_ref(),
            &session.model,
            &session.system_prompt,
            initial,
            &mut out,
        )
        .await?;
        return Ok(());
    }

    chat::single_chat(
        session.provider.as_ref(),
        &session.model,
        &session.system_prompt,
        &question,
        &mut out,
    )
    .await
}

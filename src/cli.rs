use clap::{Parser, Subcommand, ValueEnum};

/// Streaming console chat for OpenAI-compatible model APIs
#[derive(Debug, Parser)]
#[command(name = "ag")]
#[command(version)]
#[command(about = "Multi-LLM chat in the console (DashScope by default)", long_about = None)]
pub struct Args {
    /// Model name or alias (see --list-models)
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,

    /// Keep chatting after the first answer
    #[arg(short = 'c', long = "continue")]
    pub continuous: bool,

    /// List model aliases and exit
    #[arg(short = 'l', long = "list-models")]
    pub list_models: bool,

    /// Provider (default: config/provider or "dashscope")
    #[arg(long = "provider")]
    pub provider: Option<String>,

    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Question text (positional); without it, an interactive chat starts
    #[arg(value_name = "QUESTION")]
    pub question: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage the stored API key
    Config {
        #[arg(value_enum)]
        action: ConfigAction,

        /// API key (required for `set`)
        #[arg(long = "api-key")]
        api_key: Option<String>,
    },

    /// List model aliases
    ListModels,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigAction {
    /// Save an API key to the config file
    Set,
    /// Show the current API key (masked) and where it comes from
    Get,
    /// Delete the config file
    Clear,
}

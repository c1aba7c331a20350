use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use shelleval::registry::Purpose;
use shelleval::sandbox::ByteSize;
use shelleval::{Config, Registry, Request, Service};

#[derive(Parser, Debug)]
#[command(name = "shelleval", version, about)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

/// Overrides for the `SHELLEVAL_*` environment.
#[derive(Args, Debug)]
struct Settings {
    /// Sandbox backend: podman, docker or docker-api
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Container engine binary
    #[arg(long, global = true)]
    runtime_bin: Option<String>,

    /// Per-stream capture cap (e.g. 256k)
    #[arg(long, global = true)]
    max_output_bytes: Option<String>,

    /// Reply length bound in characters
    #[arg(long, global = true)]
    max_message_chars: Option<usize>,

    /// Language for snippets without a tag
    #[arg(long, global = true)]
    default_language: Option<String>,

    /// Log output format
    #[arg(long, global = true, env = "SHELLEVAL_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a snippet
    Eval(SnippetArgs),

    /// Lint a snippet
    Check(SnippetArgs),

    /// Reformat a snippet
    Format(SnippetArgs),

    /// List supported languages and aliases
    Languages {
        /// Only list this purpose
        #[arg(long)]
        purpose: Option<Purpose>,
    },

    /// Answer JSON-lines requests on stdin
    Serve,
}

#[derive(Args, Debug)]
struct SnippetArgs {
    /// Language key; the message text is then used as-is
    #[arg(short, long)]
    lang: Option<String>,

    /// Caller label attached to the sandbox
    #[arg(long, default_value = "cli")]
    caller: String,

    /// Message file; reads stdin when omitted
    file: Option<PathBuf>,
}

impl Settings {
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(backend) = &self.backend {
            config.backend = backend.parse()?;
        }
        if let Some(bin) = &self.runtime_bin {
            config.runtime_bin = Some(bin.clone());
        }
        if let Some(size) = &self.max_output_bytes {
            let size: ByteSize = size
                .parse()
                .map_err(|e: String| anyhow::anyhow!("--max-output-bytes: {e}"))?;
            config.max_output_bytes = usize::try_from(size.as_u64())?;
        }
        if let Some(chars) = self.max_message_chars {
            config.max_message_chars = chars;
        }
        if let Some(language) = &self.default_language {
            config.default_language = language.to_lowercase();
        }
        config.validate()?;
        Ok(())
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shelleval=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn read_message(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("failed to read stdin")?;
            Ok(text)
        }
    }
}

fn print_languages(registry: &Registry, only: Option<Purpose>) {
    let purposes: Vec<Purpose> = match only {
        Some(purpose) => vec![purpose],
        None => Purpose::ALL.to_vec(),
    };
    for purpose in purposes {
        println!("{}:", purpose);
        for (key, aliases) in registry.languages(purpose) {
            if aliases.is_empty() {
                println!("  {}", key);
            } else {
                println!("  {:6} ({})", key, aliases.join(", "));
            }
        }
    }
}

async fn run_snippet(service: &Service, purpose: Purpose, args: SnippetArgs) -> Result<()> {
    let text = read_message(args.file.as_ref()).await?;
    let mut request = Request::new(purpose, text, args.caller);
    if let Some(lang) = args.lang {
        request = request.with_language(lang);
    }
    println!("{}", service.dispatch(request).await);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.settings.log_format);

    let mut config = Config::from_env()?;
    cli.settings.apply(&mut config)?;

    match cli.command {
        Command::Languages { purpose } => {
            print_languages(&Registry::builtin()?, purpose);
        }
        Command::Serve => {
            let service = Service::from_config(&config).await?;
            tracing::info!("Serving JSON-lines requests on stdin");
            shelleval::serve::serve(
                service,
                BufReader::new(tokio::io::stdin()),
                tokio::io::stdout(),
            )
            .await?;
        }
        Command::Eval(args) => {
            let service = Service::from_config(&config).await?;
            run_snippet(&service, Purpose::Evaluate, args).await?;
        }
        Command::Check(args) => {
            let service = Service::from_config(&config).await?;
            run_snippet(&service, Purpose::Check, args).await?;
        }
        Command::Format(args) => {
            let service = Service::from_config(&config).await?;
            run_snippet(&service, Purpose::Format, args).await?;
        }
    }

    Ok(())
}

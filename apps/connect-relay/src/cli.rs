use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use connect_protocol::{
    ApiErrorBody, ListSessionsResponse, MailboxMessage, SendSignalRequest, SessionCode,
    SignalKind,
};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::{Config, StorageBackend};

#[derive(Parser, Debug)]
#[command(name = "connect-relay")]
#[command(about = "Web-Connect signaling relay and debug client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the relay server (default when no command is given)
    Serve(ServeArgs),

    /// Poke a running relay over HTTP
    Debug {
        /// Relay base URL
        #[arg(short, long, env = "CONNECT_RELAY_URL", default_value = "http://localhost:8080")]
        url: String,

        #[command(subcommand)]
        command: DebugCommands,
    },
}

/// Overrides applied on top of `Config::from_env()`.
#[derive(Args, Debug, Default, Clone)]
pub struct ServeArgs {
    /// Listen port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Storage backend: memory or redis
    #[arg(long, value_parser = parse_backend)]
    pub backend: Option<StorageBackend>,

    /// Redis connection URL (redis backend only)
    #[arg(long)]
    pub redis_url: Option<String>,
}

impl ServeArgs {
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(url) = &self.redis_url {
            config.redis_url = url.clone();
        }
        config
    }
}

fn parse_backend(raw: &str) -> Result<StorageBackend, String> {
    StorageBackend::parse(raw).ok_or_else(|| format!("unknown backend {raw:?}"))
}

#[derive(Subcommand, Debug)]
pub enum DebugCommands {
    /// Queue a message in a code's mailbox
    Send {
        /// Target session code
        code: SessionCode,

        /// offer, answer or ice
        kind: SignalKind,

        /// JSON payload
        #[arg(default_value = "{}")]
        payload: String,
    },

    /// Drain a code's mailbox and print the messages
    Poll { code: SessionCode },

    /// List live sessions
    List,
}

pub async fn run_debug_client(url: String, command: DebugCommands) -> Result<()> {
    let base = url.trim_end_matches('/').to_string();
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    debug!(url = %base, ?command, "running debug command");

    match command {
        DebugCommands::Send {
            code,
            kind,
            payload,
        } => {
            let payload = serde_json::from_str(&payload).context("payload is not valid JSON")?;
            let request = SendSignalRequest {
                target_code: code.clone(),
                kind,
                payload,
            };
            let response = client
                .post(format!("{base}/api/signal/send"))
                .json(&request)
                .send()
                .await
                .context("relay unreachable")?;
            let _: serde_json::Value = decode(response).await?;
            println!("queued {kind} for {code}");
        }
        DebugCommands::Poll { code } => {
            let response = client
                .get(format!("{base}/api/signal/poll"))
                .query(&[("code", code.as_str())])
                .send()
                .await
                .context("relay unreachable")?;
            let messages: Vec<MailboxMessage> = decode(response).await?;
            if messages.is_empty() {
                println!("mailbox {code} is empty");
            }
            for message in messages {
                println!(
                    "{} {} {}",
                    message.enqueued_at,
                    message.kind,
                    serde_json::to_string(&message.payload)?
                );
            }
        }
        DebugCommands::List => {
            let response = client
                .get(format!("{base}/api/session/list"))
                .send()
                .await
                .context("relay unreachable")?;
            let list: ListSessionsResponse = decode(response).await?;
            if list.sessions.is_empty() {
                println!("no live sessions");
            }
            for session in list.sessions {
                println!(
                    "{}  {:<7} {}  ({})",
                    session.code,
                    format!("{:?}", session.status).to_lowercase(),
                    session.name,
                    session.owner
                );
            }
        }
    }
    Ok(())
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let body: Option<ApiErrorBody> = response.json().await.ok();
    Err(match body {
        Some(ApiErrorBody {
            error,
            message: Some(message),
        }) => anyhow!("relay returned {status}: {error}: {message}"),
        Some(ApiErrorBody { error, .. }) => anyhow!("relay returned {status}: {error}"),
        None => anyhow!("relay returned {status}"),
    })
}

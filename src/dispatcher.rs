// Dispatcher Module - Issues lamp commands as HTTP GET requests
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use reqwest::Url;
use tracing::{info, warn};

use crate::types::Rgb;

/// A command understood by the lamp, with its typed parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Color { id: usize, color: Rgb },
    Rainbow { action: String },
    Status,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Color { .. } => "color",
            Command::Rainbow { .. } => "rainbow",
            Command::Status => "status",
        }
    }

    pub fn params(&self) -> Vec<(&'static str, String)> {
        match self {
            Command::Color { id, color } => vec![
                ("r", color.r.to_string()),
                ("g", color.g.to_string()),
                ("b", color.b.to_string()),
                ("id", id.to_string()),
            ],
            Command::Rainbow { action } => vec![("action", action.clone())],
            Command::Status => Vec::new(),
        }
    }
}

/// Terminal outcome of one dispatched command.
///
/// Network failures are folded in with status 0 so callers only ever check
/// [`Reply::is_success`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Reply { status: 0, body: reason.into() }
    }
}

/// Anything that can carry a [`Command`] to a lamp.
///
/// The returned future resolves exactly once with the reply; it is `'static`
/// so it can be spawned and outlive the caller's borrow.
pub trait Dispatch: Clone + Send + Sync + 'static {
    fn dispatch(&self, command: Command) -> BoxFuture<'static, Reply>;
}

#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    base: Url,
}

impl HttpDispatcher {
    pub fn new(lamp_url: &str) -> Result<Self> {
        let mut base = Url::parse(lamp_url)
            .with_context(|| format!("Invalid lamp URL: {}", lamp_url))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("Lamp URL cannot be used as a base: {}", lamp_url);
        }
        // Commands are joined onto the base, so it has to look like a directory
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        // Lamps live on the local network, never route them through a proxy
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .context("Failed to build HTTP client")?;

        Ok(HttpDispatcher { client, base })
    }

    pub fn url_for(&self, command: &Command) -> Result<Url> {
        let mut url = self.base.join(command.name())?;
        let params = command.params();
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

impl Dispatch for HttpDispatcher {
    fn dispatch(&self, command: Command) -> BoxFuture<'static, Reply> {
        let client = self.client.clone();
        let url = self.url_for(&command);

        Box::pin(async move {
            let reply = match url {
                Ok(url) => match client.get(url).send().await {
                    Ok(response) => {
                        let status = response.status().as_u16();
                        match response.text().await {
                            Ok(body) => Reply { status, body },
                            Err(e) => Reply::failed(format!("Failed to read body: {}", e)),
                        }
                    }
                    Err(e) => Reply::failed(e.to_string()),
                },
                Err(e) => Reply::failed(e.to_string()),
            };

            if reply.status == 0 {
                warn!(command = command.name(), error = %reply.body, "lamp request failed");
            }
            info!(command = command.name(), status = reply.status, body = %reply.body, "lamp replied");
            reply
        })
    }
}

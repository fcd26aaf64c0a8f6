use std::io::Read;
use std::time::Duration;

use crate::models::{CoreError, CoreErrorKind};
use crate::tasks::download::{FetchFuture, Fetcher};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a> {
        let agent = self.agent.clone();
        let url = url.to_string();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || fetch_blocking(&agent, &url))
                .await
                .map_err(|error| {
                    CoreError::new(
                        CoreErrorKind::Internal,
                        format!("download worker failed: {error}"),
                    )
                })?
        })
    }
}

fn fetch_blocking(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>, CoreError> {
    let response = agent.get(url).call().map_err(|error| match error {
        ureq::Error::Status(code, _) => CoreError::new(
            CoreErrorKind::Network,
            format!("GET {url} returned HTTP {code}"),
        ),
        ureq::Error::Transport(transport) => CoreError::new(
            CoreErrorKind::Network,
            format!("GET {url} failed: {transport}"),
        ),
    })?;

    let mut bytes = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut bytes)
        .map_err(|error| {
            CoreError::new(
                CoreErrorKind::Network,
                format!("failed to read response from {url}: {error}"),
            )
        })?;
    Ok(bytes)
}

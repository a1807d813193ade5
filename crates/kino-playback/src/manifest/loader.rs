//! Manifest fetching
//!
//! [`RemoteManifestLoader`] owns the load flow (classify, fetch, follow the
//! timing resource or master playlist, parse). The transport is a [`UrlLoader`]
//! so the flow runs the same over reqwest and over canned responses.

use super::{classify_url, dash, hls, parse_date_ms, LoadOptions, ManifestData, ManifestLoader};
use crate::{Error, Result, TransferFormat, WindowType};
use async_trait::async_trait;
#[cfg(feature = "http")]
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Fetches a url as text
///
/// Never retries: retrying is expressed as CDN failover further up.
#[async_trait]
pub trait UrlLoader: Send + Sync {
    async fn load_text(&self, url: &str) -> Result<String>;
}

/// [`UrlLoader`] over reqwest
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpUrlLoader {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpUrlLoader {
    /// Client with the given request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl UrlLoader for HttpUrlLoader {
    async fn load_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::ManifestTimeout(url.to_string())
            } else {
                Error::Network(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ManifestFetch(format!("{url} returned {}", status.as_u16())));
        }
        Ok(response.text().await?)
    }
}

/// Manifest loader over any [`UrlLoader`]
#[derive(Debug, Clone)]
pub struct RemoteManifestLoader<L> {
    urls: L,
}

impl<L: UrlLoader> RemoteManifestLoader<L> {
    pub fn new(urls: L) -> Self {
        Self { urls }
    }

    pub fn url_loader(&self) -> &L {
        &self.urls
    }

    async fn load_dash(&self, url: &str, options: LoadOptions) -> Result<ManifestData> {
        let content = self
            .urls
            .load_text(url)
            .await
            .map_err(|e| Error::ManifestFetch(format!("Unable to retrieve DASH manifest: {e}")))?;
        if !content.trim_start().starts_with('<') {
            return Err(Error::ManifestFetch("Unable to retrieve DASH XML response".to_string()));
        }

        let wallclock = if options.window_type == WindowType::Static {
            None
        } else {
            self.wallclock_time(&content, options.initial_wallclock_time).await
        };

        Ok(match dash::parse_mpd(&content, options.window_type, wallclock) {
            Ok(time) => ManifestData::new(time, TransferFormat::Dash),
            Err(error) => {
                warn!(%error, url, "DASH manifest window could not be parsed");
                ManifestData::unparsed(TransferFormat::Dash, parse_message(error))
            }
        })
    }

    /// Server wallclock for a live MPD
    ///
    /// A host supplied time wins over the `UTCTiming` resource.
    async fn wallclock_time(
        &self,
        content: &str,
        initial_wallclock_time: Option<f64>,
    ) -> Option<f64> {
        if let Some(time) = initial_wallclock_time {
            return Some(time);
        }
        let resource = dash::timing_resource(content)?;
        match self.urls.load_text(&resource).await {
            Ok(body) => parse_date_ms(&body),
            Err(error) => {
                warn!(%error, resource, "Timing resource could not be fetched");
                None
            }
        }
    }

    async fn load_hls(&self, url: &str, options: LoadOptions) -> Result<ManifestData> {
        let master = self
            .urls
            .load_text(url)
            .await
            .map_err(|e| {
                Error::ManifestFetch(format!("Unable to retrieve HLS master playlist: {e}"))
            })?;
        if master.trim().is_empty() {
            return Err(Error::ManifestFetch("Unable to retrieve HLS master playlist".to_string()));
        }

        let stream_url = hls::stream_url(&master, url)?;
        debug!(stream_url, "Following HLS variant");

        let playlist = self
            .urls
            .load_text(&stream_url)
            .await
            .map_err(|e| {
                Error::ManifestFetch(format!("Unable to retrieve HLS live playlist: {e}"))
            })?;
        if playlist.trim().is_empty() {
            return Err(Error::ManifestFetch("Unable to retrieve HLS live playlist".to_string()));
        }

        Ok(match hls::parse_m3u8(&playlist, options.window_type) {
            Ok(time) => ManifestData::new(time, TransferFormat::Hls),
            Err(error) => {
                warn!(%error, url = stream_url, "HLS playlist window could not be parsed");
                ManifestData::unparsed(TransferFormat::Hls, parse_message(error))
            }
        })
    }
}

#[cfg(feature = "http")]
impl RemoteManifestLoader<HttpUrlLoader> {
    /// Loader over HTTP with the given request timeout
    pub fn http(timeout: Duration) -> Result<Self> {
        Ok(Self::new(HttpUrlLoader::new(timeout)?))
    }
}

#[async_trait]
impl<L: UrlLoader> ManifestLoader for RemoteManifestLoader<L> {
    #[instrument(skip(self))]
    async fn load(&self, url: &str, options: LoadOptions) -> Result<ManifestData> {
        match classify_url(url)? {
            TransferFormat::Dash => self.load_dash(url, options).await,
            TransferFormat::Hls => self.load_hls(url, options).await,
        }
    }
}

fn parse_message(error: Error) -> String {
    match error {
        Error::ManifestParse(message) | Error::ManifestTiming(message) => message,
        other => other.to_string(),
    }
}

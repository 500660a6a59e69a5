//! Authenticated, retried requests against the cut chart API

use std::path::Path;
use std::sync::Arc;

use common::Secret;
use cutchart_auth::Reachability;
use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE};
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use retry_policy::{RetryDecision, RetryPolicy, classify_status};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactType, JSON_MIME};
use crate::error::{Error, Result};
use crate::url::{build_url, path_and_query};

/// Cookie carrying the per-process session id.
pub const CORRELATION_COOKIE: &str = "CorrellationId";

#[derive(Debug, Deserialize)]
struct ProductList {
    #[serde(default)]
    products: Vec<Product>,
}

#[derive(Debug, Deserialize)]
struct Product {
    shortname: String,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    session_id: String,
    token: Secret<String>,
    retry: RetryPolicy,
    network: Option<Arc<dyn Reachability>>,
}

impl ApiClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        session_id: impl Into<String>,
        token: Secret<String>,
    ) -> Result<Self> {
        let base_url =
            Url::parse(base_url).map_err(|e| Error::InvalidUrl(format!("{base_url}: {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(Error::InvalidUrl(format!(
                "{base_url}: scheme must be http or https"
            )));
        }
        Ok(Self {
            http,
            base_url,
            session_id: session_id.into(),
            token,
            retry: RetryPolicy::default(),
            network: None,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Check `network` before every call and fail fast with
    /// `NoConnectivity` instead of spending the retry budget offline.
    pub fn with_reachability(mut self, network: Arc<dyn Reachability>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn build_url(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url> {
        build_url(&self.base_url, segments, query)
    }

    fn request(&self, url: &Url, artifact: ArtifactType) -> RequestBuilder {
        self.http
            .get(url.clone())
            .header(ACCEPT, artifact.accept())
            .header(COOKIE, format!("{CORRELATION_COOKIE}={}", self.session_id))
            .bearer_auth(self.token.expose())
    }

    /// Send a GET through the retry policy. Returns the final response
    /// whatever its status, with the number of attempts it took.
    async fn send(&self, url: &Url, artifact: ArtifactType) -> Result<(Response, u32)> {
        if let Some(network) = &self.network {
            if !network.is_available().await {
                warn!(path = %path_and_query(url), "network unreachable, not calling the cut chart API");
                return Err(Error::NoConnectivity);
            }
        }

        let mut attempts = 0;
        let result = self
            .retry
            .execute(|n| {
                attempts = n;
                self.request(url, artifact).send()
            })
            .await;
        let response = result?;
        debug!(
            path = %path_and_query(url),
            status = response.status().as_u16(),
            attempts,
            "cut chart API responded"
        );
        Ok((response, attempts))
    }

    /// Send a GET and require a 2xx answer.
    async fn send_ok(&self, url: &Url, artifact: ArtifactType) -> Result<Response> {
        let (response, attempts) = self.send(url, artifact).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        match classify_status(status.as_u16()) {
            RetryDecision::Retry => Err(Error::HttpTransient {
                status: status.as_u16(),
                attempts,
            }),
            RetryDecision::Terminate => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::HttpTerminal {
                    status: status.as_u16(),
                    body: body.trim().to_string(),
                })
            }
        }
    }

    /// Status of the API root.
    pub async fn is_available(&self) -> Result<StatusCode> {
        let url = self.build_url(&[], &[])?;
        let (response, _) = self.send(&url, ArtifactType::Json).await?;
        Ok(response.status())
    }

    /// Short names of the products the caller is licensed for.
    ///
    /// A 2xx answer that isn't JSON yields an empty list.
    pub async fn product_names(&self) -> Result<Vec<String>> {
        let url = self.build_url(&[], &[])?;
        let response = self.send_ok(&url, ArtifactType::Json).await?;

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with(JSON_MIME));
        if !is_json {
            warn!("product list response is not JSON");
            return Ok(Vec::new());
        }

        let body = response.text().await?;
        let list: ProductList = serde_json::from_str(&body)
            .map_err(|e| Error::Decode(format!("product list: {e}")))?;
        Ok(list.products.into_iter().map(|p| p.shortname).collect())
    }

    /// Download cut chart data for `product` (all products when `None`) to
    /// `out_path`, returning the number of bytes written.
    ///
    /// Nothing is created on disk unless the API answers 2xx. A body that
    /// fails mid-transfer removes the partial file.
    pub async fn download_cut_chart(
        &self,
        product: Option<&str>,
        units: &str,
        artifact: ArtifactType,
        out_path: &Path,
    ) -> Result<u64> {
        let url = self.build_url(&[product.unwrap_or_default()], &[("units", units)])?;
        let mut response = self.send_ok(&url, artifact).await?;

        let io_err = |source| Error::Io {
            path: out_path.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::create(out_path).await.map_err(io_err)?;

        let mut written = 0u64;
        let copied = async {
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await.map_err(io_err)?;
                written += chunk.len() as u64;
            }
            file.flush().await.map_err(io_err)?;
            file.sync_all().await.map_err(io_err)?;
            Ok::<(), Error>(())
        }
        .await;

        if let Err(e) = copied {
            drop(file);
            let _ = tokio::fs::remove_file(out_path).await;
            return Err(e);
        }

        info!(
            path = %out_path.display(),
            bytes = written,
            artifact = %artifact,
            "cut chart downloaded"
        );
        Ok(written)
    }
}

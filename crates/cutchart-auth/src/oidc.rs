//! OIDC capability: browser login over a loopback redirect, and refresh
//!
//! The interactive flow is authorization code + PKCE:
//!
//! 1. Discover the issuer's endpoints (cached for the process lifetime)
//! 2. Bind `127.0.0.1:{redirect_port}` before the browser is opened
//! 3. Open the authorization URL; log it too, in case no browser starts
//! 4. Wait (bounded) for the redirect carrying `code` and `state`
//! 5. Check `state`, exchange the code at the token endpoint

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use retry_policy::RetryPolicy;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::BoxFuture;
use crate::constants::{DEFAULT_LOGIN_TIMEOUT, DEFAULT_REDIRECT_PORT, DEFAULT_SCOPES, DISCOVERY_PATH};
use crate::error::{Error, Result};
use crate::pkce::{
    AuthorizationRequest, build_authorization_url, compute_challenge, generate_state,
    generate_verifier,
};
use crate::token::{CodeExchange, TokenResponse, exchange_code, refresh_token};

const MAX_CALLBACK_REQUEST: usize = 16 * 1024;

const SUCCESS_PAGE: &str = "<html><body><h1>Signed in</h1><p>You can close this window and return to the terminal.</p></body></html>";
const FAILURE_PAGE: &str = "<html><body><h1>Sign-in failed</h1><p>You can close this window. Details are in the terminal.</p></body></html>";

/// Tokens handed back by the issuer.
///
/// `id_token` is empty when the issuer did not send one (some refresh
/// grants). `expires_in` is seconds from now.
#[derive(Clone, Default)]
pub struct TokenSet {
    pub id_token: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("has_id_token", &!self.id_token.is_empty())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

impl From<TokenResponse> for TokenSet {
    fn from(response: TokenResponse) -> Self {
        Self {
            id_token: response.id_token.unwrap_or_default(),
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_in: response.expires_in,
        }
    }
}

/// External OIDC capability consumed by the lifecycle manager.
pub trait OidcClient: Send + Sync {
    /// Run a full browser-driven login.
    fn interactive_login(&self) -> BoxFuture<'_, Result<TokenSet>>;

    /// Trade a refresh token for new tokens.
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenSet>>;
}

#[derive(Debug, Clone)]
pub struct OidcConfig {
    /// Issuer base URL, e.g. `https://login.example.com/`
    pub authority: String,
    pub client_id: String,
    pub audience: Option<String>,
    pub scopes: String,
    /// 0 binds an ephemeral port (tests)
    pub redirect_port: u16,
    pub login_timeout: Duration,
}

impl OidcConfig {
    pub fn new(authority: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
            client_id: client_id.into(),
            audience: None,
            scopes: DEFAULT_SCOPES.to_string(),
            redirect_port: DEFAULT_REDIRECT_PORT,
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
        }
    }
}

/// Subset of the discovery document we use.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
}

/// Fetch `{authority}/.well-known/openid-configuration`.
pub async fn discover(
    client: &reqwest::Client,
    retry: &RetryPolicy,
    authority: &str,
) -> Result<ProviderMetadata> {
    let url = format!("{}/{DISCOVERY_PATH}", authority.trim_end_matches('/'));
    let response = retry
        .execute(|_| client.get(&url).send())
        .await
        .map_err(|e| Error::Discovery(format!("fetching {url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Discovery(format!("{url} returned {status}")));
    }

    let metadata = response
        .json::<ProviderMetadata>()
        .await
        .map_err(|e| Error::Discovery(format!("invalid discovery document at {url}: {e}")))?;
    debug!(token_endpoint = %metadata.token_endpoint, "discovered provider metadata");
    Ok(metadata)
}

/// Opens `url` in the user's browser.
pub type BrowserLauncher = Arc<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>;

/// `OidcClient` backed by a real issuer and a loopback redirect listener.
///
/// Every issuer round-trip (discovery, code exchange, refresh) goes through
/// the same retry policy as the API client.
pub struct LoopbackOidcClient {
    http: reqwest::Client,
    retry: RetryPolicy,
    config: OidcConfig,
    metadata: OnceCell<ProviderMetadata>,
    browser: BrowserLauncher,
}

impl LoopbackOidcClient {
    pub fn new(http: reqwest::Client, config: OidcConfig) -> Self {
        Self {
            http,
            retry: RetryPolicy::default(),
            config,
            metadata: OnceCell::new(),
            browser: Arc::new(|url: &str| open::that(url)),
        }
    }

    /// Replace how the authorization URL is opened.
    pub fn with_browser(mut self, browser: BrowserLauncher) -> Self {
        self.browser = browser;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn metadata(&self) -> Result<&ProviderMetadata> {
        self.metadata
            .get_or_try_init(|| discover(&self.http, &self.retry, &self.config.authority))
            .await
    }

    async fn run_login(&self) -> Result<TokenSet> {
        let metadata = self.metadata().await?;

        let listener = TcpListener::bind(("127.0.0.1", self.config.redirect_port))
            .await
            .map_err(|e| {
                Error::Callback(format!(
                    "binding loopback port {}: {e}",
                    self.config.redirect_port
                ))
            })?;
        let port = listener
            .local_addr()
            .map_err(|e| Error::Callback(format!("reading loopback address: {e}")))?
            .port();
        let redirect_uri = format!("http://127.0.0.1:{port}");

        let verifier = generate_verifier();
        let challenge = compute_challenge(&verifier);
        let state = generate_state();
        let authorize_url = build_authorization_url(
            &metadata.authorization_endpoint,
            &AuthorizationRequest {
                client_id: &self.config.client_id,
                redirect_uri: &redirect_uri,
                scopes: &self.config.scopes,
                audience: self.config.audience.as_deref(),
                challenge: &challenge,
                state: &state,
            },
        )?;

        info!(url = %authorize_url, "opening browser for sign-in");
        if let Err(e) = (self.browser)(authorize_url.as_str()) {
            warn!(error = %e, url = %authorize_url, "could not open a browser, open the URL manually");
        }

        let callback = tokio::time::timeout(self.config.login_timeout, accept_callback(&listener))
            .await
            .map_err(|_| {
                Error::Callback(format!(
                    "no sign-in callback within {}s",
                    self.config.login_timeout.as_secs()
                ))
            })??;
        drop(listener);

        let code = callback.into_code(&state)?;
        let tokens = exchange_code(
            &self.http,
            &self.retry,
            &metadata.token_endpoint,
            &CodeExchange {
                client_id: &self.config.client_id,
                code: &code,
                verifier: &verifier,
                redirect_uri: &redirect_uri,
            },
        )
        .await?;
        Ok(tokens.into())
    }

    async fn run_refresh(&self, refresh: &str) -> Result<TokenSet> {
        let metadata = self.metadata().await?;
        let tokens = refresh_token(
            &self.http,
            &self.retry,
            &metadata.token_endpoint,
            &self.config.client_id,
            refresh,
        )
        .await?;
        Ok(tokens.into())
    }
}

impl OidcClient for LoopbackOidcClient {
    fn interactive_login(&self) -> BoxFuture<'_, Result<TokenSet>> {
        Box::pin(self.run_login())
    }

    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenSet>> {
        Box::pin(self.run_refresh(refresh_token))
    }
}

/// Query parameters of the authorization redirect.
#[derive(Debug, Default, PartialEq, Eq)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl CallbackParams {
    fn parse(target: &str) -> Option<Self> {
        // The request target is origin-form; give it a base to parse against
        let url = Url::parse("http://127.0.0.1").ok()?.join(target).ok()?;
        let mut params = CallbackParams::default();
        for (key, value) in url.query_pairs() {
            let value = value.into_owned();
            match key.as_ref() {
                "code" => params.code = Some(value),
                "state" => params.state = Some(value),
                "error" => params.error = Some(value),
                "error_description" => params.error_description = Some(value),
                _ => {}
            }
        }
        Some(params)
    }

    fn is_redirect(&self) -> bool {
        self.code.is_some() || self.error.is_some()
    }

    fn into_code(self, expected_state: &str) -> Result<String> {
        if let Some(error) = self.error {
            return Err(Error::AuthenticationFailed(
                self.error_description.filter(|d| !d.is_empty()).unwrap_or(error),
            ));
        }
        if self.state.as_deref() != Some(expected_state) {
            return Err(Error::Callback("state mismatch in sign-in callback".into()));
        }
        self.code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Callback("sign-in callback carried no code".into()))
    }
}

/// Serve the loopback listener until the authorization redirect arrives.
///
/// Stray requests (favicon, probes, empty connections) get a 404 and the
/// loop keeps waiting.
async fn accept_callback(listener: &TcpListener) -> Result<CallbackParams> {
    loop {
        let (mut stream, peer) = listener
            .accept()
            .await
            .map_err(|e| Error::Callback(format!("accepting callback connection: {e}")))?;

        let target = match read_request_target(&mut stream).await {
            Ok(Some(target)) => target,
            Ok(None) => continue,
            Err(e) => {
                debug!(%peer, error = %e, "dropping unreadable callback connection");
                continue;
            }
        };

        match CallbackParams::parse(&target).filter(CallbackParams::is_redirect) {
            Some(params) => {
                let page = if params.error.is_some() {
                    FAILURE_PAGE
                } else {
                    SUCCESS_PAGE
                };
                respond(&mut stream, "200 OK", page).await;
                return Ok(params);
            }
            None => {
                debug!(%peer, request = %target, "ignoring non-callback request");
                respond(&mut stream, "404 Not Found", "").await;
            }
        }
    }
}

/// Read the request head and return the target of a GET, or `None` for
/// anything else.
async fn read_request_target(stream: &mut TcpStream) -> std::io::Result<Option<String>> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    while !buffer.windows(4).any(|w| w == b"\r\n\r\n") && buffer.len() < MAX_CALLBACK_REQUEST {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
    }

    let head = String::from_utf8_lossy(&buffer);
    let mut parts = head.lines().next().unwrap_or_default().split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) => Ok(Some(target.to_string())),
        _ => Ok(None),
    }
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!(error = %e, "failed writing callback response");
    }
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::extract::Form;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    type Recorded = Arc<Mutex<Vec<HashMap<String, String>>>>;

    /// Start an issuer with discovery and a token endpoint. Token requests
    /// are recorded; refresh with `rt_dead` is rejected.
    async fn start_issuer() -> (String, Recorded) {
        let recorded: Recorded = Arc::default();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let discovery_base = base.clone();
        let token_log = recorded.clone();
        let app = axum::Router::new()
            .route(
                "/.well-known/openid-configuration",
                get(move || {
                    let base = discovery_base.clone();
                    async move {
                        Json(json!({
                            "issuer": base,
                            "authorization_endpoint": format!("{base}/authorize"),
                            "token_endpoint": format!("{base}/oauth/token"),
                        }))
                    }
                }),
            )
            .route(
                "/oauth/token",
                post(move |Form(form): Form<HashMap<String, String>>| {
                    let token_log = token_log.clone();
                    async move {
                        token_log.lock().unwrap().push(form.clone());
                        match form.get("grant_type").map(String::as_str) {
                            Some("authorization_code") => (
                                StatusCode::OK,
                                Json(json!({
                                    "access_token": "at_login",
                                    "id_token": "id.login.token",
                                    "refresh_token": "rt_login",
                                    "expires_in": 3600,
                                })),
                            ),
                            Some("refresh_token") if form["refresh_token"] == "rt_dead" => (
                                StatusCode::BAD_REQUEST,
                                Json(json!({
                                    "error": "invalid_grant",
                                    "error_description": "Unknown or invalid refresh token.",
                                })),
                            ),
                            Some("refresh_token") => (
                                StatusCode::OK,
                                Json(json!({"access_token": "at_refreshed", "expires_in": 600})),
                            ),
                            _ => (StatusCode::IM_A_TEAPOT, Json(json!({}))),
                        }
                    }
                }),
            );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (base, recorded)
    }

    fn config(authority: &str) -> OidcConfig {
        OidcConfig {
            redirect_port: 0,
            login_timeout: Duration::from_secs(5),
            audience: Some("https://api.example.com".into()),
            ..OidcConfig::new(authority, "cc-cli-test")
        }
    }

    /// A browser that follows the authorization URL straight back to the
    /// redirect URI, optionally tampering with the query first.
    fn fake_browser(
        opened: Arc<Mutex<Vec<String>>>,
        tamper: fn(&mut Vec<(String, String)>),
    ) -> BrowserLauncher {
        Arc::new(move |url: &str| {
            opened.lock().unwrap().push(url.to_string());
            let url = Url::parse(url).unwrap();
            let mut query: Vec<(String, String)> = Vec::new();
            let mut redirect = String::new();
            for (key, value) in url.query_pairs() {
                match key.as_ref() {
                    "redirect_uri" => redirect = value.into_owned(),
                    "state" => query.push(("state".into(), value.into_owned())),
                    _ => {}
                }
            }
            query.push(("code".into(), "auth_code_123".into()));
            tamper(&mut query);

            let mut callback = Url::parse(&redirect).unwrap();
            callback.query_pairs_mut().extend_pairs(query);
            tokio::spawn(async move {
                // A stray favicon request must not end the wait
                let mut favicon = callback.clone();
                favicon.set_path("/favicon.ico");
                favicon.set_query(None);
                let _ = reqwest::get(favicon).await;
                let _ = reqwest::get(callback).await;
            });
            Ok(())
        })
    }

    #[tokio::test]
    async fn interactive_login_completes_pkce_flow() {
        let (base, recorded) = start_issuer().await;
        let opened = Arc::new(Mutex::new(Vec::new()));
        let client = LoopbackOidcClient::new(reqwest::Client::new(), config(&base))
            .with_browser(fake_browser(opened.clone(), |_| {}));

        let tokens = client.interactive_login().await.unwrap();
        assert_eq!(tokens.access_token, "at_login");
        assert_eq!(tokens.id_token, "id.login.token");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt_login"));
        assert_eq!(tokens.expires_in, Some(3600));

        let authorize = Url::parse(&opened.lock().unwrap()[0]).unwrap();
        assert!(authorize.as_str().starts_with(&format!("{base}/authorize?")));
        let params: HashMap<_, _> = authorize.query_pairs().into_owned().collect();
        assert_eq!(params["audience"], "https://api.example.com");
        assert_eq!(params["code_challenge_method"], "S256");

        let forms = recorded.lock().unwrap();
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0]["code"], "auth_code_123");
        assert_eq!(forms[0]["redirect_uri"], params["redirect_uri"]);
        assert_eq!(
            compute_challenge(&forms[0]["code_verifier"]),
            params["code_challenge"],
            "exchanged verifier must match the challenge sent to the browser"
        );
    }

    #[tokio::test]
    async fn state_mismatch_is_rejected_without_exchange() {
        let (base, recorded) = start_issuer().await;
        let client = LoopbackOidcClient::new(reqwest::Client::new(), config(&base)).with_browser(
            fake_browser(Arc::default(), |query| {
                for (key, value) in query.iter_mut() {
                    if key == "state" {
                        *value = "forged".into();
                    }
                }
            }),
        );

        let err = client.interactive_login().await.unwrap_err();
        assert!(matches!(err, Error::Callback(ref m) if m.contains("state")), "got: {err:?}");
        assert!(recorded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn issuer_error_redirect_surfaces_description() {
        let (base, _) = start_issuer().await;
        let client = LoopbackOidcClient::new(reqwest::Client::new(), config(&base)).with_browser(
            fake_browser(Arc::default(), |query| {
                query.retain(|(key, _)| key == "state");
                query.push(("error".into(), "access_denied".into()));
                query.push(("error_description".into(), "User declined consent".into()));
            }),
        );

        let err = client.interactive_login().await.unwrap_err();
        assert!(
            matches!(err, Error::AuthenticationFailed(ref m) if m == "User declined consent"),
            "got: {err:?}"
        );
    }

    #[tokio::test]
    async fn login_times_out_without_callback() {
        let (base, _) = start_issuer().await;
        let mut cfg = config(&base);
        cfg.login_timeout = Duration::from_millis(200);
        let client = LoopbackOidcClient::new(reqwest::Client::new(), cfg)
            .with_browser(Arc::new(|_: &str| Ok(())));

        let err = client.interactive_login().await.unwrap_err();
        assert!(matches!(err, Error::Callback(ref m) if m.contains("no sign-in callback")));
    }

    #[tokio::test]
    async fn browser_failure_still_waits_for_manual_callback() {
        let (base, _) = start_issuer().await;
        let opened = Arc::new(Mutex::new(Vec::new()));
        let follow = fake_browser(opened, |_| {});
        let client = LoopbackOidcClient::new(reqwest::Client::new(), config(&base)).with_browser(
            Arc::new(move |url: &str| {
                // The user opens the logged URL by hand
                follow(url)?;
                Err(std::io::Error::other("no display"))
            }),
        );

        let tokens = client.interactive_login().await.unwrap();
        assert_eq!(tokens.access_token, "at_login");
    }

    #[tokio::test]
    async fn refresh_uses_discovered_token_endpoint() {
        let (base, recorded) = start_issuer().await;
        let client = LoopbackOidcClient::new(reqwest::Client::new(), config(&base));

        let tokens = client.refresh("rt_live").await.unwrap();
        assert_eq!(tokens.access_token, "at_refreshed");
        assert!(tokens.id_token.is_empty());
        assert!(tokens.refresh_token.is_none());

        let forms = recorded.lock().unwrap();
        assert_eq!(forms[0]["refresh_token"], "rt_live");
        assert_eq!(forms[0]["client_id"], "cc-cli-test");
    }

    #[tokio::test]
    async fn refresh_survives_one_issuer_outage() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let hits = Arc::new(AtomicUsize::new(0));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let discovery_base = base.clone();
        let counter = hits.clone();
        let app = axum::Router::new()
            .route(
                "/.well-known/openid-configuration",
                get(move || {
                    let base = discovery_base.clone();
                    async move {
                        Json(json!({
                            "authorization_endpoint": format!("{base}/authorize"),
                            "token_endpoint": format!("{base}/oauth/token"),
                        }))
                    }
                }),
            )
            .route(
                "/oauth/token",
                post(move || {
                    let counter = counter.clone();
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({})))
                        } else {
                            (
                                StatusCode::OK,
                                Json(json!({"access_token": "at_refreshed", "expires_in": 600})),
                            )
                        }
                    }
                }),
            );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = LoopbackOidcClient::new(reqwest::Client::new(), config(&base))
            .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(5)));

        let tokens = client.refresh("rt_ok").await.unwrap();
        assert_eq!(tokens.access_token, "at_refreshed");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refresh_rejection_carries_issuer_reason() {
        let (base, _) = start_issuer().await;
        let client = LoopbackOidcClient::new(reqwest::Client::new(), config(&base));

        let err = client.refresh("rt_dead").await.unwrap_err();
        assert!(
            matches!(err, Error::InvalidCredentials(ref m) if m == "Unknown or invalid refresh token."),
            "got: {err:?}"
        );
    }

    #[tokio::test]
    async fn discovery_failure_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, axum::Router::new()).await.unwrap();
        });

        let err = discover(&reqwest::Client::new(), &RetryPolicy::default(), &base)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Discovery(ref m) if m.contains("404")), "got: {err:?}");
    }

    #[test]
    fn callback_params_parse_percent_encoding() {
        let params = CallbackParams::parse("/?code=a%2Fb&state=s%20t&extra=1").unwrap();
        assert_eq!(params.code.as_deref(), Some("a/b"));
        assert_eq!(params.state.as_deref(), Some("s t"));
        assert!(params.is_redirect());

        let stray = CallbackParams::parse("/favicon.ico").unwrap();
        assert!(!stray.is_redirect());
    }

    #[test]
    fn callback_without_code_is_rejected() {
        let params = CallbackParams {
            state: Some("s".into()),
            code: Some(String::new()),
            ..Default::default()
        };
        assert!(matches!(params.into_code("s"), Err(Error::Callback(_))));
    }

    #[test]
    fn token_set_debug_redacts() {
        let tokens = TokenSet {
            id_token: "id_secret".into(),
            access_token: "at_secret".into(),
            refresh_token: Some("rt_secret".into()),
            expires_in: Some(60),
        };
        let debug = format!("{tokens:?}");
        assert!(!debug.contains("secret"), "got: {debug}");
    }
}

//! OAuth2 login with PKCE over a loopback redirect.
//!
//! The flow: generate a code verifier, open the tenant's authorize URL in a
//! browser, catch the redirect on a fixed localhost port, exchange the code
//! for tokens, and cache them on disk. Tokens are refreshed silently while
//! a refresh token is available and invalidated when the configured domain
//! changes.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::exec;

/// Fixed loopback port; must match the redirect URI registered upstream.
const CALLBACK_PORT: u16 = 18741;
const SCOPES: &str = "openid profile email offline_access";
const LOGIN_TIMEOUT: Duration = Duration::from_secs(300);
/// Treat tokens expiring within this window as already expired.
const EXPIRY_BUFFER_SECS: i64 = 60;
/// Assumed lifetime for manually pasted tokens.
const MANUAL_TOKEN_TTL_SECS: i64 = 86_400;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub domain: Option<String>,
    pub client_id: Option<String>,
    pub audience: Option<String>,
    /// Where the token cache lives, e.g. `~/.armhr/auth_token.json`.
    pub cache_path: PathBuf,
}

impl AuthConfig {
    pub fn is_configured(&self) -> bool {
        self.domain.is_some() && self.client_id.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedToken {
    access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id_token: Option<String>,
    /// Absolute unix expiry.
    expires_at: i64,
    domain: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    id_token: Option<String>,
    expires_in: i64,
}

/// Summary for `auth status`.
#[derive(Debug, Clone)]
pub struct AuthStatus {
    pub configured: bool,
    pub logged_in: bool,
    pub expires_in: Option<i64>,
    pub domain: Option<String>,
}

pub struct AuthService {
    config: AuthConfig,
    client: reqwest::Client,
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Runs the browser login flow and caches the resulting tokens.
    /// Returns a human-readable summary line.
    pub async fn login(&self) -> Result<String> {
        let domain = self.require_domain()?;
        let client_id = self
            .config
            .client_id
            .as_deref()
            .context("auth client id is not configured")?;

        let verifier = generate_verifier();
        let challenge = code_challenge(&verifier);
        let redirect_uri = format!("http://localhost:{CALLBACK_PORT}/callback");
        let url = authorize_url(&domain, client_id, self.config.audience.as_deref(), &challenge, &redirect_uri);

        // Bind before opening the browser so the redirect cannot race us.
        let listener = TcpListener::bind(("127.0.0.1", CALLBACK_PORT))
            .await
            .with_context(|| format!("port {CALLBACK_PORT} is busy; is another login running?"))?;

        open_browser(&url).await;

        let code = tokio::time::timeout(LOGIN_TIMEOUT, wait_for_code(listener))
            .await
            .context("timed out waiting for the browser callback")??;

        let response = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("client_id", client_id),
                ("code", &code),
                ("code_verifier", &verifier),
                ("redirect_uri", &redirect_uri),
            ])
            .await?;
        self.store(response, None)?;
        Ok(format!("logged in to {domain}"))
    }

    /// Stores a manually pasted access token with an assumed TTL.
    pub fn manual_token(&self, token: &str, ttl_secs: Option<i64>) -> Result<String> {
        let domain = self.require_domain()?;
        let ttl = ttl_secs.unwrap_or(MANUAL_TOKEN_TTL_SECS);
        let cached = CachedToken {
            access_token: token.trim().to_string(),
            refresh_token: None,
            id_token: None,
            expires_at: now_unix() + ttl,
            domain: domain.clone(),
        };
        self.write_cache(&cached)?;
        Ok(format!("token stored for {domain} ({ttl}s)"))
    }

    /// Returns a usable access token, refreshing when close to expiry.
    pub async fn get_valid_token(&self) -> Result<Option<String>> {
        let Some(cached) = self.read_cache() else {
            return Ok(None);
        };
        let domain = self.require_domain()?;
        if cached.domain != domain {
            // Domain changed since the cache was written, token is useless.
            let _ = std::fs::remove_file(&self.config.cache_path);
            return Ok(None);
        }
        if !token_expired(cached.expires_at, now_unix()) {
            return Ok(Some(cached.access_token));
        }
        let Some(refresh) = cached.refresh_token.clone() else {
            return Ok(None);
        };
        let token = self.refresh(&refresh).await?;
        Ok(Some(token))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<String> {
        let client_id = self
            .config
            .client_id
            .as_deref()
            .context("auth client id is not configured")?;
        let response = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("client_id", client_id),
                ("refresh_token", refresh_token),
            ])
            .await?;
        let access = response.access_token.clone();
        // Some tenants rotate refresh tokens, some omit them on refresh.
        self.store(response, Some(refresh_token.to_string()))?;
        Ok(access)
    }

    pub fn logout(&self) -> Result<String> {
        if self.config.cache_path.exists() {
            std::fs::remove_file(&self.config.cache_path).context("failed to remove token cache")?;
            Ok("logged out".to_string())
        } else {
            Ok("no cached token".to_string())
        }
    }

    pub fn status(&self) -> AuthStatus {
        let cached = self.read_cache();
        let domain = self.config.domain.clone();
        let logged_in = cached
            .as_ref()
            .map(|c| Some(&c.domain) == domain.as_ref() && !token_expired(c.expires_at, now_unix()))
            .unwrap_or(false);
        AuthStatus {
            configured: self.config.is_configured(),
            logged_in,
            expires_in: cached
                .filter(|_| logged_in)
                .map(|c| (c.expires_at - now_unix()).max(0)),
            domain,
        }
    }

    fn require_domain(&self) -> Result<String> {
        self.config
            .domain
            .clone()
            .context("auth domain is not configured")
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let domain = self.require_domain()?;
        let resp = self
            .client
            .post(format!("https://{domain}/oauth/token"))
            .form(form)
            .send()
            .await
            .context("token endpoint unreachable")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("token exchange failed ({status}): {body}");
        }
        resp.json().await.context("unexpected token response")
    }

    fn store(&self, response: TokenResponse, previous_refresh: Option<String>) -> Result<()> {
        let cached = CachedToken {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh),
            id_token: response.id_token,
            expires_at: now_unix() + response.expires_in,
            domain: self.require_domain()?,
        };
        self.write_cache(&cached)
    }

    fn read_cache(&self) -> Option<CachedToken> {
        let raw = std::fs::read_to_string(&self.config.cache_path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    fn write_cache(&self, cached: &CachedToken) -> Result<()> {
        if let Some(parent) = self.config.cache_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(cached)?;
        std::fs::write(&self.config.cache_path, body).context("failed to write token cache")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(
                &self.config.cache_path,
                std::fs::Permissions::from_mode(0o600),
            )?;
        }
        Ok(())
    }
}

/// 128 chars from the PKCE unreserved set, sourced from OS randomness.
pub fn generate_verifier() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
    let mut bytes = [0u8; 128];
    getrandom::getrandom(&mut bytes).expect("OS randomness unavailable");
    bytes
        .iter()
        .map(|b| CHARSET[(*b as usize) % CHARSET.len()] as char)
        .collect()
}

/// S256 challenge: base64url(sha256(verifier)) without padding.
pub fn code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Tenant connection: the dev tenant uses a dedicated Okta connection.
pub fn connection_name(domain: &str) -> &'static str {
    if domain.contains("dev") {
        "armhr-ops-okta-dev"
    } else {
        "armhr-ops-okta"
    }
}

pub fn authorize_url(
    domain: &str,
    client_id: &str,
    audience: Option<&str>,
    challenge: &str,
    redirect_uri: &str,
) -> String {
    let mut url = format!(
        "https://{domain}/authorize?response_type=code&client_id={}&redirect_uri={}&scope={}&code_challenge={}&code_challenge_method=S256&connection={}",
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(SCOPES),
        urlencoding::encode(challenge),
        connection_name(domain),
    );
    if let Some(audience) = audience {
        url.push_str(&format!("&audience={}", urlencoding::encode(audience)));
    }
    url
}

fn token_expired(expires_at: i64, now: i64) -> bool {
    now >= expires_at - EXPIRY_BUFFER_SECS
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Accepts one connection and extracts `code` from the redirect query.
async fn wait_for_code(listener: TcpListener) -> Result<String> {
    loop {
        let (mut stream, _) = listener.accept().await.context("callback accept failed")?;
        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap_or(0);
        let request = String::from_utf8_lossy(&buf[..n]);
        let Some(request_line) = request.lines().next() else {
            continue;
        };
        // Browsers also ask for /favicon.ico; only the callback counts.
        if !request_line.contains("/callback") {
            let _ = stream.write_all(http_response("Not Found", 404).as_bytes()).await;
            continue;
        }
        let result = parse_callback(request_line);
        let page = match &result {
            Ok(_) => http_response("Login complete. You can close this tab.", 200),
            Err(e) => http_response(&format!("Login failed: {e}"), 200),
        };
        let _ = stream.write_all(page.as_bytes()).await;
        let _ = stream.shutdown().await;
        return result;
    }
}

/// Pulls `code` (or the upstream `error`) out of the request line.
pub fn parse_callback(request_line: &str) -> Result<String> {
    let path = request_line
        .split_whitespace()
        .nth(1)
        .context("malformed callback request")?;
    let query = path.split_once('?').map(|(_, q)| q).unwrap_or("");
    let mut code = None;
    let mut error = None;
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = urlencoding::decode(value)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| value.to_string());
        match key {
            "code" => code = Some(value),
            "error_description" => error = Some(value),
            "error" if error.is_none() => error = Some(value),
            _ => {}
        }
    }
    if let Some(error) = error {
        bail!("{error}");
    }
    code.context("callback carried no authorization code")
}

fn http_response(message: &str, status: u16) -> String {
    let reason = if status == 200 { "OK" } else { "Not Found" };
    let body = format!(
        "<html><body style=\"font-family: sans-serif; padding: 2rem;\"><h2>{message}</h2></body></html>"
    );
    format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

async fn open_browser(url: &str) {
    let opener = if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };
    // Failure is fine, the URL is printed for manual use.
    let _ = exec::run(opener, &[url], None, None).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_matches_rfc7636_vector() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            code_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn verifier_is_long_and_unreserved() {
        let verifier = generate_verifier();
        assert_eq!(verifier.len(), 128);
        assert!(verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-._~".contains(c)));
        assert_ne!(verifier, generate_verifier());
    }

    #[test]
    fn dev_domain_picks_dev_connection() {
        assert_eq!(connection_name("armhr-dev.us.auth0.com"), "armhr-ops-okta-dev");
        assert_eq!(connection_name("armhr.us.auth0.com"), "armhr-ops-okta");
    }

    #[test]
    fn callback_extracts_code() {
        let code = parse_callback("GET /callback?code=abc123&state=x HTTP/1.1").unwrap();
        assert_eq!(code, "abc123");
    }

    #[test]
    fn callback_surfaces_provider_errors() {
        let err = parse_callback(
            "GET /callback?error=access_denied&error_description=User%20cancelled HTTP/1.1",
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "User cancelled");
    }

    #[test]
    fn callback_without_code_is_an_error() {
        assert!(parse_callback("GET /callback HTTP/1.1").is_err());
    }

    #[test]
    fn expiry_buffer_applies() {
        let now = 1_000_000;
        assert!(token_expired(now + 30, now));
        assert!(!token_expired(now + 120, now));
    }

    #[test]
    fn authorize_url_carries_pkce_params() {
        let url = authorize_url(
            "armhr-dev.us.auth0.com",
            "client123",
            Some("https://api.armhr.com"),
            "chal",
            "http://localhost:18741/callback",
        );
        assert!(url.starts_with("https://armhr-dev.us.auth0.com/authorize?"));
        assert!(url.contains("code_challenge=chal"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("connection=armhr-ops-okta-dev"));
        assert!(url.contains("audience=https%3A%2F%2Fapi.armhr.com"));
        assert!(url.contains("scope=openid%20profile%20email%20offline_access"));
    }

    fn service_with_cache(tag: &str) -> AuthService {
        let dir = std::env::temp_dir().join(format!("devdeck-auth-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        AuthService::new(AuthConfig {
            domain: Some("armhr.us.auth0.com".into()),
            client_id: Some("client123".into()),
            audience: None,
            cache_path: dir.join("auth_token.json"),
        })
    }

    #[test]
    fn manual_token_round_trips_through_cache() {
        let service = service_with_cache("manual");
        service.manual_token("  tok-abc  ", None).unwrap();
        let status = service.status();
        assert!(status.configured);
        assert!(status.logged_in);
        let remaining = status.expires_in.unwrap();
        assert!(remaining > MANUAL_TOKEN_TTL_SECS - 10 && remaining <= MANUAL_TOKEN_TTL_SECS);
        service.logout().unwrap();
        assert!(!service.status().logged_in);
    }

    #[tokio::test]
    async fn domain_change_invalidates_cache() {
        let service = service_with_cache("domain");
        service.manual_token("tok", None).unwrap();

        let cache_path = service.config.cache_path.clone();
        let moved = AuthService::new(AuthConfig {
            domain: Some("armhr-dev.us.auth0.com".into()),
            client_id: Some("client123".into()),
            audience: None,
            cache_path: cache_path.clone(),
        });
        assert_eq!(moved.get_valid_token().await.unwrap(), None);
        assert!(!cache_path.exists());
    }
}

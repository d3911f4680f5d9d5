use chrono::{Duration, Local, Utc};
use reqwest::Url;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::thread;
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

use crate::config::GoogleConfig;
use crate::errors::{Result, SyncError};
use crate::models::{RemoteTask, TaskPayload};
use crate::sync::TaskStore;

const OAUTH_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const TASKS_API: &str = "https://tasks.googleapis.com/tasks/v1";
const TASKS_SCOPE: &str = "https://www.googleapis.com/auth/tasks";
const CALLBACK_PATH: &str = "/oauth2callback";
const AUTH_TIMEOUT_MINUTES: i64 = 10;
const REQUEST_TIMEOUT_SECS: u64 = 30;
const PAGE_SIZE: &str = "100";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StoredToken {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskListsResponse {
    items: Option<Vec<RemoteTaskList>>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct RemoteTaskList {
    id: String,
    title: Option<String>,
}

#[derive(Serialize)]
struct TaskListInsertRequest<'a> {
    title: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TasksListResponse {
    items: Option<Vec<RemoteTask>>,
    next_page_token: Option<String>,
}

/// Google Tasks over blocking HTTP. Every call returns only after the
/// response has been read.
pub struct GoogleTasksClient {
    client: Client,
    access_token: String,
}

impl GoogleTasksClient {
    pub fn new(access_token: String) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            access_token,
        })
    }
}

impl TaskStore for GoogleTasksClient {
    fn ensure_list(&mut self, name: &str) -> Result<String> {
        let url = format!("{TASKS_API}/users/@me/lists");
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![("maxResults", PAGE_SIZE.to_string())];
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }
            let resp = self
                .client
                .get(&url)
                .bearer_auth(&self.access_token)
                .query(&query)
                .send()?;
            if !resp.status().is_success() {
                return Err(SyncError::Request(format!(
                    "Task lists fetch failed: HTTP {}",
                    resp.status()
                )));
            }
            let body: TaskListsResponse = resp.json()?;
            if let Some(found) = body
                .items
                .unwrap_or_default()
                .into_iter()
                .find(|list| list.title.as_deref() == Some(name))
            {
                return Ok(found.id);
            }
            match body.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        info!(name, "creating task list");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&TaskListInsertRequest { title: name })
            .send()?;
        if !resp.status().is_success() {
            return Err(SyncError::Request(format!(
                "Task list create failed: HTTP {}",
                resp.status()
            )));
        }
        let created: RemoteTaskList = resp.json()?;
        Ok(created.id)
    }

    fn list_active(&mut self, list_id: &str) -> Result<Vec<RemoteTask>> {
        let url = format!("{TASKS_API}/lists/{list_id}/tasks");
        let mut all = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![
                ("maxResults", PAGE_SIZE.to_string()),
                ("showCompleted", "false".to_string()),
                ("showHidden", "false".to_string()),
                ("showDeleted", "false".to_string()),
            ];
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }
            let resp = self
                .client
                .get(&url)
                .bearer_auth(&self.access_token)
                .query(&query)
                .send()?;
            if !resp.status().is_success() {
                return Err(SyncError::Request(format!(
                    "Tasks list failed: HTTP {}",
                    resp.status()
                )));
            }
            let body: TasksListResponse = resp.json()?;
            all.extend(body.items.unwrap_or_default());
            match body.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        debug!(count = all.len(), "listed active tasks");
        Ok(all)
    }

    fn create_task(&mut self, list_id: &str, payload: &TaskPayload) -> Result<RemoteTask> {
        let url = format!("{TASKS_API}/lists/{list_id}/tasks");
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(payload)
            .send()?;
        if !resp.status().is_success() {
            return Err(SyncError::Request(format!(
                "Task create failed: HTTP {}",
                resp.status()
            )));
        }
        Ok(resp.json()?)
    }

    fn update_task(
        &mut self,
        list_id: &str,
        task_id: &str,
        payload: &TaskPayload,
    ) -> Result<RemoteTask> {
        let url = format!("{TASKS_API}/lists/{list_id}/tasks/{task_id}");
        let resp = self
            .client
            .patch(url)
            .bearer_auth(&self.access_token)
            .json(payload)
            .send()?;
        if !resp.status().is_success() {
            return Err(SyncError::Request(format!(
                "Task update failed: HTTP {}",
                resp.status()
            )));
        }
        Ok(resp.json()?)
    }
}

/// Returns a usable access token, reusing the stored one while it is still
/// valid for the same refresh token and refreshing it otherwise.
pub fn ensure_access_token(
    config: &GoogleConfig,
    refresh_token: &str,
    token_path: &Path,
) -> Result<String> {
    if let Ok(stored) = load_token(token_path) {
        if stored.refresh_token == refresh_token && stored.expires_at > Utc::now().timestamp() + 60 {
            return Ok(stored.access_token);
        }
    }

    let updated = refresh_access_token(config, refresh_token)?;
    if let Err(err) = save_token(token_path, &updated) {
        warn!(path = %token_path.display(), error = %err, "could not cache Google token");
    }
    Ok(updated.access_token)
}

fn refresh_access_token(config: &GoogleConfig, refresh_token: &str) -> Result<StoredToken> {
    let resp = http_client()?
        .post(OAUTH_TOKEN_URL)
        .form(&[
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .send()?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        return Err(SyncError::Auth(format!(
            "token refresh failed: {}",
            format_oauth_error(status, &body)
        )));
    }

    let token: TokenResponse = resp.json()?;
    Ok(StoredToken {
        access_token: token.access_token,
        refresh_token: token
            .refresh_token
            .unwrap_or_else(|| refresh_token.to_string()),
        expires_at: (Utc::now() + Duration::seconds(token.expires_in as i64)).timestamp(),
    })
}

pub fn load_token(path: &Path) -> Result<StoredToken> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn save_token(path: &Path, token: &StoredToken) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(token)?;
    fs::write(path, content)?;
    Ok(())
}

/// A pending consent flow: the browser is sent to `auth_url` and Google
/// redirects back to the listener.
#[derive(Debug)]
pub struct AuthSession {
    pub auth_url: String,
    pub redirect_uri: String,
    listener: TcpListener,
    state: String,
}

pub fn start_local_oauth_flow(config: &GoogleConfig) -> Result<AuthSession> {
    let listener = TcpListener::bind(("127.0.0.1", config.redirect_port))
        .map_err(|e| SyncError::Auth(format!("cannot listen on port {}: {e}", config.redirect_port)))?;
    let redirect_uri = format!("http://localhost:{}{CALLBACK_PATH}", config.redirect_port);
    let state = generate_state();

    let auth_url = Url::parse_with_params(
        OAUTH_AUTH_URL,
        [
            ("client_id", config.client_id.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", TASKS_SCOPE),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("state", state.as_str()),
        ],
    )
    .map_err(|e| SyncError::Auth(e.to_string()))?
    .to_string();

    Ok(AuthSession {
        auth_url,
        redirect_uri,
        listener,
        state,
    })
}

/// Opens the consent page without failing when no browser is available;
/// the caller prints the URL either way.
pub fn try_open_in_browser(url: &str) {
    if let Err(e) = open::that(url) {
        warn!(error = %e, "could not open a browser; copy the URL instead");
    }
}

impl AuthSession {
    /// Blocks until Google redirects back with a code (or an error), then
    /// exchanges the code and stores the resulting token.
    pub fn wait_for_token(self, config: &GoogleConfig, token_path: &Path) -> Result<StoredToken> {
        let expires_at = Local::now() + Duration::minutes(AUTH_TIMEOUT_MINUTES);
        self.listener.set_nonblocking(true)?;
        let client = http_client()?;

        loop {
            if Local::now() >= expires_at {
                return Err(SyncError::Auth("Google auth expired. Please retry.".to_string()));
            }
            match self.listener.accept() {
                Ok((mut stream, _addr)) => {
                    stream.set_nonblocking(false)?;
                    match self.handle_redirect(&client, config, &mut stream)? {
                        Some(token) => {
                            save_token(token_path, &token)?;
                            return Ok(token);
                        }
                        None => continue,
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(StdDuration::from_millis(200));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// `Ok(None)` means the request was not the OAuth callback (a favicon
    /// probe, say) and the listener should keep waiting.
    fn handle_redirect(
        &self,
        client: &Client,
        config: &GoogleConfig,
        stream: &mut TcpStream,
    ) -> Result<Option<StoredToken>> {
        stream.set_read_timeout(Some(StdDuration::from_secs(2)))?;
        let mut request_line = String::new();
        BufReader::new(&*stream).read_line(&mut request_line)?;
        let target = request_line.split_whitespace().nth(1).unwrap_or("/");

        let Some(params) = parse_callback(target) else {
            let _ = respond(stream, "404 Not Found", "Not Found");
            return Ok(None);
        };

        if let Some(error) = params.error {
            let desc = params
                .error_description
                .map(|s| format!(" ({s})"))
                .unwrap_or_default();
            let _ = respond(stream, "400 Bad Request", &format!("Authorization failed: {error}{desc}"));
            return Err(SyncError::Auth(format!("{error}{desc}")));
        }

        let Some(code) = params.code else {
            let _ = respond(stream, "400 Bad Request", "Missing 'code' param in callback");
            return Err(SyncError::Auth("Missing code param".to_string()));
        };

        if params.state.as_deref() != Some(self.state.as_str()) {
            let _ = respond(stream, "400 Bad Request", "Invalid state.");
            return Err(SyncError::Auth("Invalid OAuth state. Please retry.".to_string()));
        }

        let resp = client
            .post(OAUTH_TOKEN_URL)
            .form(&[
                ("client_id", config.client_id.as_str()),
                ("client_secret", config.client_secret.as_str()),
                ("code", code.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            let detail = format_oauth_error(status, &body);
            let _ = respond(stream, "500 Internal Server Error", "Error during OAuth flow.");
            return Err(SyncError::Auth(detail));
        }

        let token: TokenResponse = resp.json()?;
        let Some(refresh_token) = token.refresh_token else {
            let _ = respond(
                stream,
                "500 Internal Server Error",
                "No refresh token received. Try removing prior consent and retry.",
            );
            return Err(SyncError::Auth("No refresh token returned by Google".to_string()));
        };

        let _ = respond(stream, "200 OK", "Authentication successful! You can close this tab.");
        Ok(Some(StoredToken {
            access_token: token.access_token,
            refresh_token,
            expires_at: (Utc::now() + Duration::seconds(token.expires_in as i64)).timestamp(),
        }))
    }
}

#[derive(Debug, Default, PartialEq)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Reads the query of a request target aimed at the callback path. Any
/// other path yields `None`.
fn parse_callback(target: &str) -> Option<CallbackParams> {
    let url = Url::parse(&format!("http://localhost{target}")).ok()?;
    if !url.path().starts_with(CALLBACK_PATH) {
        return None;
    }
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

fn respond(stream: &mut TcpStream, status: &str, message: &str) -> io::Result<()> {
    let body = format!("{message}\n");
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes())
}

fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(StdDuration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| SyncError::Request(format!("Failed to create HTTP client: {e}")))
}

fn generate_state() -> String {
    use rand::{Rng, distributions::Alphanumeric};
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

fn format_oauth_error(status: reqwest::StatusCode, body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return format!("HTTP {}", status);
    }

    let summary = if let Ok(err) = serde_json::from_str::<TokenErrorResponse>(trimmed) {
        if let Some(desc) = err.error_description {
            format!("{} ({})", desc, err.error)
        } else {
            err.error
        }
    } else {
        truncate_error(trimmed)
    };
    format!("HTTP {}: {}", status, summary)
}

fn truncate_error(message: &str) -> String {
    let mut out = message.replace(['\n', '\r'], " ");
    if out.len() > 240 {
        let mut cut = 240;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::temp_dir;
    use reqwest::StatusCode;

    #[test]
    fn parses_callback_query() {
        let params = parse_callback("/oauth2callback?code=4%2F0Ab&state=xyz&scope=tasks").unwrap();
        assert_eq!(params.code.as_deref(), Some("4/0Ab"));
        assert_eq!(params.state.as_deref(), Some("xyz"));
        assert_eq!(params.error, None);
    }

    #[test]
    fn callback_error_is_decoded() {
        let params =
            parse_callback("/oauth2callback?error=access_denied&error_description=User+said+no").unwrap();
        assert_eq!(params.error.as_deref(), Some("access_denied"));
        assert_eq!(params.error_description.as_deref(), Some("User said no"));
    }

    #[test]
    fn other_paths_are_not_callbacks() {
        assert_eq!(parse_callback("/favicon.ico"), None);
        assert_eq!(parse_callback("/"), None);
    }

    #[test]
    fn oauth_error_prefers_description() {
        let body = r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#;
        assert_eq!(
            format_oauth_error(StatusCode::BAD_REQUEST, body),
            "HTTP 400 Bad Request: Token has been expired or revoked. (invalid_grant)"
        );
        assert_eq!(
            format_oauth_error(StatusCode::UNAUTHORIZED, "  "),
            "HTTP 401 Unauthorized"
        );
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = "x".repeat(500);
        let summary = truncate_error(&body);
        assert_eq!(summary.len(), 243);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn state_is_random_alphanumeric() {
        let a = generate_state();
        let b = generate_state();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn auth_url_requests_offline_tasks_scope() {
        let config = GoogleConfig {
            client_id: "client-123".to_string(),
            redirect_port: 0,
            ..GoogleConfig::default()
        };
        let session = start_local_oauth_flow(&config).unwrap();
        let url = Url::parse(&session.auth_url).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(get("client_id").as_deref(), Some("client-123"));
        assert_eq!(get("scope").as_deref(), Some(TASKS_SCOPE));
        assert_eq!(get("access_type").as_deref(), Some("offline"));
        assert_eq!(get("prompt").as_deref(), Some("consent"));
        assert_eq!(get("state").as_deref(), Some(session.state.as_str()));
        assert!(session.redirect_uri.ends_with("/oauth2callback"));
    }

    #[test]
    fn stored_token_round_trips_through_disk() {
        let path = temp_dir("google").join("nested").join("google_token.json");
        let token = StoredToken {
            access_token: "ya29.a".to_string(),
            refresh_token: "1//r".to_string(),
            expires_at: 1_700_000_000,
        };
        save_token(&path, &token).unwrap();
        assert_eq!(load_token(&path).unwrap(), token);
    }

    #[test]
    fn unexpired_stored_token_skips_refresh() {
        let path = temp_dir("google").join("google_token.json");
        let token = StoredToken {
            access_token: "cached".to_string(),
            refresh_token: "1//r".to_string(),
            expires_at: Utc::now().timestamp() + 3600,
        };
        save_token(&path, &token).unwrap();
        let access = ensure_access_token(&GoogleConfig::default(), "1//r", &path).unwrap();
        assert_eq!(access, "cached");
    }
}

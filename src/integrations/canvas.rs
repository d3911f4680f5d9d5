use reqwest::blocking::Client;
use reqwest::header::LINK;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::CanvasConfig;
use crate::errors::{Result, SyncError};
use crate::models::CanvasTodo;
use crate::sync::TodoSource;

const REQUEST_TIMEOUT_SECS: u64 = 30;

pub struct CanvasClient {
    client: Client,
    base_url: String,
    token: String,
    max_pages: usize,
}

impl CanvasClient {
    pub fn new(config: &CanvasConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| SyncError::Request(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            token: config.token.trim().to_string(),
            max_pages: config.max_pages.max(1),
        })
    }

    fn todo_url(&self) -> String {
        format!("{}/api/v1/users/self/todo", self.base_url)
    }
}

impl TodoSource for CanvasClient {
    fn fetch_todos(&mut self) -> Result<Vec<CanvasTodo>> {
        let mut items = Vec::new();
        let mut next = Some(self.todo_url());
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            pages += 1;
            let resp = self.client.get(&url).bearer_auth(&self.token).send()?;
            if !resp.status().is_success() {
                return Err(SyncError::RemoteFetch {
                    status: resp.status().as_u16(),
                });
            }

            next = resp
                .headers()
                .get(LINK)
                .and_then(|value| value.to_str().ok())
                .and_then(next_page_url);
            let page: Vec<CanvasTodo> = resp.json()?;
            debug!(page = pages, count = page.len(), "fetched Canvas to-do page");
            items.extend(page);

            if pages >= self.max_pages && next.is_some() {
                warn!(
                    pages,
                    fetched = items.len(),
                    "Canvas to-do feed has more pages than the page cap; the rest is left out of this run"
                );
                break;
            }
        }

        Ok(items)
    }
}

/// Picks the `rel="next"` target out of a Canvas `Link` header.
pub(crate) fn next_page_url(link: &str) -> Option<String> {
    link.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|param| {
            let param = param.trim();
            param == "rel=\"next\"" || param == "rel=next"
        });
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serves `count` requests on a loopback port. `respond` gets the base
    /// URL and the 0-based request number; the handle yields each request's
    /// head (request line plus headers).
    fn serve<F>(count: usize, respond: F) -> (String, thread::JoinHandle<Vec<String>>)
    where
        F: Fn(&str, usize) -> String + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let server_base = base.clone();
        let handle = thread::spawn(move || {
            let mut heads = Vec::new();
            for n in 0..count {
                let (mut stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut head = String::new();
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                        break;
                    }
                    head.push_str(&line);
                }
                heads.push(head);
                stream.write_all(respond(&server_base, n).as_bytes()).unwrap();
            }
            heads
        });
        (base, handle)
    }

    fn response(status: &str, extra_headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n{extra_headers}\r\n{body}",
            body.len()
        )
    }

    fn client(base: &str, max_pages: usize) -> CanvasClient {
        CanvasClient::new(&CanvasConfig {
            base_url: base.to_string(),
            token: "tok".to_string(),
            max_pages,
        })
        .unwrap()
    }

    #[test]
    fn non_success_status_is_a_fetch_error() {
        let (base, server) = serve(1, |_, _| response("401 Unauthorized", "", "{}"));
        let err = client(&base, 50).fetch_todos().unwrap_err();
        assert!(matches!(err, SyncError::RemoteFetch { status: 401 }));

        let heads = server.join().unwrap();
        assert!(heads[0].starts_with("GET /api/v1/users/self/todo "));
        assert!(heads[0].to_ascii_lowercase().contains("authorization: bearer tok"));
    }

    #[test]
    fn follows_next_links_across_pages() {
        let (base, server) = serve(2, |base, n| {
            if n == 0 {
                let link = format!("Link: <{base}/api/v1/users/self/todo?page=2>; rel=\"next\"\r\n");
                response("200 OK", &link, r#"[{"title":"One"}]"#)
            } else {
                response("200 OK", "", r#"[{"title":"Two"}]"#)
            }
        });
        let todos = client(&base, 50).fetch_todos().unwrap();
        let titles: Vec<_> = todos.iter().filter_map(|t| t.title.as_deref()).collect();
        assert_eq!(titles, vec!["One", "Two"]);

        let heads = server.join().unwrap();
        assert!(heads[1].starts_with("GET /api/v1/users/self/todo?page=2 "));
    }

    #[test]
    fn page_cap_stops_an_endless_feed() {
        let (base, server) = serve(2, |base, n| {
            let link = format!("Link: <{base}/api/v1/users/self/todo?page={}>; rel=\"next\"\r\n", n + 2);
            response("200 OK", &link, r#"[{"title":"Again"}]"#)
        });
        let todos = client(&base, 2).fetch_todos().unwrap();
        assert_eq!(todos.len(), 2);
        assert_eq!(server.join().unwrap().len(), 2);
    }

    #[test]
    fn finds_next_link_among_others() {
        let header = "<https://canvas.test/api/v1/users/self/todo?page=1&per_page=10>; rel=\"current\",\
                      <https://canvas.test/api/v1/users/self/todo?page=2&per_page=10>; rel=\"next\",\
                      <https://canvas.test/api/v1/users/self/todo?page=1&per_page=10>; rel=\"first\"";
        assert_eq!(
            next_page_url(header).as_deref(),
            Some("https://canvas.test/api/v1/users/self/todo?page=2&per_page=10")
        );
    }

    #[test]
    fn last_page_has_no_next_link() {
        let header = "<https://canvas.test/todo?page=3>; rel=\"current\", <https://canvas.test/todo?page=1>; rel=\"first\"";
        assert_eq!(next_page_url(header), None);
        assert_eq!(next_page_url(""), None);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = CanvasClient::new(&CanvasConfig {
            base_url: "https://uk.instructure.com/".to_string(),
            token: "tok".to_string(),
            ..CanvasConfig::default()
        })
        .unwrap();
        assert_eq!(
            client.todo_url(),
            "https://uk.instructure.com/api/v1/users/self/todo"
        );
    }
}

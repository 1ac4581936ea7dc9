use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::Value;

pub struct HTTPClient {
    pub base_url: String,
    pub user_id: String,
    client: Client,
}

impl HTTPClient {
    pub fn new(base_url: &str, user_id: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            user_id: user_id.to_string(),
            client: Client::builder()
                .timeout(Duration::from_secs(600))
                .build()
                .expect("reqwest client"),
        }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(value) = HeaderValue::from_str(&self.user_id) {
            headers.insert("x-user-id", value);
        }
        headers
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Posts `body` and hands each decoded piece of the streamed reply to
    /// `on_text` as it arrives. Returns the whole reply.
    pub fn stream<F>(&self, path: &str, body: &Value, mut on_text: F) -> Result<String, String>
    where
        F: FnMut(&str),
    {
        let mut resp = self
            .client
            .post(self.url(path))
            .headers(self.headers())
            .json(body)
            .send()
            .map_err(|err| err.to_string())?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            return Err(format!("http {}: {}", status.as_u16(), body));
        }

        let mut decoder = Utf8Chunks::default();
        let mut full = String::new();
        let mut buf = [0u8; 1024];
        loop {
            let read = resp.read(&mut buf).map_err(|err| err.to_string())?;
            if read == 0 {
                break;
            }
            let text = decoder.push(&buf[..read]);
            if !text.is_empty() {
                on_text(&text);
                full.push_str(&text);
            }
        }
        Ok(full)
    }

    pub fn user(&self) -> Result<Value, String> {
        let resp = self
            .client
            .get(self.url("/api/user"))
            .headers(self.headers())
            .send()
            .map_err(|err| err.to_string())?;
        if resp.status().is_success() {
            resp.json::<Value>().map_err(|err| err.to_string())
        } else {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            Err(format!("http {}: {}", status.as_u16(), body))
        }
    }
}

/// Turns arbitrary byte reads into valid UTF-8, holding back a character
/// split across reads.
#[derive(Default)]
pub struct Utf8Chunks {
    pending: Vec<u8>,
}

impl Utf8Chunks {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let checked = std::str::from_utf8(&self.pending).map(str::len);
        let valid = match checked {
            Ok(len) => len,
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            // Not a split character; replace the bad bytes and move on.
            Err(_) => {
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                return text;
            }
        };
        let rest = self.pending.split_off(valid);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = rest;
        text
    }
}

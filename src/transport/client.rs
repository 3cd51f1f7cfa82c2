//! The HTTP transport adapter: a narrow `Transport` trait the core engine
//! depends on, plus a `reqwest::blocking` implementation performing the discovery GET and the
//! fetch POST a session needs.
//!
//! Grounded on `get_pack_data` (status/content-type validation, `Client` reuse).

use std::collections::HashMap;

use crate::error::Error;

/// One outgoing HTTP request as the core needs to describe it: a method-agnostic POST/GET pair
/// is all a session ever issues, so this stays deliberately narrow rather than wrapping all of HTTP.
pub struct HttpRequest {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The boundary the engine depends on instead of a concrete HTTP client, so tests can inject a
/// canned response and the core pack/delta/worktree machinery never needs a live network.
pub trait Transport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, Error>;
}

/// The production transport: a blocking `reqwest` client reused across requests.
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, Error> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let resp = builder.send().map_err(|source| Error::Network {
            url: request.url.clone(),
            source,
        })?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|value| (k.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = resp
            .bytes()
            .map_err(|source| Error::Network {
                url: request.url,
                source,
            })?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

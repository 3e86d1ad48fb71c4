#![allow(dead_code)]

use async_trait::async_trait;
use futures::TryStreamExt;
use http_rmi_client::{
    connection::{ConnectionProvider, Request, Response},
    error::Result,
};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Method, StatusCode,
};
use std::{collections::VecDeque, io::Cursor, sync::Mutex};
use url::Url;

/// Request as seen by the mock provider, body fully collected.
#[derive(Clone, Debug)]
pub struct Recorded {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8(self.body.clone().unwrap_or_default()).unwrap()
    }
}

/// Canned response replayed by the mock provider.
#[derive(Clone, Debug)]
pub struct Canned {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl Canned {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn json(status: u16, body: &str) -> Self {
        Self::new(status).header("content-type", "application/json").body(body)
    }

    pub fn header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.push((name, value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// Connection provider recording every request and answering from a queue.
/// An exhausted queue answers `200` with an empty JSON body.
#[derive(Default)]
pub struct MockProvider {
    responses: Mutex<VecDeque<Canned>>,
    requests: Mutex<Vec<Recorded>>,
}

impl MockProvider {
    pub fn new(responses: impl IntoIterator<Item = Canned>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last(&self) -> Recorded {
        self.requests.lock().unwrap().last().cloned().expect("no request recorded")
    }
}

#[async_trait]
impl ConnectionProvider for MockProvider {
    async fn open(&self, request: Request) -> Result<Response> {
        let body = match request.body {
            Some(body) => Some(
                body.try_fold(Vec::new(), |mut acc, chunk| async move {
                    acc.extend_from_slice(&chunk);
                    Ok(acc)
                })
                .await?,
            ),
            None => None,
        };
        self.requests.lock().unwrap().push(Recorded {
            method: request.method,
            url: request.url,
            headers: request.headers,
            body,
        });

        let canned = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Canned::new(200));
        let mut headers = HeaderMap::new();
        for (name, value) in &canned.headers {
            headers.append(
                HeaderName::from_static(*name),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        Ok(Response {
            status: StatusCode::from_u16(canned.status).unwrap(),
            headers,
            body: Box::new(Cursor::new(canned.body)),
        })
    }
}

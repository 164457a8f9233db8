//! Test doubles for the transport layer.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::Url;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};
use tokio_util::sync::CancellationToken;

use crate::{
    common::errors::NetError,
    net::{
        http::{HeaderMap, Method, headers::parse_header_line},
        web_reader::{WebReader, WebRequest, WebResponse},
    },
};

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: HeaderMap,
}

type Responder = dyn Fn(&RecordedRequest) -> String + Send + Sync;

/// Loopback HTTP server answering each request with raw response text.
pub struct TestServer {
    base: Url,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl TestServer {
    pub async fn spawn<F>(respond: F) -> Self
    where
        F: Fn(&RecordedRequest) -> String + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let respond: Arc<Responder> = Arc::new(respond);

        let log = requests.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let log = log.clone();
                let respond = respond.clone();
                tokio::spawn(async move {
                    loop {
                        let mut head = Vec::new();
                        let mut byte = [0u8; 1];
                        while !head.ends_with(b"\r\n\r\n") {
                            if socket.read(&mut byte).await.unwrap_or(0) == 0 {
                                return;
                            }
                            head.push(byte[0]);
                        }

                        let text = String::from_utf8_lossy(&head).to_string();
                        let mut lines = text.split("\r\n");
                        let mut request_line = lines.next().unwrap_or("").split(' ');
                        let request = RecordedRequest {
                            method: request_line.next().unwrap_or("").to_string(),
                            target: request_line.next().unwrap_or("/").to_string(),
                            headers: lines.filter_map(parse_header_line).collect(),
                        };
                        log.lock().push(request.clone());

                        if socket.write_all(respond(&request).as_bytes()).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        Self {
            base: Url::parse(&format!("http://{}/", addr)).unwrap(),
            requests,
        }
    }

    pub fn url(&self, path: &str) -> Url {
        self.base.join(path).unwrap()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn hits(&self) -> usize {
        self.requests.lock().len()
    }
}

/// Canned reply produced by a [`ScriptedReader`] handler.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Reply {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

type Handler = dyn Fn(&WebRequest) -> Result<Reply, NetError> + Send + Sync;

/// In-memory [`WebReader`] driven by a closure; records every request.
pub struct ScriptedReader {
    handler: Box<Handler>,
    requests: Mutex<Vec<WebRequest>>,
}

impl ScriptedReader {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&WebRequest) -> Result<Reply, NetError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<WebRequest> {
        self.requests.lock().clone()
    }

    pub fn count(&self, method: Method) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method)
            .count()
    }
}

#[async_trait]
impl WebReader for ScriptedReader {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn send(
        &self,
        request: WebRequest,
        cancel: &CancellationToken,
    ) -> Result<WebResponse, NetError> {
        if cancel.is_cancelled() {
            return Err(NetError::Cancelled);
        }
        self.requests.lock().push(request.clone());
        let reply = (self.handler)(&request)?;
        let headers: HeaderMap = reply.headers.into_iter().collect();
        let body = if request.method == Method::Head {
            Bytes::new()
        } else {
            reply.body
        };
        Ok(WebResponse::from_bytes(reply.status, headers, request.url, body))
    }
}

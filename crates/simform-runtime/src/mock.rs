#![forbid(unsafe_code)]

//! Scripted in-memory [`Transport`] for tests and offline demos.
//!
//! Replies are queued per `(method, path)`. Each request pops the next reply;
//! the last reply of a queue is sticky and answers every later request.
//! Unscripted routes answer `404`.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use serde_json::Value;

use crate::api::{ApiError, Method, Request, Response, Transport};

/// One scripted reply.
#[derive(Debug, Clone)]
pub struct Reply {
    outcome: Result<Response, ApiError>,
    delay: Duration,
}

impl Reply {
    /// A `200` JSON reply.
    #[must_use]
    pub fn json(value: Value) -> Self {
        Self {
            outcome: Ok(Response::json(&value)),
            delay: Duration::ZERO,
        }
    }

    /// A reply with a raw status and body.
    #[must_use]
    pub fn raw(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            outcome: Ok(Response {
                status,
                body: body.into(),
            }),
            delay: Duration::ZERO,
        }
    }

    /// A transport failure.
    #[must_use]
    pub fn fail(path: &str, message: &str) -> Self {
        Self {
            outcome: Err(ApiError::Transport {
                path: path.to_string(),
                message: message.to_string(),
            }),
            delay: Duration::ZERO,
        }
    }

    /// Hold the reply back for `delay` before answering.
    #[must_use]
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Default)]
struct Script {
    routes: HashMap<(Method, String), Vec<Reply>>,
    requests: Vec<Request>,
}

/// Scripted transport.
#[derive(Debug, Default)]
pub struct MockTransport {
    script: Mutex<Script>,
}

impl MockTransport {
    /// An empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue replies for a route.
    pub fn on(&self, method: Method, path: &str, replies: impl IntoIterator<Item = Reply>) {
        self.script()
            .routes
            .entry((method, path.to_string()))
            .or_default()
            .extend(replies);
    }

    /// Queue replies for a `GET` route.
    pub fn on_get(&self, path: &str, replies: impl IntoIterator<Item = Reply>) {
        self.on(Method::Get, path, replies);
    }

    /// Queue replies for a `POST` route.
    pub fn on_post(&self, path: &str, replies: impl IntoIterator<Item = Reply>) {
        self.on(Method::Post, path, replies);
    }

    /// Every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<Request> {
        self.script().requests.clone()
    }

    /// Number of requests received for a path.
    #[must_use]
    pub fn count(&self, path: &str) -> usize {
        self.script()
            .requests
            .iter()
            .filter(|r| r.path == path)
            .count()
    }
}

impl Transport for MockTransport {
    fn send(&self, request: &Request) -> Result<Response, ApiError> {
        let reply = {
            let mut script = self.script();
            script.requests.push(request.clone());
            let key = (request.method, request.path.clone());
            match script.routes.get_mut(&key) {
                Some(queue) if queue.len() > 1 => Some(queue.remove(0)),
                Some(queue) => queue.first().cloned(),
                None => None,
            }
        };
        let Some(reply) = reply else {
            return Ok(Response {
                status: 404,
                body: Vec::new(),
            });
        };
        if !reply.delay.is_zero() {
            thread::sleep(reply.delay);
        }
        reply.outcome
    }
}

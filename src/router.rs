//! Exact-match route table.
//!
//! Routes are keyed by `(method, path)`. Dispatch tries the exact method
//! first, then [`Method::Any`] for the same path, then the not-found handler.
//! Paths compare by plain string equality: no prefixes, no trailing-slash
//! folding. Registering the same key twice replaces the earlier handler.

use std::collections::HashMap;

use tracing::debug;

use crate::http::{Method, ParseError, Request, Response};

/// A route handler. Runs to completion inside one scheduler tick.
pub type Handler = Box<dyn Fn(&Request<'_>, &mut Response<'_>)>;

/// Route table plus the fallback for unmatched requests.
pub struct Router {
    routes: HashMap<String, HashMap<Method, Handler>>,
    not_found: Handler,
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            not_found: Box::new(default_not_found),
        }
    }

    /// Register `handler` for `(method, path)`, replacing any previous one.
    pub fn register<F>(&mut self, method: Method, path: impl Into<String>, handler: F)
    where
        F: Fn(&Request<'_>, &mut Response<'_>) + 'static,
    {
        let path = path.into();
        let previous = self
            .routes
            .entry(path.clone())
            .or_default()
            .insert(method, Box::new(handler));
        if previous.is_some() {
            debug!(%method, path = %path, "Router: replaced existing handler");
        }
    }

    /// Replace the handler used when no route matches.
    pub fn set_not_found<F>(&mut self, handler: F)
    where
        F: Fn(&Request<'_>, &mut Response<'_>) + 'static,
    {
        self.not_found = Box::new(handler);
    }

    /// Find the handler for a parsed request.
    pub fn lookup(&self, method: Method, path: &str) -> Option<&Handler> {
        let by_method = self.routes.get(path)?;
        by_method.get(&method).or_else(|| by_method.get(&Method::Any))
    }

    /// Run the matching handler, or the not-found handler.
    pub fn dispatch(&self, request: &Request<'_>, response: &mut Response<'_>) {
        match self.lookup(request.method(), request.path()) {
            Some(handler) => handler(request, response),
            None => {
                debug!(method = %request.method(), path = request.path(), "Router: no route");
                (self.not_found)(request, response);
            }
        }
    }

    /// Fill `response` for a parse outcome: 400 for an unparseable request,
    /// otherwise whatever the route produces.
    pub fn respond(&self, parsed: &Result<Request<'_>, ParseError>, response: &mut Response<'_>) {
        match parsed {
            Ok(request) => self.dispatch(request, response),
            Err(e) => {
                debug!("Router: rejecting unparseable request: {e}");
                write_bad_request(response);
            }
        }
    }

    /// Number of registered `(method, path)` pairs.
    pub fn len(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

fn default_not_found(_request: &Request<'_>, response: &mut Response<'_>) {
    response.write_status(404, "Not found");
    response.write_header("content-type", "text/plain");
    response.write_body("The requested page does not exist");
}

fn write_bad_request(response: &mut Response<'_>) {
    response.write_status(400, "Invalid request");
    response.write_header("content-type", "text/plain");
    response.write_body("Could not parse request");
}

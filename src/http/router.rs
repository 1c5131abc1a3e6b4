use std::collections::HashMap;
use std::rc::Rc;

use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};

/// A request handler.
///
/// `C` is the per-connection context the connection hands in on every call.
/// Handlers run inline with the read event and must not block.
pub type Handler<C> = Rc<dyn Fn(&mut C, &Request, &mut Response)>;

/// Exact-match route table for one connection.
pub struct Router<C> {
    routes: HashMap<(Method, String), Handler<C>>,
    default: Handler<C>,
}

impl<C: 'static> Default for Router<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: 'static> Router<C> {
    /// Creates an empty table whose default handler answers 404.
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            default: Rc::new(not_found::<C>),
        }
    }

    /// Registers `handler` for `path` under every method in `methods`,
    /// replacing any earlier handler for the same pair.
    pub fn register<F>(&mut self, methods: &[Method], path: &str, handler: F) -> &mut Self
    where
        F: Fn(&mut C, &Request, &mut Response) + 'static,
    {
        let handler: Handler<C> = Rc::new(handler);
        for method in methods {
            self.routes.insert((method.clone(), path.to_string()), Rc::clone(&handler));
        }
        self
    }

    /// Replaces the handler used when no route matches.
    pub fn set_default<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&mut C, &Request, &mut Response) + 'static,
    {
        self.default = Rc::new(handler);
        self
    }

    pub fn lookup(&self, method: &Method, path: &str) -> Option<&Handler<C>> {
        self.routes.get(&(method.clone(), path.to_string()))
    }

    /// Calls the handler registered for the request's method and path, or
    /// the default handler. Returns whether a registered route matched.
    pub fn dispatch(&self, ctx: &mut C, request: &Request, response: &mut Response) -> bool {
        match self.lookup(&request.method, &request.path) {
            Some(handler) => {
                handler(ctx, request, response);
                true
            }
            None => {
                tracing::debug!(method = %request.method, path = %request.path, "no route");
                (self.default)(ctx, request, response);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Built-in default handler.
pub fn not_found<C>(_ctx: &mut C, _request: &Request, response: &mut Response) {
    response.set_status(StatusCode::NotFound);
    response.queue("<h1>404 Not Found</h1>");
}

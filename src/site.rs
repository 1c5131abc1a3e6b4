//! The reference site: a counter page, a greeting form, and 404s.

use std::net::SocketAddr;

use crate::http::form::urldecode;
use crate::http::request::{Method, Request};
use crate::http::response::Response;
use crate::http::router::Router;

/// Per-connection state shared by the site's handlers.
#[derive(Debug, Default)]
pub struct SiteState {
    /// Requests this connection has handled.
    pub requests: u64,
}

/// Route table and fresh state for a newly accepted connection.
pub fn routes(_peer: SocketAddr) -> (Router<SiteState>, SiteState) {
    let mut router = Router::new();
    router
        .register(&[Method::GET], "/", index)
        .register(&[Method::POST], "/myname", my_name);
    (router, SiteState::default())
}

pub fn index(state: &mut SiteState, request: &Request, response: &mut Response) {
    state.requests += 1;

    response.queue("<html><head><title>switchboard</title></head><body>");
    response.queue("<h1>My First Webserver</h1>");
    response.queue(format!(
        "<p>Resource requested: {}</p>",
        escape_html(&request.path)
    ));
    response.queue(format!("<p>Request count: {}</p>", state.requests));
    response.queue(
        "<form method=\"post\" action=\"/myname\">\
         <input name=\"name\" placeholder=\"Your name\">\
         <button type=\"submit\">Say hello</button>\
         </form>",
    );
    response.queue("</body></html>");
}

pub fn my_name(state: &mut SiteState, request: &Request, response: &mut Response) {
    state.requests += 1;

    let fields = urldecode(request.body_bytes());
    let name = fields
        .get("name")
        .and_then(|v| v.as_deref())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or("stranger");

    response.queue(format!("<h1>Hello there, {}!</h1>", escape_html(name)));
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

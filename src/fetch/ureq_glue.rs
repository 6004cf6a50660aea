use crate::prelude::*;

use std::io::Read;
use std::time::Duration;
use ureq::{Agent, AgentBuilder, Error::*, OrAnyStatus};

use super::user_agent::user_agent;

pub fn new_ureq_agent() -> Agent {
    AgentBuilder::new()
        .user_agent(&user_agent())
        // redirects are handled in the caching layer, so it can rewrite the cache key
        // and attach the resolved URL to the response
        .redirects(0)
        .timeout_read(Duration::from_secs(15))
        .timeout_write(Duration::from_secs(15))
        .build()
}

// Sleep schedule and retryable status/error sets lifted from pip's
// `network/session.py` retry policy.
const SLEEP_TIMES_MS: &[u64] = &[250, 500, 1000, 2000, 4000];
const RETRY_STATUS: &[u16] = &[500, 503, 520, 527];
use ureq::ErrorKind::*;
const RETRY_ERRORKIND: &[ureq::ErrorKind] = &[Dns, ConnectionFailed, TooManyRedirects, Io, ProxyConnect];

fn call_with_retry(req: ureq::Request) -> std::result::Result<ureq::Response, ureq::Error> {
    let mut sleeps = SLEEP_TIMES_MS.iter();
    loop {
        let result = req.clone().call();
        match &result {
            Ok(_) => return result,
            Err(Status(status, _)) if !RETRY_STATUS.contains(status) => return result,
            Err(err @ Transport(_)) if !RETRY_ERRORKIND.contains(&err.kind()) => return result,
            _ => {}
        }
        match sleeps.next() {
            Some(sleep_ms) => std::thread::sleep(Duration::from_millis(*sleep_ms)),
            None => return result,
        }
    }
}

pub fn do_request_ureq(agent: &Agent, req: &http::Request<()>) -> Result<http::Response<impl Read>> {
    let mut ureq_req =
        agent.request_url(req.method().as_str(), &Url::parse(&req.uri().to_string())?);
    for (name, value) in req.headers().iter() {
        ureq_req = ureq_req.set(name.as_str(), std::str::from_utf8(value.as_bytes())?);
    }
    let ureq_response = call_with_retry(ureq_req).or_any_status()?;
    let mut response = http::Response::builder().status(ureq_response.status());
    for name in ureq_response.headers_names() {
        for value in ureq_response.all(&name) {
            response = response.header(&name, value);
        }
    }
    Ok(response.body(ureq_response.into_reader())?)
}

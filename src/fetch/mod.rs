//! The Resource Fetcher: the only part of this crate that talks to the network or the
//! filesystem for remote data. Everything above this layer (the distribution/project
//! providers, the parser) goes through [`Http`] and never opens a socket directly.

mod http;
mod lazy;
mod ureq_glue;
mod user_agent;

pub use self::http::{CacheMode, Http, NotCached, ReadPlusMaybeSeek};

//! Fetches the tail of a remote file on demand, via HTTP range requests, without ever
//! downloading the whole thing. Used to read a wheel's zip central directory (and from
//! there its `METADATA`) off of a package index without pulling down the entire wheel.

use crate::prelude::*;

use super::http::{CacheMode, HttpInner};
use std::cmp;
use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom};

// Large enough to usually catch the zip central directory + dist-info members in a
// single round trip for typical wheels.
const LAZY_FETCH_SIZE: u64 = 10_000;

pub struct LazyRemoteFile {
    http: Rc<HttpInner>,
    url: Url,
    loaded: BTreeMap<u64, Vec<u8>>,
    length: u64,
    seek_pos: u64,
}

impl Seek for LazyRemoteFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (base_pos, offset) = match pos {
            SeekFrom::Start(offset) => {
                self.seek_pos = offset;
                return Ok(offset);
            }
            SeekFrom::End(offset) => (self.length, offset),
            SeekFrom::Current(offset) => (self.seek_pos, offset),
        };
        let new_pos = if offset >= 0 {
            base_pos.checked_add(offset as u64)
        } else {
            base_pos.checked_sub(offset.wrapping_neg() as u64)
        };
        match new_pos {
            Some(n) => {
                self.seek_pos = n;
                Ok(n)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }
}

enum RangeResponse {
    NotSatisfiable { total_len: u64 },
    Partial {
        offset: u64,
        total_len: u64,
        data: Box<dyn Read>,
    },
    Complete(Box<dyn Read>),
}

fn fetch_range(
    http: &HttpInner,
    method: &str,
    url: &Url,
    range_header: &str,
) -> Result<RangeResponse> {
    context!("Attempting range read on {url}");
    // Only the one Content-Range shape we actually care about; the full grammar in RFC
    // 7233 section 4.2 allows more than this.
    static CONTENT_RANGE_RE: Lazy<regex::bytes::Regex> =
        Lazy::new(|| regex::bytes::Regex::new(r"^bytes ([0-9]+)-[0-9]+/([0-9]+)$").unwrap());
    static CONTENT_RANGE_LEN_ONLY_RE: Lazy<regex::bytes::Regex> =
        Lazy::new(|| regex::bytes::Regex::new(r"^bytes [^/]*/([0-9]+)$").unwrap());

    let request = http::Request::builder()
        .method(method)
        .uri(url.as_str())
        .header("Range", range_header)
        .body(())?;
    let response = http.request(request, CacheMode::NoStore)?;

    fn str_capture<'a>(c: &'a regex::bytes::Captures, g: usize) -> Result<&'a str> {
        Ok(std::str::from_utf8(c.get(g).unwrap().as_bytes())?)
    }

    Ok(match response.status().as_u16() {
        206 => match response.headers().get("Content-Range") {
            None => bail!("range response is missing Content-Range"),
            Some(content_range) => match CONTENT_RANGE_RE.captures(content_range.as_bytes()) {
                None => bail!("failed to parse Content-Range"),
                Some(captures) => {
                    let offset: u64 = str_capture(&captures, 1)?.parse()?;
                    let total_len: u64 = str_capture(&captures, 2)?.parse()?;
                    RangeResponse::Partial {
                        offset,
                        total_len,
                        data: Box::new(response.into_body()),
                    }
                }
            },
        },
        // 416: we asked for a range past the end (common on the first fetch, before we
        // know the file's length).
        416 => match response.headers().get("Content-Range") {
            None => bail!("416 response is missing Content-Range"),
            Some(content_range) => {
                match CONTENT_RANGE_LEN_ONLY_RE.captures(content_range.as_bytes()) {
                    None => bail!("failed to parse 416 Content-Range"),
                    Some(captures) => {
                        let total_len: u64 = str_capture(&captures, 1)?.parse()?;
                        RangeResponse::NotSatisfiable { total_len }
                    }
                }
            }
        },
        // server doesn't support Range: and is sending the whole file
        200 => RangeResponse::Complete(Box::new(response.into_body())),
        status => bail!("expected 200 or 206 HTTP response, not {status}"),
    })
}

impl LazyRemoteFile {
    fn load_range(&mut self, offset: u64, length: u64) -> Result<()> {
        match fetch_range(
            &self.http,
            "GET",
            &self.url,
            &format!("bytes={}-{}", offset, offset.saturating_add(length) - 1),
        )? {
            RangeResponse::NotSatisfiable { .. } => {
                bail!("server didn't accept a byte-range request it previously accepted")
            }
            RangeResponse::Partial { offset, mut data, .. } => {
                self.loaded.insert(offset, slurp(&mut data)?);
                Ok(())
            }
            RangeResponse::Complete(_) => {
                bail!("server stopped honoring range requests mid-read")
            }
        }
    }
}

impl Read for LazyRemoteFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        fn copy_loaded(offset: u64, loaded: &BTreeMap<u64, Vec<u8>>, buf: &mut [u8]) -> Option<usize> {
            let (loaded_offset, loaded_data) = loaded.range(..=offset).next_back()?;
            let slide = usize::try_from(offset.saturating_sub(*loaded_offset)).ok()?;
            if slide < loaded_data.len() {
                let usable = &loaded_data[slide..];
                let len = cmp::min(buf.len(), usable.len());
                buf[..len].copy_from_slice(&usable[..len]);
                Some(len)
            } else {
                None
            }
        }

        fn fix_err<T, E>(input: std::result::Result<T, E>) -> std::io::Result<T>
        where
            E: Into<Box<dyn std::error::Error + Send + Sync>>,
        {
            input.map_err(|e| io::Error::new(io::ErrorKind::Other, e))
        }

        let bytes_wanted = cmp::min(buf.len() as u64, self.length.saturating_sub(self.seek_pos));
        if bytes_wanted == 0 {
            return Ok(0);
        }
        if let Some(len) = copy_loaded(self.seek_pos, &self.loaded, buf) {
            self.seek_pos = self.seek_pos.saturating_add(fix_err(len.try_into())?);
            return Ok(len);
        }
        let gap_start = match self.loaded.range(..=self.seek_pos).next_back() {
            Some((loaded_offset, loaded_data)) => loaded_offset + (loaded_data.len() as u64),
            None => 0,
        };
        let gap_end = match self.loaded.range(self.seek_pos + 1..).next() {
            Some((loaded_offset, _)) => *loaded_offset,
            None => self.length,
        };
        let fetch_start = if gap_end - self.seek_pos < LAZY_FETCH_SIZE {
            gap_end.saturating_sub(LAZY_FETCH_SIZE)
        } else {
            self.seek_pos
        };
        let fetch_end = fetch_start + LAZY_FETCH_SIZE;
        let fetch_start = fetch_start.clamp(gap_start, gap_end);
        let fetch_end = fetch_end.clamp(gap_start, gap_end);
        fix_err(self.load_range(fetch_start, fetch_end - fetch_start))?;
        copy_loaded(self.seek_pos, &self.loaded, buf)
            .map(|len| {
                self.seek_pos = self.seek_pos.saturating_add(len as u64);
                len
            })
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "range fetch didn't fill the gap"))
    }
}

impl LazyRemoteFile {
    pub fn new(http: Rc<HttpInner>, url: &Url) -> Result<LazyRemoteFile> {
        context!("Fetching metadata for {url}");
        // A single Range: bytes=-N request would save a round trip (we know the first
        // thing we'll read is the zip central directory at the tail), but PyPI's CDN
        // stopped honoring suffix ranges in Dec 2022: see pypi/warehouse#12823. So: a
        // small HEAD-ish range request first, to learn the length, then the real fetch.
        let length = match fetch_range(&http, "HEAD", url, "bytes=0-1")? {
            RangeResponse::NotSatisfiable { total_len } => total_len,
            RangeResponse::Partial { total_len, .. } => total_len,
            RangeResponse::Complete(_) => {
                bail!("{url} doesn't support range requests, can't read it lazily")
            }
        };
        Ok(LazyRemoteFile {
            http,
            url: url.clone(),
            loaded: BTreeMap::new(),
            length,
            seek_pos: 0,
        })
    }
}

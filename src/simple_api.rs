//! The Simple Repository API (PEP 503 HTML, PEP 691 JSON) client.
//!
//! One project page, `{index_url}/{normalized_name}/`, lists every known artifact for a
//! project. Index servers may answer in either format depending on the `Accept` header
//! we send; we ask for JSON first and fall back to parsing whatever HTML we're given
//! (nearly every real index still serves HTML by default).

use crate::fetch::{CacheMode, Http};
use crate::prelude::*;

use std::borrow::{Borrow, Cow};
use std::collections::HashMap as StdHashMap;

use html5ever::tendril::*;
use html5ever::tree_builder::{ElementFlags, NodeOrText, QuirksMode, TreeSink};
use html5ever::{expanded_name, parse_document};
use html5ever::{Attribute, ExpandedName, LocalNameStaticSet, QualName};
use string_cache::Atom;

const JSON_ACCEPT: &str = "application/vnd.pypi.simple.v1+json, application/vnd.pypi.simple.v1+html;q=0.9, text/html;q=0.8";

/// One artifact listed on a project page: its parsed filename, download URL, declared
/// content hash (if the index told us one), and the server's compatibility hints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub name: ArtifactName,
    pub url: Url,
    pub hash: Option<ArtifactHash>,
    pub requires_python: Option<Specifiers>,
    pub yanked: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectPage {
    pub artifacts: Vec<ArtifactInfo>,
}

/// Fetch and parse one project's Simple API page. `cache_mode` is forwarded straight to
/// the Resource Fetcher -- a relock run typically passes `CacheMode::NoStore` here.
pub fn fetch_project_page(
    http: &Http,
    index_url: &Url,
    project_name: &PackageName,
    cache_mode: CacheMode,
) -> Result<ProjectPage> {
    let url = index_url.join(&format!("{}/", project_name.normalized()))?;
    let request = http::Request::builder()
        .method("GET")
        .uri(url.as_str())
        .header("Accept", JSON_ACCEPT)
        .body(())?;
    let response = http.request(request, cache_mode)?;
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("text/html")
        .split(';')
        .next()
        .unwrap_or("text/html")
        .trim()
        .to_owned();

    let mut body = Vec::new();
    let mut reader = response.into_body();
    std::io::copy(&mut reader, &mut body)?;

    if content_type.contains("json") {
        parse_json(&body)
    } else {
        let text = String::from_utf8(body).context("simple API page wasn't valid utf-8")?;
        parse_html(&url, &text)
    }
}

#[derive(Deserialize)]
struct RawFile {
    filename: String,
    url: String,
    #[serde(default)]
    hashes: StdHashMap<String, String>,
    #[serde(rename = "requires-python")]
    requires_python: Option<String>,
    #[serde(default)]
    yanked: RawYanked,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawYanked {
    Flag(bool),
    Reason(String),
}

impl Default for RawYanked {
    fn default() -> Self {
        RawYanked::Flag(false)
    }
}

#[derive(Deserialize)]
struct RawProjectPage {
    files: Vec<RawFile>,
}

pub fn parse_json(body: &[u8]) -> Result<ProjectPage> {
    let raw: RawProjectPage = serde_json::from_slice(body).context("malformed PEP 691 project page")?;
    let mut artifacts = Vec::with_capacity(raw.files.len());
    for file in raw.files {
        let name: ArtifactName = file
            .filename
            .as_str()
            .try_into()
            .with_context(|| format!("unparseable artifact filename {:?}", file.filename))?;
        let url = Url::parse(&file.url).with_context(|| format!("invalid artifact url {:?}", file.url))?;
        let hash = file
            .hashes
            .get("sha256")
            .map(|hex| ArtifactHash::from_hex("sha256", hex))
            .transpose()?;
        let requires_python = file
            .requires_python
            .as_deref()
            .map(Specifiers::try_from)
            .transpose()?;
        let yanked = match file.yanked {
            RawYanked::Flag(false) => None,
            RawYanked::Flag(true) => Some(String::new()),
            RawYanked::Reason(reason) => Some(reason),
        };
        artifacts.push(ArtifactInfo {
            name,
            url,
            hash,
            requires_python,
            yanked,
        });
    }
    Ok(ProjectPage { artifacts })
}

const A_TAG: ExpandedName = expanded_name!(html "a");
const BASE_TAG: ExpandedName = expanded_name!(html "base");
const HREF_ATTR: Atom<LocalNameStaticSet> = html5ever::local_name!("href");
static REQUIRES_PYTHON_ATTR: Lazy<Atom<LocalNameStaticSet>> = Lazy::new(|| Atom::from("data-requires-python"));
static YANKED_ATTR: Lazy<Atom<LocalNameStaticSet>> = Lazy::new(|| Atom::from("data-yanked"));

fn get_attr<'a>(name: &Atom<LocalNameStaticSet>, attrs: &'a [Attribute]) -> Option<&'a str> {
    attrs.iter().find(|a| a.name.local == *name).map(|a| a.value.as_ref())
}

/// A `TreeSink` that only cares about two tags: `<base href>` (PEP 503's single
/// base-URL override) and `<a href>` (one artifact link each). Everything else is
/// boilerplate html5ever requires to drive the parser.
struct LinkSink<'a> {
    next_id: usize,
    names: StdHashMap<usize, QualName>,
    base: Cow<'a, Url>,
    changed_base: bool,
    links: Vec<(Url, Option<String>, Option<String>)>,
}

impl<'a> LinkSink<'a> {
    fn get_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl<'a> TreeSink for LinkSink<'a> {
    type Handle = usize;
    type Output = Self;

    fn finish(self) -> Self {
        self
    }

    fn create_element(&mut self, name: QualName, attrs: Vec<Attribute>, _flags: ElementFlags) -> usize {
        if name.expanded() == BASE_TAG && !self.changed_base {
            if let Some(href) = get_attr(&HREF_ATTR, &attrs) {
                if let Ok(new_base) = self.base.join(href) {
                    self.base = Cow::Owned(new_base);
                    self.changed_base = true;
                }
            }
        }
        if name.expanded() == A_TAG {
            if let Some(href) = get_attr(&HREF_ATTR, &attrs) {
                if let Ok(url) = self.base.join(href) {
                    let requires_python = get_attr(REQUIRES_PYTHON_ATTR.borrow(), &attrs).map(String::from);
                    let yanked = get_attr(YANKED_ATTR.borrow(), &attrs).map(String::from);
                    self.links.push((url, requires_python, yanked));
                }
            }
        }
        let id = self.get_id();
        self.names.insert(id, name);
        id
    }

    fn get_document(&mut self) -> usize {
        0
    }

    fn get_template_contents(&mut self, target: &usize) -> usize {
        target + 1
    }

    fn same_node(&self, x: &usize, y: &usize) -> bool {
        x == y
    }

    fn elem_name(&self, target: &usize) -> ExpandedName {
        self.names.get(target).expect("not an element").expanded()
    }

    fn create_comment(&mut self, _text: StrTendril) -> usize {
        self.get_id()
    }

    fn create_pi(&mut self, _target: StrTendril, _value: StrTendril) -> usize {
        unreachable!("HTML has no processing instructions")
    }

    fn append_before_sibling(&mut self, _sibling: &usize, _new_node: NodeOrText<usize>) {}
    fn append_based_on_parent_node(&mut self, _element: &usize, _prev_element: &usize, _new_node: NodeOrText<usize>) {}
    fn parse_error(&mut self, _msg: Cow<'static, str>) {}
    fn set_quirks_mode(&mut self, _mode: QuirksMode) {}
    fn append(&mut self, _parent: &usize, _child: NodeOrText<usize>) {}
    fn append_doctype_to_document(&mut self, _name: StrTendril, _public_id: StrTendril, _system_id: StrTendril) {}
    fn add_attrs_if_missing(&mut self, _target: &usize, _attrs: Vec<Attribute>) {}
    fn remove_from_parent(&mut self, _target: &usize) {}
    fn reparent_children(&mut self, _node: &usize, _new_parent: &usize) {}
    fn mark_script_already_started(&mut self, _node: &usize) {}
}

pub fn parse_html(base_url: &Url, body: &str) -> Result<ProjectPage> {
    let sink = LinkSink {
        next_id: 1,
        names: StdHashMap::new(),
        base: Cow::Borrowed(base_url),
        changed_base: false,
        links: Vec::new(),
    };
    let sink = parse_document(sink, Default::default()).one(body);

    let mut artifacts = Vec::with_capacity(sink.links.len());
    for (url, requires_python, yanked) in sink.links {
        let filename = url
            .path_segments()
            .and_then(|mut s| s.next_back())
            .ok_or_else(|| anyhow!("link with no filename: {url}"))?;
        let name: ArtifactName = match filename.try_into() {
            Ok(n) => n,
            // index pages sometimes link to things that aren't artifacts at all
            // (READMEs, directory listings); skip rather than fail the whole page.
            Err(_) => continue,
        };
        let hash = url
            .fragment()
            .and_then(|f| f.strip_prefix("sha256="))
            .map(|hex| ArtifactHash::from_hex("sha256", hex))
            .transpose()?;
        let requires_python = requires_python.as_deref().map(Specifiers::try_from).transpose()?;
        artifacts.push(ArtifactInfo {
            name,
            url,
            hash,
            requires_python,
            yanked,
        });
    }
    Ok(ProjectPage { artifacts })
}

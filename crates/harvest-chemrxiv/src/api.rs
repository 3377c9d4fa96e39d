//! Paginated preprint listing
//!
//! The listing is walked with `limit`/`skip` until a page comes back empty.
//! Each hit already carries the full metadata, so gathering needs no request
//! per item.

use std::collections::VecDeque;

use harvest_core::{Fetch, FetchError, Fetched, HttpClient, HttpSettings, ItemSource, Key, WorkItem};
use serde_json::Value;

/// One listing page.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub hits: Vec<Value>,
    pub total_count: Option<u64>,
}

/// Anything that can serve listing pages.
pub trait PageApi {
    fn page(&mut self, skip: u64, limit: u64) -> Result<Page, FetchError>;
}

/// HTTP client for the public API.
pub struct ChemRxivApi {
    http: HttpClient,
    base_url: String,
}

impl ChemRxivApi {
    pub fn new(base_url: &str, settings: &HttpSettings) -> Result<Self, FetchError> {
        Ok(Self {
            http: HttpClient::new(settings)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl PageApi for ChemRxivApi {
    fn page(&mut self, skip: u64, limit: u64) -> Result<Page, FetchError> {
        let url = format!("{}/items", self.base_url);
        let (body, _) = self
            .http
            .get_json(&url, &[("limit", limit.to_string()), ("skip", skip.to_string())])?;
        parse_page(&body)
    }
}

/// Split a listing response into hits and the reported total.
pub fn parse_page(body: &Value) -> Result<Page, FetchError> {
    let hits = match body.get("itemHits") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(hits)) => hits.clone(),
        Some(_) => return Err(FetchError::Permanent("itemHits is not a list".into())),
    };
    Ok(Page {
        hits,
        total_count: body.get("totalCount").and_then(Value::as_u64),
    })
}

/// A listing hit with a usable preprint id.
#[derive(Debug, Clone, PartialEq)]
pub struct Preprint {
    pub id: String,
    pub hit: Value,
}

impl Preprint {
    /// `None` for hits without `item.id`.
    pub fn from_hit(hit: Value) -> Option<Self> {
        let id = hit.pointer("/item/id")?.as_str()?.to_string();
        if id.is_empty() {
            return None;
        }
        Some(Self { id, hit })
    }
}

impl WorkItem for Preprint {
    fn key(&self) -> Key {
        Key::Text(self.id.clone())
    }
}

/// Every preprint of the listing, page by page.
pub struct PreprintSource<A> {
    api: A,
    page_size: u64,
    skip: u64,
    buffer: VecDeque<Preprint>,
    total: Option<u64>,
    exhausted: bool,
    without_id: u64,
}

impl<A: PageApi> PreprintSource<A> {
    pub fn new(api: A, page_size: u64) -> Self {
        Self {
            api,
            page_size: page_size.max(1),
            skip: 0,
            buffer: VecDeque::new(),
            total: None,
            exhausted: false,
            without_id: 0,
        }
    }

    /// Load the first page so the total is known before the run starts.
    pub fn prime(&mut self) -> Result<(), FetchError> {
        if self.skip == 0 && !self.exhausted {
            self.fill()?;
        }
        Ok(())
    }

    /// Position only advances once a page has been received.
    fn fill(&mut self) -> Result<(), FetchError> {
        let page = self.api.page(self.skip, self.page_size)?;
        if self.total.is_none() {
            self.total = page.total_count;
        }
        if page.hits.is_empty() {
            self.exhausted = true;
            return Ok(());
        }
        self.skip += self.page_size;
        for hit in page.hits {
            match Preprint::from_hit(hit) {
                Some(p) => self.buffer.push_back(p),
                None => self.without_id += 1,
            }
        }
        Ok(())
    }

    /// Hits skipped for lacking an id.
    pub fn without_id(&self) -> u64 {
        self.without_id
    }
}

impl<A: PageApi> ItemSource for PreprintSource<A> {
    type Item = Preprint;

    fn size_hint(&self) -> Option<u64> {
        self.total
    }

    fn next_item(&mut self) -> Result<Option<Preprint>, FetchError> {
        loop {
            if let Some(p) = self.buffer.pop_front() {
                return Ok(Some(p));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fill()?;
        }
    }
}

/// Stores the listing hit itself as the record payload.
#[derive(Debug, Default)]
pub struct HitPassthrough;

impl Fetch for HitPassthrough {
    type Item = Preprint;

    fn fetch(&mut self, item: &Preprint) -> Result<Fetched, FetchError> {
        Ok(Fetched::new(item.hit.clone()))
    }
}

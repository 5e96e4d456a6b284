//! Pagination walker: the listing-page state machine.
//!
//! Drives fetch, extract, dispatch and advance cycles over paginated
//! listing pages until exhaustion. A fetch failure, an unmatched results
//! container, an empty item list, a missing next URL or the configured
//! page cap all terminate the walk; selector drift and genuine
//! end-of-results are indistinguishable here and both halt, by intent.
//! The walk is restartable from scratch, never resumable mid-stream.

use scraper::{Html, Selector};
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::config::{SiteConfig, SleepConfig};
use crate::error::Result;
use crate::scrape::extract::{extract, ItemRecord};
use crate::scrape::url_builder::{absolutize, build_url, format_pattern};

/// Mode key used for single-item detail pages.
pub const DETAIL_MODE: &str = "video";

/// Placeholder bound by the detail-mode URL pattern.
pub const DETAIL_ID_PARAM: &str = "video_id";

/// Listing field carrying an explicit item link.
const URL_FIELD: &str = "url";

/// Listing field carrying an item identifier to run through the detail
/// URL pattern when no explicit link exists.
const KEY_FIELD: &str = "video_key";

/// Fetch capability consumed by the walker. Returns the raw page body.
#[async_trait::async_trait]
pub trait PageFetcher {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Consumer for resolved listing items. Item-level failures are absorbed
/// by the implementation; an error return aborts the walk.
#[async_trait::async_trait]
pub trait ItemSink {
    async fn handle(&mut self, item: ResolvedItem) -> Result<()>;
}

/// One listing entry with its detail URL resolved.
#[derive(Debug, Clone)]
pub struct ResolvedItem {
    pub url: String,
    pub title: String,
    pub record: ItemRecord,
}

/// Counters for one walk, mostly useful in tests and run summaries.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkStats {
    pub pages_fetched: u32,
    pub items_dispatched: u32,
}

/// Cursor held across iterations and discarded at stream end.
struct PaginationState {
    page: u32,
    url: String,
}

/// Everything the walker pulls off one listing page before the DOM is
/// dropped.
struct PageContent {
    items: Vec<ResolvedItem>,
    /// Href discovered via the next-page selector, if configured and
    /// present.
    next_href: Option<String>,
}

pub struct PageWalker<'a, F, S> {
    site: &'a SiteConfig,
    sleep: &'a SleepConfig,
    fetcher: &'a F,
    sink: &'a mut S,
    cancel: CancelToken,
}

impl<'a, F: PageFetcher, S: ItemSink> PageWalker<'a, F, S> {
    pub fn new(
        site: &'a SiteConfig,
        sleep: &'a SleepConfig,
        fetcher: &'a F,
        sink: &'a mut S,
        cancel: CancelToken,
    ) -> Self {
        Self {
            site,
            sleep,
            fetcher,
            sink,
            cancel,
        }
    }

    /// Walk listing pages starting at `start_url`, dispatching each
    /// resolved item to the sink.
    pub async fn walk(&mut self, mode: &str, identifier: &str, start_url: String) -> Result<WalkStats> {
        let mut stats = WalkStats::default();
        let mut state = PaginationState {
            page: 1,
            url: start_url,
        };

        loop {
            self.cancel.check()?;
            info!(url = %state.url, page = state.page, "processing listing page");

            let body = match self.fetcher.fetch(&state.url).await {
                Ok(body) => {
                    stats.pages_fetched += 1;
                    body
                }
                Err(err) => {
                    // Transient listing failures end the run for this
                    // invocation; nothing retries at this level.
                    error!(url = %state.url, %err, "failed to fetch listing page");
                    break;
                }
            };

            let Some(content) = self.parse_page(&body, state.page) else {
                break;
            };

            for item in content.items {
                info!(title = %item.title, url = %item.url, "found item");
                self.sink.handle(item).await?;
                stats.items_dispatched += 1;
            }

            let Some(next_url) = self.next_url(&state, identifier, mode, content.next_href) else {
                debug!("no next page, pagination complete");
                break;
            };

            state = PaginationState {
                page: state.page + 1,
                url: next_url,
            };
            self.cancel.sleep(self.sleep.page_delay()).await?;
        }

        Ok(stats)
    }

    /// Extract every item and the discovered next link from one page.
    /// `None` halts pagination.
    fn parse_page(&self, body: &str, page: u32) -> Option<PageContent> {
        let document = Html::parse_document(body);
        let list = &self.site.scrapers.list;

        // First non-empty match among the candidate container selectors.
        let mut container = None;
        for raw in &list.container.selector {
            let selector = match Selector::parse(raw) {
                Ok(s) => s,
                Err(err) => {
                    warn!(selector = raw, %err, "invalid container selector");
                    continue;
                }
            };
            if let Some(el) = document.select(&selector).next() {
                debug!(selector = raw, "found results container");
                container = Some(el);
                break;
            }
        }
        let Some(container) = container else {
            error!(page, "results container not found, stopping pagination");
            return None;
        };

        let item_selector = match Selector::parse(&list.item.selector) {
            Ok(s) => s,
            Err(err) => {
                error!(selector = %list.item.selector, %err, "invalid item selector");
                return None;
            }
        };

        let elements: Vec<_> = container.select(&item_selector).collect();
        if elements.is_empty() {
            info!(page, "no items on page, stopping pagination");
            return None;
        }

        let mut items = Vec::with_capacity(elements.len());
        for element in elements {
            let record = extract(element, &list.item.fields);
            let Some(url) = self.resolve_item_url(&record) else {
                warn!("unable to resolve item URL, skipping");
                continue;
            };
            let title = match record.get("title").and_then(|v| v.as_text()) {
                Some(t) if !t.is_empty() => t.to_string(),
                _ => element.text().collect::<String>().trim().to_string(),
            };
            items.push(ResolvedItem { url, title, record });
        }

        let next_href = list.pagination.next_page.as_ref().and_then(|next| {
            let selector = Selector::parse(&next.selector).ok()?;
            document
                .select(&selector)
                .next()
                .and_then(|el| el.value().attr(&next.attribute))
                .map(str::to_string)
        });

        Some(PageContent { items, next_href })
    }

    /// Resolve the detail URL for one record: an explicit `url` field
    /// fixed up to absolute, or an item key run through the detail URL
    /// pattern.
    fn resolve_item_url(&self, record: &ItemRecord) -> Option<String> {
        if let Some(href) = record.get(URL_FIELD).and_then(|v| v.as_text()) {
            return match absolutize(&self.site.base_url, href) {
                Ok(url) => Some(url),
                Err(err) => {
                    warn!(href, %err, "bad item href");
                    None
                }
            };
        }
        if let Some(key) = record.get(KEY_FIELD).and_then(|v| v.as_text()) {
            let pattern = &self.site.modes.get(DETAIL_MODE)?.url_pattern;
            return match build_url(
                &self.site.base_url,
                pattern,
                &self.site.url_encoding_rules,
                &[(DETAIL_ID_PARAM, key)],
            ) {
                Ok(url) => Some(url),
                Err(err) => {
                    warn!(key, %err, "failed to build item URL");
                    None
                }
            };
        }
        None
    }

    /// Compute the next page URL, or `None` when the walk is done.
    fn next_url(
        &self,
        state: &PaginationState,
        identifier: &str,
        mode: &str,
        next_href: Option<String>,
    ) -> Option<String> {
        let pagination = &self.site.scrapers.list.pagination;

        if let Some(max) = pagination.max_pages {
            if state.page >= max {
                debug!(max_pages = max, "page cap reached");
                return None;
            }
        }

        let raw = if let Some(template) = &pagination.subsequent_pages {
            // The template receives the current mode's URL pattern with
            // the identifier already bound.
            let url_pattern = match self.site.modes.get(mode) {
                Some(m) => {
                    match format_pattern(&m.url_pattern, &[(mode, identifier.to_string())]) {
                        Ok(p) => p,
                        Err(err) => {
                            warn!(%err, "failed to format mode pattern");
                            return None;
                        }
                    }
                }
                None => {
                    warn!(mode, "mode not in site config, using current URL as pattern");
                    state.url.clone()
                }
            };
            match format_pattern(
                template,
                &[
                    ("url_pattern", url_pattern),
                    ("page", (state.page + 1).to_string()),
                    ("search", identifier.to_string()),
                ],
            ) {
                Ok(next) => Some(next),
                Err(err) => {
                    warn!(%err, "failed to format next-page template");
                    None
                }
            }
        } else {
            next_href
        };

        let raw = raw.filter(|u| !u.is_empty())?;
        match absolutize(&self.site.base_url, &raw) {
            Ok(url) => {
                debug!(next = %url, "resolved next page");
                Some(url)
            }
            Err(err) => {
                warn!(next = %raw, %err, "bad next-page URL");
                None
            }
        }
    }
}

//! Site map: where things live on the target site and how to recognise them
//!
//! All URLs and navigation selectors the session manager and navigator use are
//! collected here so markup changes touch one place. Extraction selectors live
//! in the rule table instead.

use crate::ConfigError;
use scraper::{Html, Selector};
use url::Url;

/// How a resource's content is split into pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// One page only
    Single,
    /// Pages addressed by a 1-based `page` query parameter
    QueryParam,
    /// Content grows in place through a "load more" control or scrolling
    LoadMore,
}

/// Navigation selectors
#[derive(Debug, Clone)]
pub struct Selectors {
    pub login_email: String,
    pub login_password: String,
    pub login_submit: String,
    pub login_error: String,
    pub challenge: String,
    pub identity_link: String,
    pub profile_ready: String,
    pub not_found: String,
    pub connections_link: String,
    pub search_item: String,
    pub next_button: String,
    pub own_connection_item: String,
    pub load_more: String,
    pub expanders: Vec<String>,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            login_email: r#"input[name="session_key"]"#.to_string(),
            login_password: r#"input[name="session_password"]"#.to_string(),
            login_submit: r#"button[type="submit"]"#.to_string(),
            login_error: "#error-for-username:not(.hidden), #error-for-password:not(.hidden)"
                .to_string(),
            challenge: r#"#captcha-internal, form#two-step-challenge, input[name="pin"]"#
                .to_string(),
            identity_link: r#".feed-identity-module a[href*="/in/"]"#.to_string(),
            profile_ready: "h1.text-heading-xlarge, .pv-top-card".to_string(),
            not_found: ".not-found__container, .profile-unavailable".to_string(),
            connections_link: r#"a[href*="/search/results/people/"]"#.to_string(),
            search_item: "li.reusable-search__result-container".to_string(),
            next_button: "button.artdeco-pagination__button--next:not([disabled])".to_string(),
            own_connection_item: "li.mn-connection-card".to_string(),
            load_more: "button.scaffold-finite-scroll__load-button".to_string(),
            expanders: vec![
                r#".inline-show-more-text__button:not([aria-expanded="true"])"#.to_string(),
                r#".pv-profile-section__see-more-inline:not([aria-expanded="true"])"#.to_string(),
                r#".lt-line-clamp__more:not([aria-expanded="true"])"#.to_string(),
            ],
        }
    }
}

/// URLs and page classifiers for the target site
#[derive(Debug, Clone)]
pub struct SiteMap {
    base: Url,
    pub selectors: Selectors,
}

impl SiteMap {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let base = Url::parse(base_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        Ok(Self {
            base,
            selectors: Selectors::default(),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn path(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(path);
        url.set_query(None);
        url
    }

    pub fn login_url(&self) -> Url {
        self.path("/login")
    }

    pub fn feed_url(&self) -> Url {
        self.path("/feed/")
    }

    pub fn logout_url(&self) -> Url {
        self.path("/m/logout/")
    }

    pub fn profile_url(&self, slug: &str) -> Url {
        self.path(&format!("/in/{}/", slug))
    }

    pub fn own_connections_url(&self) -> Url {
        self.path("/mynetwork/invite-connect/connections/")
    }

    /// Resolves a possibly relative link found on a page
    pub fn resolve(&self, href: &str) -> Option<Url> {
        self.base.join(href).ok()
    }

    /// URL of page `page_index` (0-based) of a query-paginated list
    pub fn page_url(&self, list: &Url, page_index: u32) -> Url {
        let mut url = list.clone();
        let kept: Vec<(String, String)> = list
            .query_pairs()
            .filter(|(k, _)| k != "page")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (k, v) in &kept {
                pairs.append_pair(k, v);
            }
            if page_index > 0 {
                pairs.append_pair("page", &(page_index + 1).to_string());
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        url
    }

    /// True when the site bounced us to a login form or an auth wall
    pub fn is_login_wall(&self, url: &str) -> bool {
        let path = url_path(url);
        path.starts_with("/login") || path.starts_with("/authwall") || path.starts_with("/uas/login")
    }

    /// True for verification interstitials
    pub fn is_challenge(&self, url: &str) -> bool {
        url_path(url).starts_with("/checkpoint/")
    }

    pub fn is_feed(&self, url: &str) -> bool {
        url_path(url).starts_with("/feed")
    }

    pub fn is_not_found(&self, url: &str) -> bool {
        let path = url_path(url);
        path.starts_with("/404") || path.contains("/unavailable")
    }

    /// Slug of the logged-in member, read from the feed's identity card
    pub fn identity_from_html(&self, html: &str) -> Option<String> {
        first_href(html, &self.selectors.identity_link).and_then(|href| slug_from_href(&href))
    }

    /// The connection list link on a profile page, when the list is visible
    pub fn connections_link_from_html(&self, html: &str) -> Option<Url> {
        first_href(html, &self.selectors.connections_link).and_then(|href| self.resolve(&href))
    }
}

fn url_path(url: &str) -> String {
    Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}

fn first_href(html: &str, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let document = Html::parse_document(html);
    let href = document
        .select(&selector)
        .find_map(|el| el.value().attr("href").map(str::to_string));
    href
}

/// Extracts `<slug>` from a `/in/<slug>/` link
pub fn slug_from_href(href: &str) -> Option<String> {
    let rest = href.split("/in/").nth(1)?;
    let slug: String = rest
        .chars()
        .take_while(|c| *c != '/' && *c != '?' && *c != '#')
        .collect();
    if slug.is_empty() {
        None
    } else {
        Some(slug)
    }
}

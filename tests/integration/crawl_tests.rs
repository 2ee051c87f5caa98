//! Integration tests for the crawler
//!
//! These tests drive the full crawl cycle against a scripted in-memory site
//! that implements `BrowserDriver`: login form, feed, profiles, paginated
//! search results and the own-connections page with a "load more" button.

use async_trait::async_trait;
use linkedin_crawl::browser::{BrowserCookie, BrowserDriver, DriverError};
use linkedin_crawl::config::{ChallengeMode, Config, CrawlRequest, Credentials};
use linkedin_crawl::crawler::{
    Coordinator, Cursor, Navigator, RateController, Selectors, SessionManager, SiteMap, Target,
};
use linkedin_crawl::output::{RecordSink, SinkError};
use linkedin_crawl::storage::{Checkpoint, CheckpointStore, SqliteStorage, StoreResult};
use linkedin_crawl::{CrawlError, NavState, Record, RecordKind, Stage};
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

const BASE: &str = "https://www.linkedin.com";
const EMAIL: &str = "me@example.com";
const PASSWORD: &str = "secret";
const TOKEN: &str = "token-ok";
const OWN_SLUG: &str = "me-myself";

// ===== Fake site =====

#[derive(Default)]
struct FakeProfile {
    name: String,
    /// Connection pages of (slug, name); `None` hides the connection list
    connections: Option<Vec<Vec<(String, String)>>>,
}

#[derive(Default)]
struct SiteState {
    logged_in: bool,
    current: String,
    typed: HashMap<String, String>,
    login_error: bool,
    login_submissions: u32,
    /// Submitting the login form leads to a verification page
    challenge_on_login: bool,
    /// Polls of the verification page until it resolves by itself
    challenge_resolves_after: Option<u32>,
    profiles: HashMap<String, FakeProfile>,
    own_connections: Vec<(String, String)>,
    own_shown: usize,
    gotos: Vec<String>,
    /// (URL fragment, remaining timeouts)
    timeouts: Vec<(String, u32)>,
    /// The session expires on the first goto to a URL containing this
    expire_on: Option<String>,
    /// Search result page (0-based) rendered without the result list
    broken_page: Option<usize>,
    /// The session hits a login wall right after this many page reads
    wall_after_reads: Option<u32>,
}

type SharedSite = Arc<Mutex<SiteState>>;

struct FakeDriver {
    site: SharedSite,
    selectors: Selectors,
}

impl FakeDriver {
    fn new(site: &SharedSite) -> Self {
        Self {
            site: site.clone(),
            selectors: Selectors::default(),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SiteState) -> T) -> T {
        let mut state = self.site.lock().unwrap();
        f(&mut state)
    }

    fn count_now(&self, selector: &str) -> Result<usize, DriverError> {
        let html = self.with_state(|s| render(s));
        count_matches(&html, selector)
    }

    fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.with_state(|s| {
            s.gotos.push(url.to_string());

            if let Some(entry) = s
                .timeouts
                .iter_mut()
                .find(|entry| entry.1 > 0 && url.contains(entry.0.as_str()))
            {
                entry.1 -= 1;
                return Err(DriverError::Timeout(format!("goto {}", url)));
            }

            if s.expire_on.as_deref().is_some_and(|f| url.contains(f)) {
                s.expire_on = None;
                s.logged_in = false;
            }

            let path = path_of(url);
            if path.starts_with("/login") {
                s.login_error = false;
                s.current = if s.logged_in {
                    format!("{}/feed/", BASE)
                } else {
                    url.to_string()
                };
                return Ok(());
            }
            if !s.logged_in {
                s.current = format!("{}/authwall?trk=public", BASE);
                return Ok(());
            }
            if path == "/mynetwork/invite-connect/connections/" {
                s.own_shown = s.own_connections.len().min(2);
            }
            s.current = url.to_string();
            Ok(())
        })
    }

    fn press(&self, selector: &str) -> Result<bool, DriverError> {
        let html = self.with_state(|s| render(s));
        if count_matches(&html, selector)? == 0 {
            return Ok(false);
        }

        let login_submit = self.selectors.login_submit.clone();
        let password_field = self.selectors.login_password.clone();
        let load_more = self.selectors.load_more.clone();
        self.with_state(|s| {
            if selector == login_submit && path_of(&s.current).starts_with("/login") {
                s.login_submissions += 1;
                if s.typed.get(&password_field).map(String::as_str) != Some(PASSWORD) {
                    s.login_error = true;
                } else if s.challenge_on_login {
                    s.current = format!("{}/checkpoint/challenge/abc", BASE);
                } else {
                    s.logged_in = true;
                    s.current = format!("{}/feed/", BASE);
                }
            } else if selector == load_more {
                s.own_shown = (s.own_shown + 2).min(s.own_connections.len());
            }
        });
        Ok(true)
    }
}

fn path_of(url: &str) -> String {
    Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_default()
}

fn count_matches(html: &str, selector: &str) -> Result<usize, DriverError> {
    let selector = Selector::parse(selector)
        .map_err(|_| DriverError::Protocol(format!("bad selector {}", selector)))?;
    let document = Html::parse_document(html);
    let count = document.select(&selector).count();
    Ok(count)
}

fn render(s: &SiteState) -> String {
    let Ok(url) = Url::parse(&s.current) else {
        return "<html><body></body></html>".to_string();
    };
    let path = url.path().to_string();
    let query: HashMap<String, String> = url.query_pairs().into_owned().collect();

    let body = if path.starts_with("/login") {
        let error = if s.login_error {
            r#"<div id="error-for-password">Wrong email or password.</div>"#
        } else {
            r#"<div id="error-for-password" class="hidden"></div>"#
        };
        format!(
            r#"<form><input name="session_key"><input name="session_password" type="password">{}<button type="submit">Sign in</button></form>"#,
            error
        )
    } else if path.starts_with("/checkpoint/") {
        r#"<form id="two-step-challenge"><input name="pin"></form>"#.to_string()
    } else if path.starts_with("/feed") {
        format!(
            r#"<div class="feed-identity-module"><a href="/in/{}/">Me Myself</a></div>"#,
            OWN_SLUG
        )
    } else if let Some(slug) = path.strip_prefix("/in/") {
        let slug = slug.trim_end_matches('/');
        match s.profiles.get(slug) {
            Some(profile) => profile_html(slug, profile),
            None => r#"<div class="not-found__container">This page doesn't exist</div>"#
                .to_string(),
        }
    } else if path.starts_with("/search/results/people") {
        let slug = query.get("connectionOf").cloned().unwrap_or_default();
        let index = query
            .get("page")
            .and_then(|p| p.parse::<usize>().ok())
            .unwrap_or(1)
            .saturating_sub(1);
        search_html(s, &slug, index)
    } else if path == "/mynetwork/invite-connect/connections/" {
        own_connections_html(s)
    } else {
        "<p>Sign in to continue</p>".to_string()
    };

    format!("<html><body>{}</body></html>", body)
}

fn profile_html(slug: &str, profile: &FakeProfile) -> String {
    let link = match &profile.connections {
        Some(_) => format!(
            r#"<a href="/search/results/people/?connectionOf={}">500+ connections</a>"#,
            slug
        ),
        None => "<span>Connections are private</span>".to_string(),
    };
    format!(
        r#"<main><section class="pv-top-card"><h1 class="text-heading-xlarge">{}</h1><div class="text-body-medium">Engineer</div>{}</section></main>"#,
        profile.name, link
    )
}

fn search_html(s: &SiteState, slug: &str, index: usize) -> String {
    let pages = s
        .profiles
        .get(slug)
        .and_then(|p| p.connections.as_ref())
        .cloned()
        .unwrap_or_default();
    let items: String = pages
        .get(index)
        .map(|page| {
            page.iter()
                .map(|(slug, name)| {
                    format!(
                        r#"<li class="reusable-search__result-container"><span class="entity-result__title-text"><a class="app-aware-link" href="{}/in/{}?mini=1"><span aria-hidden="true">{}</span></a></span><div class="entity-result__primary-subtitle">Engineer</div><span class="entity-result__badge-text">• 2nd</span></li>"#,
                        BASE, slug, name
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    let list = if s.broken_page == Some(index) {
        format!(r#"<ol class="search-results">{}</ol>"#, items)
    } else {
        format!(r#"<ul class="reusable-search__entity-result-list">{}</ul>"#, items)
    };
    let next = if index + 1 < pages.len() {
        r#"<button class="artdeco-pagination__button--next">Next</button>"#
    } else {
        r#"<button class="artdeco-pagination__button--next" disabled>Next</button>"#
    };
    format!("{}{}", list, next)
}

fn own_connections_html(s: &SiteState) -> String {
    let items: String = s
        .own_connections
        .iter()
        .take(s.own_shown)
        .map(|(slug, name)| {
            format!(
                r#"<li class="mn-connection-card"><a class="mn-connection-card__link" href="/in/{}/"><span class="mn-connection-card__name">{}</span><span class="mn-connection-card__occupation">Engineer</span></a></li>"#,
                slug, name
            )
        })
        .collect();
    let more = if s.own_shown < s.own_connections.len() {
        r#"<button class="scaffold-finite-scroll__load-button">Show more results</button>"#
    } else {
        ""
    };
    format!(r#"<div class="mn-connections"><ul>{}</ul>{}</div>"#, items, more)
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn goto(&mut self, url: &str) -> Result<(), DriverError> {
        self.navigate(url)
    }

    async fn current_url(&mut self) -> Result<String, DriverError> {
        Ok(self.with_state(|s| {
            if path_of(&s.current).starts_with("/checkpoint/") {
                if let Some(left) = s.challenge_resolves_after.as_mut() {
                    if *left == 0 {
                        s.logged_in = true;
                        s.current = format!("{}/feed/", BASE);
                    } else {
                        *left -= 1;
                    }
                }
            }
            s.current.clone()
        }))
    }

    async fn content(&mut self) -> Result<String, DriverError> {
        Ok(self.with_state(|s| {
            let html = render(s);
            if let Some(left) = s.wall_after_reads.as_mut() {
                *left = left.saturating_sub(1);
                if *left == 0 {
                    s.wall_after_reads = None;
                    s.logged_in = false;
                    s.current = format!("{}/authwall?trk=public", BASE);
                }
            }
            html
        }))
    }

    async fn exists(&mut self, selector: &str) -> Result<bool, DriverError> {
        Ok(self.count_now(selector)? > 0)
    }

    async fn count(&mut self, selector: &str) -> Result<usize, DriverError> {
        self.count_now(selector)
    }

    async fn click(&mut self, selector: &str) -> Result<bool, DriverError> {
        self.press(selector)
    }

    async fn fill(&mut self, selector: &str, text: &str) -> Result<(), DriverError> {
        if self.count_now(selector)? == 0 {
            return Err(DriverError::Protocol(format!("no element {}", selector)));
        }
        self.with_state(|s| s.typed.insert(selector.to_string(), text.to_string()));
        Ok(())
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn cookies(&mut self) -> Result<Vec<BrowserCookie>, DriverError> {
        let logged_in = self.with_state(|s| s.logged_in);
        if !logged_in {
            return Ok(Vec::new());
        }
        Ok(vec![BrowserCookie {
            name: "li_at".to_string(),
            value: TOKEN.to_string(),
            domain: ".linkedin.com".to_string(),
            path: "/".to_string(),
            secure: true,
            http_only: true,
            expires: None,
        }])
    }

    async fn set_cookies(&mut self, cookies: &[BrowserCookie]) -> Result<(), DriverError> {
        let valid = cookies.iter().any(|c| c.name == "li_at" && c.value == TOKEN);
        self.with_state(|s| s.logged_in = s.logged_in || valid);
        Ok(())
    }

    async fn clear_cookies(&mut self) -> Result<(), DriverError> {
        self.with_state(|s| s.logged_in = false);
        Ok(())
    }
}

// ===== Sink and checkpoint store =====

#[derive(Default)]
struct MemorySink {
    records: Mutex<Vec<Record>>,
    failures_left: Mutex<u32>,
    cancel_at: Mutex<Option<(usize, CancellationToken)>>,
}

impl MemorySink {
    fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }
}

impl RecordSink for MemorySink {
    fn emit(&self, record: &Record) -> Result<(), SinkError> {
        {
            let mut failures = self.failures_left.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(SinkError::Write("disk full".to_string()));
            }
        }

        let mut records = self.records.lock().unwrap();
        records.push(record.clone());
        if let Some((at, token)) = self.cancel_at.lock().unwrap().as_ref() {
            if records.len() == *at {
                token.cancel();
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct MemoryCheckpoints {
    current: Mutex<HashMap<String, Checkpoint>>,
    saves: Mutex<Vec<Checkpoint>>,
}

impl MemoryCheckpoints {
    fn saves(&self) -> Vec<Checkpoint> {
        self.saves.lock().unwrap().clone()
    }

    fn get(&self, id: &str) -> Option<Checkpoint> {
        self.current.lock().unwrap().get(id).cloned()
    }
}

impl CheckpointStore for MemoryCheckpoints {
    fn load(&self, resource_id: &str) -> StoreResult<Option<Checkpoint>> {
        Ok(self.get(resource_id))
    }

    fn save(&self, checkpoint: &Checkpoint) -> StoreResult<()> {
        self.current
            .lock()
            .unwrap()
            .insert(checkpoint.resource_id.clone(), checkpoint.clone());
        self.saves.lock().unwrap().push(checkpoint.clone());
        Ok(())
    }

    fn clear(&self, resource_id: &str) -> StoreResult<()> {
        self.current.lock().unwrap().remove(resource_id);
        Ok(())
    }
}

// ===== Helpers =====

fn test_config() -> Config {
    let mut config = Config::default();
    config.rate.floor_ms = 0;
    config.rate.ceiling_ms = 0;
    config.rate.jitter_ms = 0;
    config.retry.backoff_base_ms = 0;
    config.retry.backoff_max_ms = 0;
    config.timeouts.content_ready_ms = 50;
    config.timeouts.login_ms = 50;
    config.timeouts.challenge_ms = 50;
    config.timeouts.poll_ms = 5;
    config.crawl.profile = false;
    config.crawl.connections = true;
    config
}

fn request(slugs: &[&str]) -> CrawlRequest {
    CrawlRequest {
        profile_slugs: slugs.iter().map(|s| s.to_string()).collect(),
        credentials: Credentials::new(EMAIL, PASSWORD),
        headless: true,
    }
}

fn people(prefix: &str, pages: usize, per_page: usize) -> Vec<Vec<(String, String)>> {
    (0..pages)
        .map(|p| {
            (0..per_page)
                .map(|i| {
                    let n = p * per_page + i;
                    (format!("{}-{}", prefix, n), format!("Person {}", n))
                })
                .collect()
        })
        .collect()
}

/// A site where jane-doe has three pages of two connections each
fn jane_site() -> SharedSite {
    let mut state = SiteState::default();
    state.profiles.insert(
        "jane-doe".to_string(),
        FakeProfile {
            name: "Jane Doe".to_string(),
            connections: Some(people("friend", 3, 2)),
        },
    );
    Arc::new(Mutex::new(state))
}

struct Harness {
    sink: Arc<MemorySink>,
    checkpoints: Arc<MemoryCheckpoints>,
    coordinator: Coordinator,
}

fn harness(config: Config, request: CrawlRequest) -> Harness {
    let sink = Arc::new(MemorySink::default());
    let checkpoints = Arc::new(MemoryCheckpoints::default());
    let coordinator =
        Coordinator::new(config, request, sink.clone(), checkpoints.clone()).unwrap();
    Harness {
        sink,
        checkpoints,
        coordinator,
    }
}

fn names(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|r| r.text("name").unwrap_or_default().to_string())
        .collect()
}

// ===== Tests =====

#[tokio::test]
async fn test_connection_pages_are_emitted_in_order() {
    let site = jane_site();
    let h = harness(test_config(), request(&["jane-doe"]));

    let report = h.coordinator.run(FakeDriver::new(&site)).await.unwrap();

    let records = h.sink.records();
    assert_eq!(
        names(&records),
        vec!["Person 0", "Person 1", "Person 2", "Person 3", "Person 4", "Person 5"]
    );
    let cursors: Vec<Cursor> = records.iter().map(|r| r.cursor).collect();
    assert!(cursors.windows(2).all(|w| w[0] <= w[1]));
    assert!(records.iter().all(|r| r.kind == RecordKind::Connection));
    assert!(records
        .iter()
        .all(|r| r.text("connection_of") == Some("jane-doe")));
    assert_eq!(records[0].text("slug"), Some("friend-0"));
    assert_eq!(records[0].text("degree"), Some("2nd"));

    let saves = h.checkpoints.saves();
    assert_eq!(saves.len(), 3);
    let saved_cursors: Vec<Option<Cursor>> = saves.iter().map(|c| c.last_cursor).collect();
    assert_eq!(
        saved_cursors,
        vec![
            Some(Cursor::new(0)),
            Some(Cursor::new(1)),
            Some(Cursor::new(2))
        ]
    );
    assert!(!saves[0].exhausted);
    assert!(!saves[1].exhausted);
    assert!(saves[2].exhausted);
    assert_eq!(saves[2].records_emitted, 6);

    assert_eq!(report.pages, 3);
    assert_eq!(report.records, 6);
    assert!(!report.cancelled);
    assert!(report.skipped.is_empty());
}

#[tokio::test]
async fn test_navigation_timeouts_are_retried() {
    let site = jane_site();
    site.lock()
        .unwrap()
        .timeouts
        .push(("page=2".to_string(), 2));
    let h = harness(test_config(), request(&["jane-doe"]));

    let report = h.coordinator.run(FakeDriver::new(&site)).await.unwrap();

    assert_eq!(report.records, 6);
    assert_eq!(h.sink.records().len(), 6);
    let page_two_visits = site
        .lock()
        .unwrap()
        .gotos
        .iter()
        .filter(|u| u.contains("page=2"))
        .count();
    assert_eq!(page_two_visits, 3);
}

#[tokio::test]
async fn test_exhausted_navigation_retries_fail_the_crawl() {
    let site = jane_site();
    site.lock()
        .unwrap()
        .timeouts
        .push(("page=2".to_string(), 10));
    let h = harness(test_config(), request(&["jane-doe"]));

    let failure = h
        .coordinator
        .run(FakeDriver::new(&site))
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Load);
    assert_eq!(failure.last_cursor, Some(Cursor::new(0)));
    assert!(matches!(
        failure.source,
        CrawlError::NavigationTimeout { .. }
    ));

    let checkpoint = h.checkpoints.get("connections:jane-doe").unwrap();
    assert_eq!(checkpoint.last_cursor, Some(Cursor::new(0)));
    assert!(!checkpoint.exhausted);
}

#[tokio::test]
async fn test_resume_skips_committed_pages() {
    let site = jane_site();
    let h = harness(test_config(), request(&["jane-doe"]));
    h.checkpoints
        .save(&Checkpoint {
            resource_id: "connections:jane-doe".to_string(),
            last_cursor: Some(Cursor::new(0)),
            records_emitted: 2,
            exhausted: false,
            updated_at: chrono::Utc::now(),
        })
        .unwrap();

    h.coordinator.run(FakeDriver::new(&site)).await.unwrap();

    let records = h.sink.records();
    assert_eq!(
        names(&records),
        vec!["Person 2", "Person 3", "Person 4", "Person 5"]
    );
    assert_eq!(records[0].cursor, Cursor::new(1));

    let checkpoint = h.checkpoints.get("connections:jane-doe").unwrap();
    assert_eq!(checkpoint.records_emitted, 6);
    assert!(checkpoint.exhausted);
}

#[tokio::test]
async fn test_exhausted_target_is_not_revisited() {
    let site = jane_site();
    let h = harness(test_config(), request(&["jane-doe"]));
    let mut done = Checkpoint::empty("connections:jane-doe");
    done.last_cursor = Some(Cursor::new(2));
    done.exhausted = true;
    h.checkpoints.save(&done).unwrap();

    let report = h.coordinator.run(FakeDriver::new(&site)).await.unwrap();

    assert!(h.sink.records().is_empty());
    assert_eq!(report.already_done, vec!["connections:jane-doe".to_string()]);
    let searched = site
        .lock()
        .unwrap()
        .gotos
        .iter()
        .any(|u| u.contains("/search/"));
    assert!(!searched);
}

#[tokio::test]
async fn test_expired_session_is_reauthenticated() {
    let site = jane_site();
    site.lock().unwrap().expire_on = Some("page=2".to_string());
    let h = harness(test_config(), request(&["jane-doe"]));

    let report = h.coordinator.run(FakeDriver::new(&site)).await.unwrap();

    assert_eq!(report.reauthentications, 1);
    assert_eq!(site.lock().unwrap().login_submissions, 2);
    assert_eq!(
        names(&h.sink.records()),
        vec!["Person 0", "Person 1", "Person 2", "Person 3", "Person 4", "Person 5"]
    );
}

#[tokio::test]
async fn test_reauthentication_budget_is_bounded() {
    let site = jane_site();
    site.lock().unwrap().expire_on = Some("page=2".to_string());
    let mut config = test_config();
    config.crawl.max_reauth = 0;
    let h = harness(config, request(&["jane-doe"]));

    let failure = h
        .coordinator
        .run(FakeDriver::new(&site))
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Load);
    assert!(matches!(failure.source, CrawlError::SessionInvalid { .. }));
    assert_eq!(failure.last_cursor, Some(Cursor::new(0)));
}

#[tokio::test]
async fn test_missing_profile_is_skipped() {
    let site = jane_site();
    let mut config = test_config();
    config.crawl.profile = true;
    config.crawl.connections = false;
    let h = harness(config, request(&["ghost", "jane-doe"]));

    let report = h.coordinator.run(FakeDriver::new(&site)).await.unwrap();

    assert_eq!(report.skipped, vec!["profile:ghost".to_string()]);
    let records = h.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, RecordKind::Profile);
    assert_eq!(records[0].text("name"), Some("Jane Doe"));
    assert_eq!(records[0].text("slug"), Some("jane-doe"));
    assert_eq!(records[0].text("headline"), Some("Engineer"));
    assert!(h.checkpoints.get("profile:jane-doe").unwrap().exhausted);
}

#[tokio::test]
async fn test_private_connection_list_is_skipped() {
    let site = jane_site();
    site.lock().unwrap().profiles.insert(
        "private-pat".to_string(),
        FakeProfile {
            name: "Pat Private".to_string(),
            connections: None,
        },
    );
    let h = harness(test_config(), request(&["private-pat", "jane-doe"]));

    let report = h.coordinator.run(FakeDriver::new(&site)).await.unwrap();

    assert_eq!(report.skipped, vec!["connections:private-pat".to_string()]);
    assert_eq!(h.sink.records().len(), 6);
}

#[tokio::test]
async fn test_schema_mismatch_is_fatal_and_keeps_checkpoint() {
    let site = jane_site();
    site.lock().unwrap().broken_page = Some(1);
    let h = harness(test_config(), request(&["jane-doe"]));

    let failure = h
        .coordinator
        .run(FakeDriver::new(&site))
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Extract);
    assert_eq!(failure.resource, "connections:jane-doe");
    assert_eq!(failure.last_cursor, Some(Cursor::new(0)));
    assert!(matches!(failure.source, CrawlError::ExtractionSchema(_)));

    assert_eq!(h.sink.records().len(), 2);
    let checkpoint = h.checkpoints.get("connections:jane-doe").unwrap();
    assert_eq!(checkpoint.last_cursor, Some(Cursor::new(0)));
    assert_eq!(checkpoint.records_emitted, 2);
    assert!(!checkpoint.exhausted);
}

#[tokio::test]
async fn test_cancellation_stops_after_current_page() {
    let site = jane_site();
    let token = CancellationToken::new();
    let sink = Arc::new(MemorySink::default());
    *sink.cancel_at.lock().unwrap() = Some((3, token.clone()));
    let checkpoints = Arc::new(MemoryCheckpoints::default());
    let coordinator = Coordinator::new(
        test_config(),
        request(&["jane-doe"]),
        sink.clone(),
        checkpoints.clone(),
    )
    .unwrap()
    .with_cancellation(token);

    let report = coordinator.run(FakeDriver::new(&site)).await.unwrap();

    assert!(report.cancelled);
    // The page in flight when the stop arrived is still completed
    assert_eq!(sink.records().len(), 4);
    let checkpoint = checkpoints.get("connections:jane-doe").unwrap();
    assert_eq!(checkpoint.last_cursor, Some(Cursor::new(1)));
    assert!(!checkpoint.exhausted);
}

#[tokio::test]
async fn test_sink_failures_are_retried() {
    let site = jane_site();
    let h = harness(test_config(), request(&["jane-doe"]));
    *h.sink.failures_left.lock().unwrap() = 2;

    let report = h.coordinator.run(FakeDriver::new(&site)).await.unwrap();

    assert_eq!(report.records, 6);
    assert_eq!(h.sink.records().len(), 6);
}

#[tokio::test]
async fn test_persistent_sink_failure_is_fatal() {
    let site = jane_site();
    let h = harness(test_config(), request(&["jane-doe"]));
    *h.sink.failures_left.lock().unwrap() = 100;

    let failure = h
        .coordinator
        .run(FakeDriver::new(&site))
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Emit);
    assert_eq!(failure.last_cursor, None);
    assert!(matches!(failure.source, CrawlError::Sink(_)));
    assert!(h.checkpoints.get("connections:jane-doe").is_none());
}

#[tokio::test]
async fn test_unattended_challenge_fails_with_guidance() {
    let site = jane_site();
    site.lock().unwrap().challenge_on_login = true;
    let h = harness(test_config(), request(&["jane-doe"]));

    let failure = h
        .coordinator
        .run(FakeDriver::new(&site))
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Authenticate);
    match failure.source {
        CrawlError::ChallengeRequired { mode, hint } => {
            assert_eq!(mode, ChallengeMode::Unattended);
            assert!(hint.contains("--headed"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(h.sink.records().is_empty());
}

#[tokio::test]
async fn test_interactive_challenge_waits_for_resolution() {
    let site = jane_site();
    {
        let mut state = site.lock().unwrap();
        state.challenge_on_login = true;
        state.challenge_resolves_after = Some(3);
    }
    let mut config = test_config();
    config.timeouts.challenge_ms = 2_000;
    let mut req = request(&["jane-doe"]);
    req.headless = false;
    let h = harness(config, req);

    let report = h.coordinator.run(FakeDriver::new(&site)).await.unwrap();

    assert_eq!(report.records, 6);
}

#[tokio::test]
async fn test_rejected_credentials_are_not_retried() {
    let site = jane_site();
    let mut req = request(&["jane-doe"]);
    req.credentials = Credentials::new(EMAIL, "wrong");
    let h = harness(test_config(), req);

    let failure = h
        .coordinator
        .run(FakeDriver::new(&site))
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Authenticate);
    assert!(matches!(failure.source, CrawlError::Auth { .. }));
    assert_eq!(site.lock().unwrap().login_submissions, 1);
}

#[tokio::test]
async fn test_own_connections_grow_in_place() {
    let mut state = SiteState::default();
    state.own_connections = people("mine", 1, 5).remove(0);
    let site = Arc::new(Mutex::new(state));
    let h = harness(test_config(), request(&[OWN_SLUG]));

    let report = h.coordinator.run(FakeDriver::new(&site)).await.unwrap();

    let records = h.sink.records();
    assert_eq!(
        names(&records),
        vec!["Person 0", "Person 1", "Person 2", "Person 3", "Person 4"]
    );
    let cursors: Vec<u32> = records.iter().map(|r| r.cursor.page()).collect();
    assert_eq!(cursors, vec![0, 0, 1, 1, 2]);
    assert!(records.iter().all(|r| r.text("connection_of") == Some(OWN_SLUG)));
    assert_eq!(report.pages, 3);

    let checkpoint = h.checkpoints.get("connections:me-myself").unwrap();
    assert_eq!(checkpoint.last_cursor, Some(Cursor::new(2)));
    assert!(checkpoint.exhausted);
}

/// Coordinator whose sink cancels `token` after `at` records
fn cancelling_harness(config: Config, slugs: &[&str], at: usize) -> Harness {
    let token = CancellationToken::new();
    let h = harness(config, request(slugs));
    *h.sink.cancel_at.lock().unwrap() = Some((at, token.clone()));
    Harness {
        coordinator: h.coordinator.with_cancellation(token),
        ..h
    }
}

/// A fresh run over the same sink and checkpoints
fn rerun(config: Config, slugs: &[&str], previous: &Harness) -> Coordinator {
    Coordinator::new(
        config,
        request(slugs),
        previous.sink.clone(),
        previous.checkpoints.clone(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_cancelled_crawl_resumes_without_duplicates() {
    let site = jane_site();
    let h = cancelling_harness(test_config(), &["jane-doe"], 3);

    let first = h.coordinator.run(FakeDriver::new(&site)).await.unwrap();
    assert!(first.cancelled);
    assert_eq!(h.sink.records().len(), 4);

    let second = rerun(test_config(), &["jane-doe"], &h)
        .run(FakeDriver::new(&site))
        .await
        .unwrap();

    assert!(!second.cancelled);
    assert_eq!(second.records, 2);
    assert_eq!(
        names(&h.sink.records()),
        vec!["Person 0", "Person 1", "Person 2", "Person 3", "Person 4", "Person 5"]
    );
    let checkpoint = h.checkpoints.get("connections:jane-doe").unwrap();
    assert_eq!(checkpoint.last_cursor, Some(Cursor::new(2)));
    assert_eq!(checkpoint.records_emitted, 6);
    assert!(checkpoint.exhausted);
}

#[tokio::test]
async fn test_cancel_on_profile_page_completes_the_profile() {
    let site = jane_site();
    let mut config = test_config();
    config.crawl.profile = true;
    config.crawl.connections = false;
    let h = cancelling_harness(config.clone(), &["jane-doe"], 1);

    let first = h.coordinator.run(FakeDriver::new(&site)).await.unwrap();
    assert!(first.cancelled);
    let checkpoint = h.checkpoints.get("profile:jane-doe").unwrap();
    assert_eq!(checkpoint.last_cursor, Some(Cursor::new(0)));
    assert!(checkpoint.exhausted);

    let second = rerun(config, &["jane-doe"], &h)
        .run(FakeDriver::new(&site))
        .await
        .unwrap();

    assert_eq!(second.already_done, vec!["profile:jane-doe".to_string()]);
    let records = h.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, RecordKind::Profile);
}

#[tokio::test]
async fn test_cancel_on_last_list_page_marks_target_complete() {
    let site = jane_site();
    let h = cancelling_harness(test_config(), &["jane-doe"], 6);

    let first = h.coordinator.run(FakeDriver::new(&site)).await.unwrap();
    assert!(first.cancelled);
    let checkpoint = h.checkpoints.get("connections:jane-doe").unwrap();
    assert_eq!(checkpoint.last_cursor, Some(Cursor::new(2)));
    assert!(checkpoint.exhausted);

    let visits_before = site.lock().unwrap().gotos.len();
    let second = rerun(test_config(), &["jane-doe"], &h)
        .run(FakeDriver::new(&site))
        .await
        .unwrap();

    assert_eq!(second.records, 0);
    assert_eq!(second.already_done, vec!["connections:jane-doe".to_string()]);
    assert_eq!(h.sink.records().len(), 6);
    let searched_again = site.lock().unwrap().gotos[visits_before..]
        .iter()
        .any(|u| u.contains("/search/"));
    assert!(!searched_again);
}

#[tokio::test]
async fn test_cancel_on_last_grown_page_marks_target_complete() {
    let mut state = SiteState::default();
    state.own_connections = people("mine", 1, 5).remove(0);
    let site = Arc::new(Mutex::new(state));
    let h = cancelling_harness(test_config(), &[OWN_SLUG], 5);

    let first = h.coordinator.run(FakeDriver::new(&site)).await.unwrap();
    assert!(first.cancelled);
    let checkpoint = h.checkpoints.get("connections:me-myself").unwrap();
    assert_eq!(checkpoint.last_cursor, Some(Cursor::new(2)));
    assert!(checkpoint.exhausted);

    let second = rerun(test_config(), &[OWN_SLUG], &h)
        .run(FakeDriver::new(&site))
        .await
        .unwrap();
    assert_eq!(second.records, 0);
    assert_eq!(h.sink.records().len(), 5);
}

#[tokio::test]
async fn test_own_connections_resume_replays_growth() {
    let mut state = SiteState::default();
    state.own_connections = people("mine", 1, 5).remove(0);
    let site = Arc::new(Mutex::new(state));
    let h = harness(test_config(), request(&[OWN_SLUG]));
    let mut committed = Checkpoint::empty("connections:me-myself");
    committed.last_cursor = Some(Cursor::new(1));
    committed.records_emitted = 4;
    h.checkpoints.save(&committed).unwrap();

    let report = h.coordinator.run(FakeDriver::new(&site)).await.unwrap();

    let records = h.sink.records();
    assert_eq!(names(&records), vec!["Person 4"]);
    assert_eq!(records[0].cursor, Cursor::new(2));
    assert_eq!(records[0].text("slug"), Some("mine-4"));
    assert_eq!(report.pages, 1);

    let list_visits = site
        .lock()
        .unwrap()
        .gotos
        .iter()
        .filter(|u| u.contains("/mynetwork/"))
        .count();
    assert_eq!(list_visits, 1);

    let checkpoint = h.checkpoints.get("connections:me-myself").unwrap();
    assert_eq!(checkpoint.last_cursor, Some(Cursor::new(2)));
    assert_eq!(checkpoint.records_emitted, 5);
    assert!(checkpoint.exhausted);
}

#[tokio::test]
async fn test_advance_after_exhaustion_is_rejected() {
    let site = jane_site();
    let config = test_config();
    let site_map = SiteMap::new(BASE).unwrap();
    let sessions = SessionManager::new(
        &config,
        site_map.clone(),
        Credentials::new(EMAIL, PASSWORD),
        ChallengeMode::Unattended,
    );
    let navigator = Navigator::new(&config, site_map);
    let mut session = sessions.open(FakeDriver::new(&site)).await.unwrap();
    let mut target = Target::profile("jane-doe");

    let page = navigator
        .load(&sessions, &mut session, &mut target)
        .await
        .unwrap();
    let (cursor, has_more) = navigator
        .advance(&sessions, &mut session, &mut target, &page)
        .await
        .unwrap();
    assert_eq!(cursor, Cursor::new(1));
    assert!(!has_more);
    assert_eq!(target.state(), NavState::Exhausted);

    let again = navigator
        .advance(&sessions, &mut session, &mut target, &page)
        .await;
    assert!(matches!(
        again,
        Err(CrawlError::InvalidTransition {
            from: NavState::Exhausted,
            to: NavState::Paginating
        })
    ));
    assert_eq!(target.cursor(), Cursor::new(1));
}

#[tokio::test]
async fn test_session_lost_while_advancing_names_advance_stage() {
    let mut state = SiteState::default();
    state.own_connections = people("mine", 1, 5).remove(0);
    // One read for the feed identity, one for the first page
    state.wall_after_reads = Some(2);
    let site = Arc::new(Mutex::new(state));
    let mut config = test_config();
    config.crawl.max_reauth = 0;
    let h = harness(config, request(&[OWN_SLUG]));

    let failure = h
        .coordinator
        .run(FakeDriver::new(&site))
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Advance);
    assert!(matches!(failure.source, CrawlError::SessionInvalid { .. }));
    assert_eq!(failure.last_cursor, Some(Cursor::new(0)));
    assert_eq!(h.sink.records().len(), 2);
}

#[tokio::test]
async fn test_shared_rate_controller_sees_session_friction() {
    let site = jane_site();
    site.lock()
        .unwrap()
        .timeouts
        .push(("page=2".to_string(), 2));
    let mut config = test_config();
    config.rate.ceiling_ms = 8;
    config.rate.decay_after = 100;
    let shared = RateController::new(&config.rate);
    let h = harness(config.clone(), request(&["jane-doe"]));
    let coordinator = h.coordinator.with_shared_rate(shared.clone());

    coordinator.run(FakeDriver::new(&site)).await.unwrap();

    // Two timeouts on page 2 back off from zero to 2ms, then 4ms
    assert_eq!(shared.current_delay(), Duration::from_millis(4));

    let other = Coordinator::new(
        config.clone(),
        request(&["jane-doe"]),
        Arc::new(MemorySink::default()),
        Arc::new(MemoryCheckpoints::default()),
    )
    .unwrap();
    other.run(FakeDriver::new(&jane_site())).await.unwrap();
    assert_eq!(shared.current_delay(), Duration::from_millis(4));
}

#[tokio::test]
async fn test_saved_session_is_reused() {
    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());

    let first_site = jane_site();
    let first = harness(test_config(), request(&["jane-doe"]));
    let first = first.coordinator.with_session_store(storage.clone());
    first.run(FakeDriver::new(&first_site)).await.unwrap();
    assert_eq!(first_site.lock().unwrap().login_submissions, 1);

    let second_site = jane_site();
    let mut config = test_config();
    config.crawl.profile = true;
    config.crawl.connections = false;
    let second = harness(config, request(&["jane-doe"]));
    let sink = second.sink.clone();
    let second = second.coordinator.with_session_store(storage.clone());
    second.run(FakeDriver::new(&second_site)).await.unwrap();

    assert_eq!(second_site.lock().unwrap().login_submissions, 0);
    assert_eq!(sink.records().len(), 1);
}

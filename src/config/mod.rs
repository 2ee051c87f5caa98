//! Configuration module
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every key has a default, so a crawl can run without any file at all.
//!
//! # Example
//!
//! ```no_run
//! use linkedin_crawl::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("crawl.toml")).unwrap();
//! println!("Navigation attempts: {}", config.retry.navigation_attempts);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    BrowserConfig, ChallengeMode, Config, CrawlConfig, CrawlRequest, Credentials, OutputConfig,
    RateConfig, RetryConfig, SiteConfig, TimeoutConfig,
};

pub use parser::{load_config, parse_config};
pub use validation::{validate, validate_profile_slug};

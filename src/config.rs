use std::env;
use std::time::Duration;

/// Default upstream CMS used in dev mode
const DEV_UPSTREAM_URL: &str = "https://tsonglyricsapp.blogspot.com";

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// Public site URL, used for sitemap `<loc>` entries
    pub base_url: String,
    /// Upstream CMS base URL (serves `/feeds/posts/default`)
    pub upstream_url: String,
    pub is_dev: bool,
    /// Shared secret required by every control endpoint
    pub revalidate_secret: String,
    /// Host of the pre-generated static snapshots (`{base}/songs/{slug}.json`)
    pub snapshot_base_url: String,
    /// Dynamic blob API (`{url}/api/songs/{slug}`), consulted only when enabled
    pub blob_api_url: Option<String>,
    /// Feature flag for the blob API tier (default: off)
    pub blob_tier_enabled: bool,
    /// Maximum number of entries held by the date-based cache
    pub cache_max_entries: usize,
    /// Background sweep interval in seconds (0 disables the sweeper)
    pub cache_sweep_secs: u64,
    /// Jitter ratio applied to date-based TTLs (0.1 = ±10%)
    pub ttl_jitter: f64,
    /// TTL for cache entries not tied to a publish date
    pub default_ttl_secs: u64,
    /// TTL of the accumulated song list used for sitemaps
    pub song_list_ttl_secs: u64,
    /// Rows requested per upstream page during batch traversal
    pub upstream_page_size: usize,
    /// Lifetime of rendered responses in the output cache
    pub output_cache_ttl_secs: u64,
    /// Per-IP requests per minute (0 disables rate limiting)
    pub rate_limit_rpm: u32,
}

impl Config {
    /// Load configuration from environment variables
    /// In DEV mode, provides sensible defaults. In PROD mode, all vars are required.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        // Check if running in dev mode
        let is_dev = env::var("DEV_MODE")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        // Port: required in prod, defaults to 3000 in dev
        let port = if is_dev {
            env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?
        } else {
            env::var("PORT")
                .map_err(|_| "PORT is required in production")?
                .parse()?
        };

        // Base URL: required in prod, defaults to localhost in dev
        let base_url = if is_dev {
            env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
        } else {
            env::var("BASE_URL").map_err(|_| "BASE_URL is required in production")?
        };

        let upstream_url = if is_dev {
            env::var("UPSTREAM_URL").unwrap_or_else(|_| DEV_UPSTREAM_URL.to_string())
        } else {
            env::var("UPSTREAM_URL").map_err(|_| "UPSTREAM_URL is required in production")?
        };

        let revalidate_secret = if is_dev {
            env::var("REVALIDATE_SECRET").unwrap_or_else(|_| "dev-secret".to_string())
        } else {
            env::var("REVALIDATE_SECRET")
                .map_err(|_| "REVALIDATE_SECRET is required in production")?
        };
        if revalidate_secret.is_empty() {
            return Err("REVALIDATE_SECRET must not be empty".into());
        }

        // Snapshots are served next to the site unless pointed elsewhere
        let snapshot_base_url = env::var("SNAPSHOT_BASE_URL").unwrap_or_else(|_| base_url.clone());

        let blob_api_url = env::var("BLOB_API_URL").ok().filter(|s| !s.is_empty());
        let blob_tier_enabled = env::var("BLOB_TIER_ENABLED")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        let cache_max_entries = parse_or("CACHE_MAX_ENTRIES", 200usize).max(1);
        let cache_sweep_secs = parse_or("CACHE_SWEEP_SECS", 300u64);
        let ttl_jitter = parse_or("TTL_JITTER", 0.1f64).clamp(0.0, 0.5);
        let default_ttl_secs = parse_or("DEFAULT_TTL_SECS", 300u64);
        let song_list_ttl_secs = parse_or("SONG_LIST_TTL_SECS", 3600u64);
        let upstream_page_size = parse_or("UPSTREAM_PAGE_SIZE", 150usize).max(1);
        let output_cache_ttl_secs = parse_or("OUTPUT_CACHE_TTL_SECS", 2_592_000u64);
        let rate_limit_rpm = parse_or("RATE_LIMIT_RPM", 0u32);

        Ok(Config {
            port,
            base_url,
            upstream_url,
            is_dev,
            revalidate_secret,
            snapshot_base_url,
            blob_api_url,
            blob_tier_enabled,
            cache_max_entries,
            cache_sweep_secs,
            ttl_jitter,
            default_ttl_secs,
            song_list_ttl_secs,
            upstream_page_size,
            output_cache_ttl_secs,
            rate_limit_rpm,
        })
    }

    /// Sweep interval, or `None` when the sweeper is disabled
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.cache_sweep_secs > 0).then(|| Duration::from_secs(self.cache_sweep_secs))
    }

    /// Blob API URL if the tier is both enabled and configured
    pub fn active_blob_api(&self) -> Option<&str> {
        if self.blob_tier_enabled {
            self.blob_api_url.as_deref()
        } else {
            None
        }
    }
}

/// Parse an optional numeric env var, falling back on absence or garbage
fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Config for unit tests elsewhere in the crate; never reads the environment.
    pub(crate) fn test_config() -> Config {
        Config {
            port: 0,
            base_url: "http://localhost:3000".to_string(),
            upstream_url: "http://127.0.0.1:9".to_string(),
            is_dev: false,
            revalidate_secret: "test-secret".to_string(),
            snapshot_base_url: "http://127.0.0.1:9".to_string(),
            blob_api_url: None,
            blob_tier_enabled: false,
            cache_max_entries: 200,
            cache_sweep_secs: 0,
            ttl_jitter: 0.0,
            default_ttl_secs: 300,
            song_list_ttl_secs: 3600,
            upstream_page_size: 150,
            output_cache_ttl_secs: 2_592_000,
            rate_limit_rpm: 0,
        }
    }

    /// Serialize all env-var tests to prevent races between parallel test threads.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Set env vars, run `f`, then restore original state.
    ///
    /// `set` holds vars to set, `unset` vars to remove before running `f`.
    fn with_env(set: &[(&str, &str)], unset: &[&str], f: impl FnOnce()) {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());

        // Save state for all touched vars
        let save_set: Vec<(&str, Option<String>)> = set
            .iter()
            .map(|(k, _)| (*k, std::env::var(k).ok()))
            .collect();
        let save_unset: Vec<(&str, Option<String>)> =
            unset.iter().map(|k| (*k, std::env::var(k).ok())).collect();

        for (k, v) in set {
            // SAFETY: serialized by ENV_LOCK, no other thread touches env vars concurrently.
            unsafe { std::env::set_var(k, v) };
        }
        for k in unset {
            unsafe { std::env::remove_var(k) };
        }

        f();

        // Restore
        for (k, old) in save_set.into_iter().chain(save_unset) {
            match old {
                Some(v) => unsafe { std::env::set_var(k, v) },
                None => unsafe { std::env::remove_var(k) },
            }
        }
    }

    const ALL_VARS: &[&str] = &[
        "PORT",
        "BASE_URL",
        "UPSTREAM_URL",
        "REVALIDATE_SECRET",
        "SNAPSHOT_BASE_URL",
        "BLOB_API_URL",
        "BLOB_TIER_ENABLED",
        "CACHE_MAX_ENTRIES",
        "CACHE_SWEEP_SECS",
        "TTL_JITTER",
        "DEFAULT_TTL_SECS",
        "SONG_LIST_TTL_SECS",
        "UPSTREAM_PAGE_SIZE",
        "OUTPUT_CACHE_TTL_SECS",
        "RATE_LIMIT_RPM",
    ];

    #[test]
    fn dev_mode_uses_defaults() {
        with_env(&[("DEV_MODE", "true")], ALL_VARS, || {
            let config = Config::from_env().expect("should succeed in dev mode");
            assert!(config.is_dev);
            assert_eq!(config.port, 3000);
            assert_eq!(config.base_url, "http://localhost:3000");
            assert_eq!(config.upstream_url, DEV_UPSTREAM_URL);
            assert_eq!(config.revalidate_secret, "dev-secret");
            assert_eq!(config.snapshot_base_url, "http://localhost:3000");
            assert!(config.blob_api_url.is_none());
            assert!(!config.blob_tier_enabled);
            assert_eq!(config.cache_max_entries, 200);
            assert_eq!(config.cache_sweep_secs, 300);
            assert_eq!(config.ttl_jitter, 0.1);
            assert_eq!(config.song_list_ttl_secs, 3600);
            assert_eq!(config.upstream_page_size, 150);
            assert_eq!(config.rate_limit_rpm, 0);
        });
    }

    #[test]
    fn prod_mode_requires_port() {
        with_env(&[], &["DEV_MODE", "PORT", "BASE_URL", "UPSTREAM_URL"], || {
            let result = Config::from_env();
            assert!(result.is_err(), "Should fail without PORT in prod mode");
        });
    }

    #[test]
    fn prod_mode_requires_upstream_url() {
        with_env(
            &[("PORT", "8080"), ("BASE_URL", "https://example.com")],
            &["DEV_MODE", "UPSTREAM_URL"],
            || {
                let result = Config::from_env();
                assert!(result.is_err(), "Should fail without UPSTREAM_URL in prod mode");
            },
        );
    }

    #[test]
    fn prod_mode_requires_secret() {
        with_env(
            &[
                ("PORT", "8080"),
                ("BASE_URL", "https://example.com"),
                ("UPSTREAM_URL", "https://cms.example.com"),
            ],
            &["DEV_MODE", "REVALIDATE_SECRET"],
            || {
                let result = Config::from_env();
                assert!(result.is_err(), "Should fail without REVALIDATE_SECRET");
            },
        );
    }

    #[test]
    fn empty_secret_is_rejected() {
        with_env(
            &[("DEV_MODE", "true"), ("REVALIDATE_SECRET", "")],
            &[],
            || {
                assert!(Config::from_env().is_err());
            },
        );
    }

    #[test]
    fn snapshot_base_defaults_to_base_url() {
        with_env(
            &[("DEV_MODE", "true"), ("BASE_URL", "https://www.example.com")],
            &["SNAPSHOT_BASE_URL"],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.snapshot_base_url, "https://www.example.com");
            },
        );
    }

    #[test]
    fn blob_tier_requires_flag_and_url() {
        with_env(
            &[("DEV_MODE", "true"), ("BLOB_API_URL", "https://blob.example.com")],
            &["BLOB_TIER_ENABLED"],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.active_blob_api(), None, "flag defaults to off");
            },
        );

        with_env(
            &[
                ("DEV_MODE", "true"),
                ("BLOB_API_URL", "https://blob.example.com"),
                ("BLOB_TIER_ENABLED", "true"),
            ],
            &[],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.active_blob_api(), Some("https://blob.example.com"));
            },
        );
    }

    #[test]
    fn garbage_numbers_fall_back_to_defaults() {
        with_env(
            &[
                ("DEV_MODE", "true"),
                ("CACHE_MAX_ENTRIES", "lots"),
                ("TTL_JITTER", "2.0"),
            ],
            &[],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.cache_max_entries, 200);
                assert_eq!(config.ttl_jitter, 0.5, "jitter is clamped");
            },
        );
    }

    #[test]
    fn zero_sweep_disables_sweeper() {
        with_env(&[("DEV_MODE", "true"), ("CACHE_SWEEP_SECS", "0")], &[], || {
            let config = Config::from_env().unwrap();
            assert!(config.sweep_interval().is_none());
        });
    }
}

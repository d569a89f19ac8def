use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    errors::Error,
    reconnect::ReconnectPolicy,
    transport::{Browser, ConnectOptions},
    Result,
};

/// Typed configuration, read from the environment (plus `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Credentials
    pub session_id: Option<String>,
    pub session_dir: PathBuf,

    // Model
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub ai_timeout: Duration,

    // Session lifecycle
    pub heartbeat_interval: Duration,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// Consecutive failed attempts before giving up (0 = never give up).
    pub reconnect_max_attempts: u32,

    // Transport bridge
    pub bridge_command: PathBuf,
    pub bridge_args: Vec<String>,
    pub browser_name: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);
        let get_u64 = |key: &str| -> Result<Option<u64>> {
            get(key)
                .map(|v| {
                    v.trim().parse::<u64>().map_err(|e| {
                        Error::Config(format!("{key} must be a non-negative integer: {e}"))
                    })
                })
                .transpose()
        };

        let session_id = get("SESSION_ID").map(|s| s.trim().to_string());
        let session_dir = PathBuf::from(get("SESSION_DIR").unwrap_or_else(|| "./session".into()));

        let gemini_api_key = get("GEMINI_API_KEY").map(|s| s.trim().to_string());
        let gemini_model = get("GEMINI_MODEL").unwrap_or_else(|| "gemini-2.5-flash".to_string());
        let ai_timeout = Duration::from_millis(get_u64("AI_TIMEOUT_MS")?.unwrap_or(60_000));

        let heartbeat_interval =
            Duration::from_millis(get_u64("HEARTBEAT_INTERVAL_MS")?.unwrap_or(15_000));
        if heartbeat_interval.is_zero() {
            return Err(Error::Config(
                "HEARTBEAT_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }

        let reconnect_base_delay =
            Duration::from_millis(get_u64("RECONNECT_BASE_DELAY_MS")?.unwrap_or(1_000));
        let reconnect_max_delay =
            Duration::from_millis(get_u64("RECONNECT_MAX_DELAY_MS")?.unwrap_or(30_000))
                .max(reconnect_base_delay);
        let reconnect_max_attempts = get_u64("RECONNECT_MAX_ATTEMPTS")?
            .unwrap_or(10)
            .min(u64::from(u32::MAX)) as u32;

        let bridge_command = PathBuf::from(get("BRIDGE_COMMAND").unwrap_or_else(|| "node".into()));
        let bridge_args = parse_csv(get("BRIDGE_ARGS").unwrap_or_else(|| "bridge.js".into()));
        let browser_name = get("BROWSER_NAME").unwrap_or_else(|| "SafariVybe".to_string());

        Ok(Self {
            session_id,
            session_dir,
            gemini_api_key,
            gemini_model,
            ai_timeout,
            heartbeat_interval,
            reconnect_base_delay,
            reconnect_max_delay,
            reconnect_max_attempts,
            bridge_command,
            bridge_args,
            browser_name,
        })
    }

    /// `true` when credentials come from `SESSION_ID` (deployment mode).
    pub fn is_seeded_externally(&self) -> bool {
        self.session_id.is_some()
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: self.reconnect_base_delay,
            max_delay: self.reconnect_max_delay,
            max_attempts: (self.reconnect_max_attempts > 0).then_some(self.reconnect_max_attempts),
        }
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            print_pairing_code: !self.is_seeded_externally(),
            browser: Browser::mac_os(self.browser_name.clone()),
            sync_full_history: false,
        }
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim().trim_start_matches("export ").trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, unquote(v.trim()));
    }
}

fn unquote(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return &val[1..val.len() - 1];
    }
    val
}

fn parse_csv(v: String) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_match_local_mode() {
        let cfg = from_pairs(&[]).unwrap();
        assert_eq!(cfg.session_id, None);
        assert_eq!(cfg.session_dir, PathBuf::from("./session"));
        assert_eq!(cfg.gemini_api_key, None);
        assert_eq!(cfg.gemini_model, "gemini-2.5-flash");
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(cfg.bridge_args, vec!["bridge.js".to_string()]);

        let opts = cfg.connect_options();
        assert!(opts.print_pairing_code);
        assert!(!opts.sync_full_history);
        assert_eq!(opts.browser, Browser::mac_os("SafariVybe"));
    }

    #[test]
    fn blank_values_are_unset() {
        let cfg = from_pairs(&[("SESSION_ID", "  "), ("GEMINI_API_KEY", "")]).unwrap();
        assert!(!cfg.is_seeded_externally());
        assert!(cfg.gemini_api_key.is_none());
    }

    #[test]
    fn session_id_disables_pairing_code() {
        let cfg = from_pairs(&[("SESSION_ID", " eyJhIjoxfQ== ")]).unwrap();
        assert_eq!(cfg.session_id.as_deref(), Some("eyJhIjoxfQ=="));
        assert!(!cfg.connect_options().print_pairing_code);
    }

    #[test]
    fn reconnect_policy_zero_attempts_means_unbounded() {
        let cfg = from_pairs(&[
            ("RECONNECT_MAX_ATTEMPTS", "0"),
            ("RECONNECT_BASE_DELAY_MS", "500"),
            ("RECONNECT_MAX_DELAY_MS", "100"),
        ])
        .unwrap();
        let policy = cfg.reconnect_policy();
        assert_eq!(policy.max_attempts, None);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        // Max is never below base.
        assert_eq!(policy.max_delay, Duration::from_millis(500));
    }

    #[test]
    fn invalid_numbers_are_config_errors() {
        let err = from_pairs(&[("AI_TIMEOUT_MS", "soon")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = from_pairs(&[("HEARTBEAT_INTERVAL_MS", "0")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn bridge_args_are_comma_separated() {
        let cfg = from_pairs(&[
            ("BRIDGE_COMMAND", "/usr/bin/node"),
            ("BRIDGE_ARGS", "bridge/index.js, --quiet ,"),
        ])
        .unwrap();
        assert_eq!(cfg.bridge_command, PathBuf::from("/usr/bin/node"));
        assert_eq!(cfg.bridge_args, vec!["bridge/index.js", "--quiet"]);
    }

    #[test]
    fn unquote_strips_matching_quotes_only() {
        assert_eq!(unquote("\"abc\""), "abc");
        assert_eq!(unquote("'abc'"), "abc");
        assert_eq!(unquote("\"abc'"), "\"abc'");
        assert_eq!(unquote("\""), "\"");
    }
}

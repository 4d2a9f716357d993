#![forbid(unsafe_code)]

//! Configuration for the bilisub tools.
//!
//! Credentials, extra request headers and tunables live in a small TOML file.
//! Cookie values can also come from the environment, which takes precedence
//! over the file so secrets do not have to be written to disk.

use crate::batch::DEFAULT_MAX_WORKERS;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    env, fmt, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_CONFIG_PATH: &str = "bilisub.toml";
pub const CONFIG_PATH_ENV: &str = "BILISUB_CONFIG";
pub const DEFAULT_API_BASE: &str = "https://api.bilibili.com";
pub const DEFAULT_DELAY_MIN: f64 = 1.0;
pub const DEFAULT_DELAY_MAX: f64 = 3.0;
pub const DEFAULT_SEARCH_PAGE_SIZE: u32 = 20;

pub const SESSDATA: &str = "SESSDATA";
pub const BILI_JCT: &str = "bili_jct";
pub const DEDE_USER_ID: &str = "DedeUserID";

/// Session cookies every request must carry, paired with the env var that
/// overrides each one.
const REQUIRED_COOKIES: [(&str, &str); 3] = [
    (SESSDATA, "BILI_SESSDATA"),
    (BILI_JCT, "BILI_JCT"),
    (DEDE_USER_ID, "BILI_DEDEUSERID"),
];

/// Values shipped in the sample config that were never filled in.
const PLACEHOLDER_PREFIXES: [&str; 3] = ["请在这里", "YOUR_", "<"];

/// Session identity attached to every outbound request.
///
/// Only constructible through [`Credentials::new`], so a value of this type
/// always carries the three session cookies.
#[derive(Clone)]
pub struct Credentials {
    cookies: BTreeMap<String, String>,
    headers: BTreeMap<String, String>,
}

impl Credentials {
    pub fn new(
        cookies: BTreeMap<String, String>,
        headers: BTreeMap<String, String>,
    ) -> Result<Self> {
        for (name, env_key) in REQUIRED_COOKIES {
            let value = cookies.get(name).map(|value| value.trim()).unwrap_or("");
            if value.is_empty() || is_placeholder(value) {
                bail!(
                    "cookie `{name}` is missing or still set to a placeholder. \
                     Log in to bilibili.com in a browser, open the developer tools, \
                     copy the `{name}` cookie from any request and put it under \
                     [cookies] in {DEFAULT_CONFIG_PATH} (or export {env_key})"
                );
            }
        }
        Ok(Self { cookies, headers })
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// `Cookie` header value: the session cookies first, then any extras.
    pub fn cookie_header(&self) -> String {
        let required = REQUIRED_COOKIES.iter().map(|(name, _)| *name);
        let extras = self
            .cookies
            .keys()
            .map(String::as_str)
            .filter(|name| !REQUIRED_COOKIES.iter().any(|(required, _)| required == name));
        required
            .chain(extras)
            .filter_map(|name| {
                self.cookies
                    .get(name)
                    .map(|value| format!("{name}={}", value.trim()))
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("cookies", &self.cookies.keys().collect::<Vec<_>>())
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn is_placeholder(value: &str) -> bool {
    PLACEHOLDER_PREFIXES
        .iter()
        .any(|prefix| value.starts_with(prefix))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub request_delay_min: f64,
    pub request_delay_max: f64,
    pub search_page_size: u32,
    pub max_workers: usize,
    pub api_base: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            request_delay_min: DEFAULT_DELAY_MIN,
            request_delay_max: DEFAULT_DELAY_MAX,
            search_page_size: DEFAULT_SEARCH_PAGE_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub credentials: Credentials,
    pub settings: Settings,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    cookies: BTreeMap<String, String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    settings: SettingsFile,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    request_delay_min: Option<f64>,
    request_delay_max: Option<f64>,
    search_page_size: Option<u32>,
    max_workers: Option<usize>,
    api_base: Option<String>,
}

pub fn load_config() -> Result<AppConfig> {
    resolve_config(ConfigOverrides::default())
}

/// Reads the config file (explicit path, then `BILISUB_CONFIG`, then
/// `bilisub.toml`) and layers env overrides on top.
///
/// A missing default file is fine as long as the environment supplies the
/// credentials; a missing file that was asked for explicitly is an error.
pub fn resolve_config(overrides: ConfigOverrides) -> Result<AppConfig> {
    let explicit = overrides
        .config_path
        .or_else(|| env_var_string(CONFIG_PATH_ENV).map(PathBuf::from));
    let file = match &explicit {
        Some(path) => {
            if !path.exists() {
                bail!("config file {} does not exist", path.display());
            }
            read_config_file(path)?
        }
        None => {
            let path = Path::new(DEFAULT_CONFIG_PATH);
            if path.exists() {
                read_config_file(path)?
            } else {
                ConfigFile::default()
            }
        }
    };
    build_config(file, env_var_string)
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Parsing {}", path.display()))
}

fn build_config(
    file: ConfigFile,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<AppConfig> {
    let ConfigFile {
        mut cookies,
        headers,
        settings,
    } = file;

    for (name, env_key) in REQUIRED_COOKIES {
        if let Some(value) = env_lookup(env_key) {
            cookies.insert(name.to_string(), value);
        }
    }

    let defaults = Settings::default();
    let request_delay_min = settings
        .request_delay_min
        .unwrap_or(defaults.request_delay_min);
    let settings = Settings {
        request_delay_min,
        request_delay_max: settings
            .request_delay_max
            .unwrap_or_else(|| defaults.request_delay_max.max(request_delay_min)),
        search_page_size: settings
            .search_page_size
            .filter(|size| *size > 0)
            .unwrap_or(defaults.search_page_size),
        max_workers: settings
            .max_workers
            .filter(|workers| *workers > 0)
            .unwrap_or(defaults.max_workers),
        api_base: settings
            .api_base
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.api_base),
    };

    Ok(AppConfig {
        credentials: Credentials::new(cookies, headers)?,
        settings,
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FULL_CONFIG: &str = r#"
        [cookies]
        SESSDATA = "sess"
        bili_jct = "jct"
        DedeUserID = "42"

        [headers]
        User-Agent = "custom-agent"

        [settings]
        request_delay_min = 0.5
        request_delay_max = 2.0
        search_page_size = 30
        max_workers = 5
        api_base = "http://localhost:9000/"
    "#;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn parse(contents: &str) -> ConfigFile {
        toml::from_str(contents).unwrap()
    }

    fn cookies(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn build_config_reads_every_section() {
        let config = build_config(parse(FULL_CONFIG), |_| None).unwrap();
        assert_eq!(config.credentials.cookie(SESSDATA), Some("sess"));
        assert_eq!(
            config.credentials.headers().get("User-Agent").map(String::as_str),
            Some("custom-agent")
        );
        assert_eq!(config.settings.request_delay_min, 0.5);
        assert_eq!(config.settings.request_delay_max, 2.0);
        assert_eq!(config.settings.search_page_size, 30);
        assert_eq!(config.settings.max_workers, 5);
        assert_eq!(config.settings.api_base, "http://localhost:9000");
    }

    #[test]
    fn build_config_defaults_missing_settings() {
        let file = parse(
            r#"
            [cookies]
            SESSDATA = "a"
            bili_jct = "b"
            DedeUserID = "c"
            "#,
        );
        let config = build_config(file, |_| None).unwrap();
        assert_eq!(config.settings, Settings::default());
    }

    #[test]
    fn build_config_raises_default_max_delay_to_min() {
        let file = parse(
            r#"
            [cookies]
            SESSDATA = "a"
            bili_jct = "b"
            DedeUserID = "c"

            [settings]
            request_delay_min = 5.0
            "#,
        );
        let config = build_config(file, |_| None).unwrap();
        assert_eq!(config.settings.request_delay_max, 5.0);
    }

    #[test]
    fn build_config_prefers_env_over_file() {
        let config = build_config(parse(FULL_CONFIG), |key| {
            (key == "BILI_SESSDATA").then(|| "from-env".to_string())
        })
        .unwrap();
        assert_eq!(config.credentials.cookie(SESSDATA), Some("from-env"));
        assert_eq!(config.credentials.cookie(BILI_JCT), Some("jct"));
    }

    #[test]
    fn build_config_accepts_env_only_credentials() {
        let config = build_config(ConfigFile::default(), |key| match key {
            "BILI_SESSDATA" => Some("s".into()),
            "BILI_JCT" => Some("j".into()),
            "BILI_DEDEUSERID" => Some("d".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.credentials.cookie(DEDE_USER_ID), Some("d"));
    }

    #[test]
    fn build_config_names_missing_cookie() {
        let file = parse(
            r#"
            [cookies]
            SESSDATA = "a"
            DedeUserID = "c"
            "#,
        );
        let err = build_config(file, |_| None).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("`bili_jct`"), "{message}");
        assert!(message.contains("BILI_JCT"), "{message}");
    }

    #[test]
    fn credentials_reject_placeholders() {
        for placeholder in ["请在这里填入SESSDATA", "YOUR_SESSDATA", "<sessdata>", "   "] {
            let err = Credentials::new(
                cookies(&[
                    (SESSDATA, placeholder),
                    (BILI_JCT, "j"),
                    (DEDE_USER_ID, "d"),
                ]),
                BTreeMap::new(),
            )
            .unwrap_err();
            assert!(err.to_string().contains("`SESSDATA`"));
        }
    }

    #[test]
    fn cookie_header_lists_session_cookies_first() {
        let credentials = Credentials::new(
            cookies(&[
                ("buvid3", "xyz"),
                (DEDE_USER_ID, "42"),
                (SESSDATA, " sess "),
                (BILI_JCT, "jct"),
            ]),
            BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(
            credentials.cookie_header(),
            "SESSDATA=sess; bili_jct=jct; DedeUserID=42; buvid3=xyz"
        );
    }

    #[test]
    fn credentials_debug_hides_values() {
        let credentials = Credentials::new(
            cookies(&[(SESSDATA, "secret"), (BILI_JCT, "j"), (DEDE_USER_ID, "d")]),
            BTreeMap::new(),
        )
        .unwrap();
        let debug = format!("{credentials:?}");
        assert!(debug.contains("SESSDATA"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn resolve_config_reads_explicit_path() {
        let file = make_config(FULL_CONFIG);
        let config = resolve_config(ConfigOverrides {
            config_path: Some(file.path().to_path_buf()),
        })
        .unwrap();
        assert_eq!(config.settings.max_workers, 5);
    }

    #[test]
    fn resolve_config_rejects_missing_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_config(ConfigOverrides {
            config_path: Some(dir.path().join("missing.toml")),
        })
        .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn read_config_file_reports_parse_errors() {
        let file = make_config("[cookies\nSESSDATA=");
        let err = read_config_file(file.path()).unwrap_err();
        assert!(err.to_string().starts_with("Parsing"));
    }
}

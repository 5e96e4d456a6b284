//! Configuration models for general and per-site settings.
//!
//! All per-site behavior (URL patterns, selectors, download command) is
//! externalized to YAML files; the rest of the crate is a generic
//! interpreter of these structures. Configs are loaded once per run and
//! immutable afterwards. Structural parse errors are fatal; beyond that
//! the config author is trusted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Filename of the general (non-site) configuration inside the config dir.
pub const GENERAL_CONFIG_FILE: &str = "config.yaml";

/// Ordered field-name to selector-spec mapping. Extraction runs in
/// declaration order.
pub type SelectorMap = IndexMap<String, SelectorSpec>;

/// General configuration shared by every site.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// User agents, one picked at random per request.
    pub user_agents: Vec<String>,
    pub sleep: SleepConfig,
    pub file_naming: FileNamingConfig,
    /// Terms that cause an item to be skipped when they appear in any
    /// extracted field.
    #[serde(default)]
    pub ignored: Vec<String>,
    /// Ordered destination list; the first entry is the active
    /// destination for a run.
    pub download_destinations: Vec<DestinationConfig>,
    #[serde(default)]
    pub vpn: Option<VpnConfig>,
    /// Extra headers sent with every fetch.
    #[serde(default)]
    pub default_headers: IndexMap<String, String>,
}

impl GeneralConfig {
    /// The active download destination (first in the ordered list).
    pub fn destination(&self) -> Result<&DestinationConfig> {
        self.download_destinations
            .first()
            .ok_or_else(|| Error::Config("no download destinations configured".to_string()))
    }
}

/// Delays between pipeline steps, in seconds.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SleepConfig {
    #[serde(default)]
    pub between_pages: f64,
    #[serde(default)]
    pub between_items: f64,
}

impl SleepConfig {
    pub fn page_delay(&self) -> Duration {
        Duration::from_secs_f64(self.between_pages.max(0.0))
    }

    pub fn item_delay(&self) -> Duration {
        Duration::from_secs_f64(self.between_items.max(0.0))
    }
}

/// Rules for turning an extracted title into a destination filename.
#[derive(Debug, Clone, Deserialize)]
pub struct FileNamingConfig {
    /// File extension including the dot, e.g. ".mp4".
    pub extension: String,
    /// Substrings stripped from titles before use as a filename.
    #[serde(default)]
    pub invalid_chars: Vec<String>,
}

/// A download destination: local directory or SMB share.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DestinationConfig {
    Local(LocalDestination),
    Smb(SmbDestination),
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalDestination {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmbDestination {
    pub server: String,
    pub share: String,
    pub username: String,
    pub password: String,
    /// Path within the share.
    pub path: String,
}

/// VPN command set. All commands take a `{vpn_bin}` placeholder and run
/// through the shell; failures are logged, never fatal.
#[derive(Debug, Clone, Deserialize)]
pub struct VpnConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub vpn_bin: String,
    #[serde(default)]
    pub start_cmd: String,
    #[serde(default)]
    pub stop_cmd: String,
    #[serde(default)]
    pub new_node_cmd: String,
    /// Seconds between egress rotations.
    #[serde(default = "default_new_node_time")]
    pub new_node_time: u64,
}

fn default_new_node_time() -> u64 {
    300
}

impl VpnConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.new_node_time)
    }
}

/// Per-site configuration, identified by the site key (its filename).
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    pub base_url: String,
    /// URL pattern per mode (video, search, category, ...). Each pattern
    /// is formatted with `{<mode>}` bound to the identifier, except
    /// `video` which binds `{video_id}`.
    pub modes: IndexMap<String, ModeConfig>,
    pub scrapers: ScrapersConfig,
    pub download: DownloadCommandConfig,
    /// Literal substring substitutions applied after standard URL
    /// escaping, for sites with nonstandard encoding (e.g. `%20` -> `+`).
    #[serde(default)]
    pub url_encoding_rules: IndexMap<String, String>,
    #[serde(default)]
    pub name_prefix: String,
    #[serde(default)]
    pub name_suffix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModeConfig {
    pub url_pattern: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrapersConfig {
    /// Selectors for listing pages.
    pub list: ListScraperConfig,
    /// Field specs for the detail page.
    pub detail: SelectorMap,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListScraperConfig {
    pub container: ContainerConfig,
    pub item: ItemConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
}

/// Results-container selectors, tried in order; sites may ship several
/// HTML templates for the same logical page.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerConfig {
    pub selector: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemConfig {
    pub selector: String,
    #[serde(default)]
    pub fields: SelectorMap,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaginationConfig {
    /// Hard cap on listing pages walked (absent = unlimited).
    #[serde(default)]
    pub max_pages: Option<u32>,
    /// Template for page N+1, receiving `{url_pattern}`, `{page}` and
    /// `{search}`. Used when the pager is predictable from the page
    /// number.
    #[serde(default)]
    pub subsequent_pages: Option<String>,
    /// Fallback: discover the next-page link in the document.
    #[serde(default)]
    pub next_page: Option<NextPageConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NextPageConfig {
    pub selector: String,
    pub attribute: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadCommandConfig {
    /// Shell command template with `{destination_path}`, `{url}` and
    /// `{user_agent}` placeholders.
    pub command: String,
}

/// Normalized selector spec for one field.
///
/// Accepts either a bare selector string or a structured mapping with
/// `selector`, `attribute`, `json_key` and `multiple` keys. A structured
/// spec must supply at least one of selector/attribute; an attribute
/// with no selector reads the attribute off the current node itself.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawSelectorSpec")]
pub struct SelectorSpec {
    pub selector: Option<String>,
    pub attribute: Option<String>,
    /// Parse the extracted value as JSON and project this key out.
    pub json_key: Option<String>,
    /// Collect every match in document order instead of the first.
    pub multiple: bool,
}

impl SelectorSpec {
    /// Bare-selector form, mostly for tests.
    pub fn simple(selector: &str) -> Self {
        Self {
            selector: Some(selector.to_string()),
            attribute: None,
            json_key: None,
            multiple: false,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSelectorSpec {
    Simple(String),
    Structured {
        #[serde(default)]
        selector: Option<String>,
        #[serde(default)]
        attribute: Option<String>,
        #[serde(default)]
        json_key: Option<String>,
        #[serde(default)]
        multiple: bool,
    },
}

impl TryFrom<RawSelectorSpec> for SelectorSpec {
    type Error = String;

    fn try_from(raw: RawSelectorSpec) -> std::result::Result<Self, String> {
        match raw {
            RawSelectorSpec::Simple(selector) => Ok(SelectorSpec {
                selector: Some(selector),
                attribute: None,
                json_key: None,
                multiple: false,
            }),
            RawSelectorSpec::Structured {
                selector,
                attribute,
                json_key,
                multiple,
            } => {
                if selector.is_none() && attribute.is_none() {
                    return Err(
                        "selector spec must supply at least one of selector/attribute".to_string()
                    );
                }
                Ok(SelectorSpec {
                    selector,
                    attribute,
                    json_key,
                    multiple,
                })
            }
        }
    }
}

fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::ConfigIo {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| Error::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the general configuration from `<config_dir>/config.yaml`.
pub fn load_general(config_dir: &Path) -> Result<GeneralConfig> {
    load_yaml(&config_dir.join(GENERAL_CONFIG_FILE))
}

/// Load a site configuration from `<config_dir>/<site>.yaml`.
pub fn load_site(config_dir: &Path, site: &str) -> Result<SiteConfig> {
    load_yaml(&config_dir.join(format!("{site}.yaml")))
}

/// Paths of every site config in the directory (everything except the
/// general config).
pub fn site_config_paths(config_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(config_dir).map_err(|source| Error::ConfigIo {
        path: config_dir.to_path_buf(),
        source,
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension().is_some_and(|ext| ext == "yaml")
                && p.file_name().is_some_and(|n| n != GENERAL_CONFIG_FILE)
        })
        .collect();
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_spec_simple_string() {
        let spec: SelectorSpec = serde_yaml::from_str("\"h1.title\"").unwrap();
        assert_eq!(spec.selector.as_deref(), Some("h1.title"));
        assert!(spec.attribute.is_none());
        assert!(!spec.multiple);
    }

    #[test]
    fn test_selector_spec_structured() {
        let spec: SelectorSpec =
            serde_yaml::from_str("{selector: \"a.thumb\", attribute: href, multiple: true}")
                .unwrap();
        assert_eq!(spec.selector.as_deref(), Some("a.thumb"));
        assert_eq!(spec.attribute.as_deref(), Some("href"));
        assert!(spec.multiple);
    }

    #[test]
    fn test_selector_spec_attribute_only() {
        let spec: SelectorSpec = serde_yaml::from_str("{attribute: data-id}").unwrap();
        assert!(spec.selector.is_none());
        assert_eq!(spec.attribute.as_deref(), Some("data-id"));
    }

    #[test]
    fn test_selector_spec_rejects_empty_structured() {
        let result: std::result::Result<SelectorSpec, _> =
            serde_yaml::from_str("{json_key: contentUrl}");
        assert!(result.is_err());
    }

    #[test]
    fn test_destination_tagged_parse() {
        let yaml = r#"
- type: smb
  server: nas.local
  share: media
  username: scraper
  password: hunter2
  path: incoming
- type: local
  path: /tmp/downloads
"#;
        let dests: Vec<DestinationConfig> = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(&dests[0], DestinationConfig::Smb(s) if s.server == "nas.local"));
        assert!(matches!(&dests[1], DestinationConfig::Local(l) if l.path == "/tmp/downloads"));
    }

    #[test]
    fn test_site_config_parse_preserves_field_order() {
        let yaml = r##"
base_url: "https://example.com"
modes:
  search:
    url_pattern: "/search?q={search}"
scrapers:
  list:
    container:
      selector: [".results", "#videos"]
    item:
      selector: ".thumb"
      fields:
        title: ".title"
        url: {selector: a, attribute: href}
        duration: ".time"
    pagination:
      max_pages: 3
  detail:
    title: "h1"
download:
  command: "yt-dlp -o {destination_path} {url}"
"##;
        let site: SiteConfig = serde_yaml::from_str(yaml).unwrap();
        let fields: Vec<&String> = site.scrapers.list.item.fields.keys().collect();
        assert_eq!(fields, ["title", "url", "duration"]);
        assert_eq!(site.scrapers.list.pagination.max_pages, Some(3));
        assert!(site.scrapers.list.pagination.subsequent_pages.is_none());
    }

    #[test]
    fn test_vpn_defaults() {
        let vpn: VpnConfig = serde_yaml::from_str("{enabled: true, vpn_bin: mullvad}").unwrap();
        assert_eq!(vpn.new_node_time, 300);
        assert!(vpn.start_cmd.is_empty());
    }

    #[test]
    fn test_general_destination_empty_is_error() {
        let yaml = r#"
user_agents: ["UA"]
sleep: {}
file_naming:
  extension: ".mp4"
download_destinations: []
"#;
        let general: GeneralConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(general.destination().is_err());
    }
}

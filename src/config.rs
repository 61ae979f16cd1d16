use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use directories::BaseDirs;
use serde::de::Deserializer;
use serde::Deserialize;
use tracing::warn;

const CONFIG_FILE_NAME: &str = "config.toml";
const APP_NAME: &str = "panelctl";

#[derive(Debug, Clone)]
pub struct Config {
    pub config_path: PathBuf,
    pub api: ApiConfig,
    pub pages: Vec<PageConfig>,
    pub import: ImportConfig,
    pub notifications: NotificationConfig,
    pub refresh: RefreshConfig,
    pub keys: Keys,
    pub ui: UiConfig,
}

impl Config {
    pub fn page(&self, key: &str) -> Option<&PageConfig> {
        self.pages.iter().find(|page| page.key == key)
    }
}

// =============================================================================
// API Configuration
// =============================================================================

/// Where the admin API lives and how to talk to it
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Scheme + host (+ optional prefix), without a trailing slash
    pub base_url: String,
    /// Bearer token sent with every request
    pub token: Option<String>,
    /// Client-side timeout applied to every request
    pub timeout: Duration,
    /// Prefix for `/<resource>/<id>` CRUD paths
    pub resource_prefix: String,
    /// Endpoint listing campaigns for the import wizard
    pub campaigns_endpoint: String,
}

// =============================================================================
// Pages
// =============================================================================

/// One admin page: a table backed by a REST resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageConfig {
    pub key: String,
    pub title: String,
    /// Path of the page in the admin panel, used to infer the page key
    pub path: String,
    pub resource: String,
    pub bulk_delete_endpoint: String,
}

impl PageConfig {
    fn with_defaults(key: &str, title: &str, path: &str) -> Self {
        Self {
            key: key.to_string(),
            title: title.to_string(),
            path: path.to_string(),
            resource: key.to_string(),
            bulk_delete_endpoint: format!("/api/{}/bulk-delete", key),
        }
    }
}

fn default_pages() -> Vec<PageConfig> {
    vec![
        PageConfig::with_defaults("users", "USERS", "/admin/users"),
        PageConfig::with_defaults("comments", "BLOG COMMENTS", "/admin/blog/comments"),
        PageConfig::with_defaults("contacts", "CONTACTS", "/admin/contacts"),
    ]
}

// =============================================================================
// Import / Notifications / Refresh
// =============================================================================

#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Base endpoint; `/analyze`, `/preview` and `/execute` are appended
    pub endpoint: String,
    /// Accepted file extensions (lowercase, without dot)
    pub accepted_extensions: Vec<String>,
    /// Number of rows requested for the dry-run preview
    pub preview_rows: usize,
    /// Page refreshed after a successful import
    pub refresh_page: Option<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            endpoint: "/api/contacts/import".into(),
            accepted_extensions: vec![
                "csv".into(),
                "tsv".into(),
                "txt".into(),
                "xlsx".into(),
                "xls".into(),
            ],
            preview_rows: 5,
            refresh_page: Some("contacts".into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// How long a toast stays visible
    pub toast_duration: Duration,
    /// Number of notifications kept in the log
    pub history: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            toast_duration: Duration::from_millis(5000),
            history: 200,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Delay before the full-reload fallback kicks in
    pub reload_delay: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            reload_delay: Duration::from_millis(1500),
        }
    }
}

/// Expand ~ to home directory in paths
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = home::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

// =============================================================================
// UI
// =============================================================================

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub colors: UiColors,
}

#[derive(Debug, Clone)]
pub struct UiColors {
    pub border: RgbColor,
    pub selection_bg: RgbColor,
    pub selection_fg: RgbColor,
    pub separator: RgbColor,
    pub status_fg: RgbColor,
    pub status_bg: RgbColor,
    pub success: RgbColor,
    pub error: RgbColor,
    pub warning: RgbColor,
    pub info: RgbColor,
}

#[derive(Debug, Clone, Copy)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

// =============================================================================
// Key Bindings - Context-aware with multiple bindings per action
// =============================================================================

/// All key bindings organized by context
#[derive(Debug, Clone, Default)]
pub struct Keys {
    /// Keys that work whenever no modal is open
    pub global: GlobalKeys,
    /// Keys for the row table of the active page
    pub table: TableKeys,
    /// Keys for the confirmation dialog
    pub modal: ModalKeys,
    /// Keys for the import wizard
    pub wizard: WizardKeys,
}

#[derive(Debug, Clone)]
pub struct GlobalKeys {
    pub quit: Vec<String>,
    pub next_page: Vec<String>,
    pub prev_page: Vec<String>,
    pub reload: Vec<String>,
    pub import: Vec<String>,
    pub log: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TableKeys {
    pub next: Vec<String>,
    pub prev: Vec<String>,
    pub toggle: Vec<String>,
    pub toggle_all: Vec<String>,
    pub delete_selected: Vec<String>,
    pub delete_row: Vec<String>,
    pub refresh: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ModalKeys {
    pub confirm: Vec<String>,
    pub cancel: Vec<String>,
    pub close: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct WizardKeys {
    pub next: Vec<String>,
    pub prev: Vec<String>,
    pub cycle_next: Vec<String>,
    pub cycle_prev: Vec<String>,
    pub confirm: Vec<String>,
    pub back: Vec<String>,
    pub skip: Vec<String>,
    pub retry: Vec<String>,
    pub close: Vec<String>,
}

impl Default for GlobalKeys {
    fn default() -> Self {
        Self {
            quit: vec!["q".into()],
            next_page: vec!["Tab".into()],
            prev_page: vec!["Backtab".into()],
            reload: vec!["F5".into(), "R".into()],
            import: vec!["i".into()],
            log: vec!["L".into()],
        }
    }
}

impl Default for TableKeys {
    fn default() -> Self {
        Self {
            next: vec!["j".into(), "Down".into()],
            prev: vec!["k".into(), "Up".into()],
            toggle: vec!["Space".into()],
            toggle_all: vec!["a".into()],
            delete_selected: vec!["d".into()],
            delete_row: vec!["x".into()],
            refresh: vec!["r".into()],
        }
    }
}

impl Default for ModalKeys {
    fn default() -> Self {
        Self {
            confirm: vec!["y".into(), "Enter".into()],
            cancel: vec!["n".into(), "Escape".into()],
            close: vec!["q".into()],
        }
    }
}

impl Default for WizardKeys {
    fn default() -> Self {
        Self {
            next: vec!["j".into(), "Down".into()],
            prev: vec!["k".into(), "Up".into()],
            cycle_next: vec!["l".into(), "Right".into()],
            cycle_prev: vec!["h".into(), "Left".into()],
            confirm: vec!["Enter".into()],
            back: vec!["b".into()],
            skip: vec!["s".into()],
            retry: vec!["r".into()],
            close: vec!["Escape".into()],
        }
    }
}

// =============================================================================
// Serde deserialization types (support both single string and array)
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum KeyBinding {
    Single(String),
    Multiple(Vec<String>),
}

impl KeyBinding {
    fn into_vec(self) -> Vec<String> {
        match self {
            KeyBinding::Single(s) => vec![s],
            KeyBinding::Multiple(v) => v,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct KeysFile {
    global: GlobalKeysFile,
    table: TableKeysFile,
    modal: ModalKeysFile,
    wizard: WizardKeysFile,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GlobalKeysFile {
    quit: KeyBinding,
    next_page: KeyBinding,
    prev_page: KeyBinding,
    reload: KeyBinding,
    import: KeyBinding,
    log: KeyBinding,
}

impl Default for GlobalKeysFile {
    fn default() -> Self {
        let defaults = GlobalKeys::default();
        Self {
            quit: KeyBinding::Multiple(defaults.quit),
            next_page: KeyBinding::Multiple(defaults.next_page),
            prev_page: KeyBinding::Multiple(defaults.prev_page),
            reload: KeyBinding::Multiple(defaults.reload),
            import: KeyBinding::Multiple(defaults.import),
            log: KeyBinding::Multiple(defaults.log),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct TableKeysFile {
    next: KeyBinding,
    prev: KeyBinding,
    toggle: KeyBinding,
    toggle_all: KeyBinding,
    delete_selected: KeyBinding,
    delete_row: KeyBinding,
    refresh: KeyBinding,
}

impl Default for TableKeysFile {
    fn default() -> Self {
        let defaults = TableKeys::default();
        Self {
            next: KeyBinding::Multiple(defaults.next),
            prev: KeyBinding::Multiple(defaults.prev),
            toggle: KeyBinding::Multiple(defaults.toggle),
            toggle_all: KeyBinding::Multiple(defaults.toggle_all),
            delete_selected: KeyBinding::Multiple(defaults.delete_selected),
            delete_row: KeyBinding::Multiple(defaults.delete_row),
            refresh: KeyBinding::Multiple(defaults.refresh),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ModalKeysFile {
    confirm: KeyBinding,
    cancel: KeyBinding,
    close: KeyBinding,
}

impl Default for ModalKeysFile {
    fn default() -> Self {
        let defaults = ModalKeys::default();
        Self {
            confirm: KeyBinding::Multiple(defaults.confirm),
            cancel: KeyBinding::Multiple(defaults.cancel),
            close: KeyBinding::Multiple(defaults.close),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct WizardKeysFile {
    next: KeyBinding,
    prev: KeyBinding,
    cycle_next: KeyBinding,
    cycle_prev: KeyBinding,
    confirm: KeyBinding,
    back: KeyBinding,
    skip: KeyBinding,
    retry: KeyBinding,
    close: KeyBinding,
}

impl Default for WizardKeysFile {
    fn default() -> Self {
        let defaults = WizardKeys::default();
        Self {
            next: KeyBinding::Multiple(defaults.next),
            prev: KeyBinding::Multiple(defaults.prev),
            cycle_next: KeyBinding::Multiple(defaults.cycle_next),
            cycle_prev: KeyBinding::Multiple(defaults.cycle_prev),
            confirm: KeyBinding::Multiple(defaults.confirm),
            back: KeyBinding::Multiple(defaults.back),
            skip: KeyBinding::Multiple(defaults.skip),
            retry: KeyBinding::Multiple(defaults.retry),
            close: KeyBinding::Multiple(defaults.close),
        }
    }
}

impl From<KeysFile> for Keys {
    fn from(file: KeysFile) -> Self {
        Self {
            global: GlobalKeys {
                quit: file.global.quit.into_vec(),
                next_page: file.global.next_page.into_vec(),
                prev_page: file.global.prev_page.into_vec(),
                reload: file.global.reload.into_vec(),
                import: file.global.import.into_vec(),
                log: file.global.log.into_vec(),
            },
            table: TableKeys {
                next: file.table.next.into_vec(),
                prev: file.table.prev.into_vec(),
                toggle: file.table.toggle.into_vec(),
                toggle_all: file.table.toggle_all.into_vec(),
                delete_selected: file.table.delete_selected.into_vec(),
                delete_row: file.table.delete_row.into_vec(),
                refresh: file.table.refresh.into_vec(),
            },
            modal: ModalKeys {
                confirm: file.modal.confirm.into_vec(),
                cancel: file.modal.cancel.into_vec(),
                close: file.modal.close.into_vec(),
            },
            wizard: WizardKeys {
                next: file.wizard.next.into_vec(),
                prev: file.wizard.prev.into_vec(),
                cycle_next: file.wizard.cycle_next.into_vec(),
                cycle_prev: file.wizard.cycle_prev.into_vec(),
                confirm: file.wizard.confirm.into_vec(),
                back: file.wizard.back.into_vec(),
                skip: file.wizard.skip.into_vec(),
                retry: file.wizard.retry.into_vec(),
                close: file.wizard.close.into_vec(),
            },
        }
    }
}

/// Normalize a key binding string to a canonical form for collision detection.
/// Single characters preserve case (since 'R' means Shift+r, different from 'r').
/// Multi-character key names are case-insensitive (Enter, ENTER, enter are the same).
fn normalize_binding(binding: &str) -> String {
    let trimmed = binding.trim();
    if trimmed.chars().count() == 1 {
        trimmed.to_string()
    } else {
        let lower = trimmed.to_ascii_lowercase();
        match lower.as_str() {
            "esc" => "escape".to_string(),
            "shift+tab" => "backtab".to_string(),
            _ => lower,
        }
    }
}

/// Check for collisions within a single context
fn check_context_collisions(bindings: &[(&str, &[String])], context_name: &str) -> Result<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();

    for (action_name, keys) in bindings {
        for key in *keys {
            let normalized = normalize_binding(key);
            if normalized.is_empty() {
                continue;
            }
            if let Some(existing_action) = seen.get(&normalized) {
                bail!(
                    "key binding collision in [keys.{}]: '{}' is bound to both '{}' and '{}'",
                    context_name,
                    key,
                    existing_action,
                    action_name
                );
            }
            seen.insert(normalized, action_name);
        }
    }

    Ok(())
}

/// Validate all key bindings for collisions within each context.
/// Global keys are also active on the table, so both are checked together.
fn validate_key_bindings(keys: &Keys) -> Result<()> {
    check_context_collisions(
        &[
            ("quit", &keys.global.quit),
            ("next_page", &keys.global.next_page),
            ("prev_page", &keys.global.prev_page),
            ("reload", &keys.global.reload),
            ("import", &keys.global.import),
            ("log", &keys.global.log),
            ("next", &keys.table.next),
            ("prev", &keys.table.prev),
            ("toggle", &keys.table.toggle),
            ("toggle_all", &keys.table.toggle_all),
            ("delete_selected", &keys.table.delete_selected),
            ("delete_row", &keys.table.delete_row),
            ("refresh", &keys.table.refresh),
        ],
        "table",
    )?;

    check_context_collisions(
        &[
            ("confirm", &keys.modal.confirm),
            ("cancel", &keys.modal.cancel),
            ("close", &keys.modal.close),
        ],
        "modal",
    )?;

    check_context_collisions(
        &[
            ("next", &keys.wizard.next),
            ("prev", &keys.wizard.prev),
            ("cycle_next", &keys.wizard.cycle_next),
            ("cycle_prev", &keys.wizard.cycle_prev),
            ("confirm", &keys.wizard.confirm),
            ("back", &keys.wizard.back),
            ("skip", &keys.wizard.skip),
            ("retry", &keys.wizard.retry),
            ("close", &keys.wizard.close),
        ],
        "wizard",
    )?;

    Ok(())
}

// =============================================================================
// Config file structure
// =============================================================================

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    api: ApiFile,
    pages: Option<Vec<PageFile>>,
    import: ImportFile,
    notifications: NotificationsFile,
    refresh: RefreshFile,
    keys: KeysFile,
    ui: UiFile,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ApiFile {
    base_url: Option<String>,
    token: Option<String>,
    timeout_secs: u64,
    resource_prefix: String,
    campaigns_endpoint: String,
}

impl Default for ApiFile {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            timeout_secs: 30,
            resource_prefix: "/api".into(),
            campaigns_endpoint: "/api/campaigns".into(),
        }
    }
}

impl ApiFile {
    fn into_config(self) -> Result<ApiConfig> {
        let base_url = self
            .base_url
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| anyhow!("`api.base_url` must be specified in configuration"))?;

        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            bail!("`api.base_url` must start with http:// or https://, got {}", base_url);
        }

        if self.timeout_secs == 0 {
            bail!("`api.timeout_secs` must be greater than zero");
        }

        let token = self
            .token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());

        Ok(ApiConfig {
            base_url,
            token,
            timeout: Duration::from_secs(self.timeout_secs),
            resource_prefix: normalize_endpoint(&self.resource_prefix),
            campaigns_endpoint: normalize_endpoint(&self.campaigns_endpoint),
        })
    }
}

#[derive(Debug, Deserialize)]
struct PageFile {
    key: String,
    title: Option<String>,
    path: Option<String>,
    resource: Option<String>,
    bulk_delete: Option<String>,
}

impl From<PageFile> for PageConfig {
    fn from(file: PageFile) -> Self {
        let key = file.key.trim().to_string();
        let resource = file
            .resource
            .map(|r| r.trim().trim_matches('/').to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| key.clone());
        Self {
            title: file.title.unwrap_or_else(|| key.to_uppercase()),
            path: file.path.unwrap_or_else(|| format!("/admin/{}", key)),
            bulk_delete_endpoint: file
                .bulk_delete
                .map(|endpoint| normalize_endpoint(&endpoint))
                .unwrap_or_else(|| format!("/api/{}/bulk-delete", resource)),
            resource,
            key,
        }
    }
}

fn validate_pages(pages: &[PageConfig]) -> Result<()> {
    if pages.is_empty() {
        bail!("at least one [[pages]] entry is required");
    }
    let mut seen = HashSet::new();
    for page in pages {
        if page.key.is_empty() {
            bail!("[[pages]] entries need a non-empty `key`");
        }
        if !seen.insert(page.key.as_str()) {
            bail!("duplicate page key `{}`", page.key);
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ImportFile {
    endpoint: String,
    accepted_extensions: Vec<String>,
    preview_rows: usize,
    refresh_page: Option<String>,
}

impl Default for ImportFile {
    fn default() -> Self {
        let defaults = ImportConfig::default();
        Self {
            endpoint: defaults.endpoint,
            accepted_extensions: defaults.accepted_extensions,
            preview_rows: defaults.preview_rows,
            refresh_page: defaults.refresh_page,
        }
    }
}

impl From<ImportFile> for ImportConfig {
    fn from(file: ImportFile) -> Self {
        let accepted_extensions: Vec<String> = file
            .accepted_extensions
            .into_iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Self {
            endpoint: normalize_endpoint(&file.endpoint),
            accepted_extensions: if accepted_extensions.is_empty() {
                ImportConfig::default().accepted_extensions
            } else {
                accepted_extensions
            },
            preview_rows: file.preview_rows.max(1),
            refresh_page: file.refresh_page.filter(|page| !page.trim().is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct NotificationsFile {
    toast_ms: u64,
    history: usize,
}

impl Default for NotificationsFile {
    fn default() -> Self {
        Self {
            toast_ms: 5000,
            history: 200,
        }
    }
}

impl From<NotificationsFile> for NotificationConfig {
    fn from(file: NotificationsFile) -> Self {
        Self {
            toast_duration: Duration::from_millis(if file.toast_ms == 0 { 5000 } else { file.toast_ms }),
            history: file.history.max(1),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RefreshFile {
    reload_delay_ms: u64,
}

impl Default for RefreshFile {
    fn default() -> Self {
        Self {
            reload_delay_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct UiFile {
    colors: UiColorsFile,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct UiColorsFile {
    border: RgbColor,
    selection_bg: RgbColor,
    selection_fg: RgbColor,
    separator: RgbColor,
    status_fg: RgbColor,
    status_bg: RgbColor,
    success: RgbColor,
    error: RgbColor,
    warning: RgbColor,
    info: RgbColor,
}

impl Default for UiColorsFile {
    fn default() -> Self {
        Self {
            border: RgbColor::new(255, 165, 0),
            selection_bg: RgbColor::new(255, 165, 0),
            selection_fg: RgbColor::new(0, 0, 0),
            separator: RgbColor::new(255, 165, 0),
            status_fg: RgbColor::new(255, 165, 0),
            status_bg: RgbColor::new(0, 0, 0),
            success: RgbColor::new(80, 200, 120),
            error: RgbColor::new(230, 70, 70),
            warning: RgbColor::new(240, 200, 60),
            info: RgbColor::new(100, 160, 240),
        }
    }
}

impl From<UiFile> for UiConfig {
    fn from(file: UiFile) -> Self {
        let c = file.colors;
        Self {
            colors: UiColors {
                border: c.border,
                selection_bg: c.selection_bg,
                selection_fg: c.selection_fg,
                separator: c.separator,
                status_fg: c.status_fg,
                status_bg: c.status_bg,
                success: c.success,
                error: c.error,
                warning: c.warning,
                info: c.info,
            },
        }
    }
}

impl RgbColor {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl<'de> serde::Deserialize<'de> for RgbColor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Helper {
            Array([u8; 3]),
            Map { r: u8, g: u8, b: u8 },
        }

        let helper = Helper::deserialize(deserializer)?;
        let (r, g, b) = match helper {
            Helper::Array(values) => (values[0], values[1], values[2]),
            Helper::Map { r, g, b } => (r, g, b),
        };
        Ok(RgbColor { r, g, b })
    }
}

/// Ensure an endpoint starts with one slash and has no trailing slash
fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_matches('/');
    format!("/{}", trimmed)
}

// =============================================================================
// Loading
// =============================================================================

fn config_root() -> Result<PathBuf> {
    let base = BaseDirs::new().context("unable to determine base directories")?;
    Ok(base.config_dir().join(APP_NAME))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_root()?.join(CONFIG_FILE_NAME))
}

/// Directory for the interactive panel's log file
pub fn data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("unable to determine base directories")?;
    let dir = base.data_local_dir().join(APP_NAME);
    if !dir.exists() {
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create data dir: {}", dir.display()))?;
    }
    Ok(dir)
}

pub fn load(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(path) => expand_tilde(path),
        None => config_path()?,
    };
    if !path.exists() {
        bail!(
            "configuration file not found at {}. Please create it with at least an [api] base_url.",
            path.display()
        );
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read configuration file at {}", path.display()))?;

    parse(&raw, path)
}

/// Parse configuration text; `path` is only recorded for display
pub fn parse(raw: &str, path: PathBuf) -> Result<Config> {
    let value: toml::Value = toml::from_str(raw)
        .with_context(|| format!("failed to parse {} as TOML", path.display()))?;

    warn_unknown_keys(&value);

    let cfg_file: ConfigFile = value
        .try_into()
        .with_context(|| format!("failed to deserialize config from {}", path.display()))?;

    let api = cfg_file.api.into_config()?;

    let pages: Vec<PageConfig> = match cfg_file.pages {
        Some(pages) => pages.into_iter().map(PageConfig::from).collect(),
        None => default_pages(),
    };
    validate_pages(&pages)?;

    let import: ImportConfig = cfg_file.import.into();
    if let Some(refresh_page) = &import.refresh_page {
        if !pages.iter().any(|page| &page.key == refresh_page) {
            warn!("import.refresh_page `{}` does not name a configured page", refresh_page);
        }
    }

    let keys: Keys = cfg_file.keys.into();
    validate_key_bindings(&keys)?;

    Ok(Config {
        config_path: path,
        api,
        pages,
        import,
        notifications: cfg_file.notifications.into(),
        refresh: RefreshConfig {
            reload_delay: Duration::from_millis(cfg_file.refresh.reload_delay_ms),
        },
        keys,
        ui: cfg_file.ui.into(),
    })
}

// =============================================================================
// Unknown key warnings
// =============================================================================

fn warn_unknown_keys(value: &toml::Value) {
    let Some(table) = value.as_table() else {
        return;
    };

    warn_unknown_in_context(
        value,
        "top level",
        &["api", "pages", "import", "notifications", "refresh", "keys", "ui"],
    );

    if let Some(api) = table.get("api") {
        warn_unknown_in_context(
            api,
            "api",
            &["base_url", "token", "timeout_secs", "resource_prefix", "campaigns_endpoint"],
        );
    }

    if let Some(pages) = table.get("pages").and_then(|p| p.as_array()) {
        for page in pages {
            warn_unknown_in_context(
                page,
                "pages",
                &["key", "title", "path", "resource", "bulk_delete"],
            );
        }
    }

    if let Some(import) = table.get("import") {
        warn_unknown_in_context(
            import,
            "import",
            &["endpoint", "accepted_extensions", "preview_rows", "refresh_page"],
        );
    }

    if let Some(notifications) = table.get("notifications") {
        warn_unknown_in_context(notifications, "notifications", &["toast_ms", "history"]);
    }

    if let Some(refresh) = table.get("refresh") {
        warn_unknown_in_context(refresh, "refresh", &["reload_delay_ms"]);
    }

    if let Some(keys) = table.get("keys") {
        warn_unknown_keys_section(keys);
    }

    if let Some(ui) = table.get("ui") {
        warn_unknown_in_context(ui, "ui", &["colors"]);
        if let Some(colors) = ui.get("colors") {
            warn_unknown_in_context(
                colors,
                "ui.colors",
                &[
                    "border",
                    "selection_bg",
                    "selection_fg",
                    "separator",
                    "status_fg",
                    "status_bg",
                    "success",
                    "error",
                    "warning",
                    "info",
                ],
            );
        }
    }
}

fn warn_unknown_keys_section(value: &toml::Value) {
    let Some(table) = value.as_table() else {
        return;
    };

    warn_unknown_in_context(value, "keys", &["global", "table", "modal", "wizard"]);

    if let Some(global) = table.get("global") {
        warn_unknown_in_context(
            global,
            "keys.global",
            &["quit", "next_page", "prev_page", "reload", "import", "log"],
        );
    }
    if let Some(table_keys) = table.get("table") {
        warn_unknown_in_context(
            table_keys,
            "keys.table",
            &["next", "prev", "toggle", "toggle_all", "delete_selected", "delete_row", "refresh"],
        );
    }
    if let Some(modal) = table.get("modal") {
        warn_unknown_in_context(modal, "keys.modal", &["confirm", "cancel", "close"]);
    }
    if let Some(wizard) = table.get("wizard") {
        warn_unknown_in_context(
            wizard,
            "keys.wizard",
            &[
                "next",
                "prev",
                "cycle_next",
                "cycle_prev",
                "confirm",
                "back",
                "skip",
                "retry",
                "close",
            ],
        );
    }
}

fn warn_unknown_in_context(value: &toml::Value, context: &str, known: &[&str]) {
    let Some(table) = value.as_table() else {
        return;
    };
    for key in table.keys() {
        if !known.contains(&key.as_str()) {
            warn!("unknown configuration key `{}` in {}", key, context);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(raw: &str) -> Result<Config> {
        parse(raw, PathBuf::from("test.toml"))
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_str("[api]\nbase_url = \"https://admin.example.com/\"\n").unwrap();

        assert_eq!(config.api.base_url, "https://admin.example.com");
        assert_eq!(config.api.timeout, Duration::from_secs(30));
        assert_eq!(config.api.resource_prefix, "/api");
        assert_eq!(config.pages.len(), 3);
        assert_eq!(config.page("users").unwrap().bulk_delete_endpoint, "/api/users/bulk-delete");
        assert_eq!(config.notifications.toast_duration, Duration::from_millis(5000));
        assert_eq!(config.refresh.reload_delay, Duration::from_millis(1500));
        assert_eq!(config.import.endpoint, "/api/contacts/import");
    }

    #[test]
    fn test_base_url_is_required() {
        let err = parse_str("[api]\ntoken = \"abc\"\n").unwrap_err();
        assert!(err.to_string().contains("base_url"));

        let err = parse_str("[api]\nbase_url = \"admin.example.com\"\n").unwrap_err();
        assert!(err.to_string().contains("http://"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = parse_str("[api]\nbase_url = \"http://x\"\ntimeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));
    }

    #[test]
    fn test_pages_override_defaults() {
        let raw = r#"
[api]
base_url = "http://localhost:8080"

[[pages]]
key = "comments"
title = "Comments"
path = "/admin/blog/comments/"
bulk_delete = "api/blog/comments/bulk-delete/"

[[pages]]
key = "users"
resource = "/accounts/"
"#;
        let config = parse_str(raw).unwrap();
        assert_eq!(config.pages.len(), 2);

        let comments = config.page("comments").unwrap();
        assert_eq!(comments.bulk_delete_endpoint, "/api/blog/comments/bulk-delete");
        assert_eq!(comments.resource, "comments");

        let users = config.page("users").unwrap();
        assert_eq!(users.resource, "accounts");
        assert_eq!(users.title, "USERS");
        assert_eq!(users.path, "/admin/users");
        assert_eq!(users.bulk_delete_endpoint, "/api/accounts/bulk-delete");
    }

    #[test]
    fn test_duplicate_page_keys_rejected() {
        let raw = r#"
[api]
base_url = "http://localhost"

[[pages]]
key = "users"

[[pages]]
key = "users"
"#;
        let err = parse_str(raw).unwrap_err();
        assert!(err.to_string().contains("duplicate page key"));
    }

    #[test]
    fn test_key_collision_detected() {
        let raw = r#"
[api]
base_url = "http://localhost"

[keys.table]
toggle_all = "d"
"#;
        let err = parse_str(raw).unwrap_err();
        assert!(err.to_string().contains("collision"));
    }

    #[test]
    fn test_single_string_binding_accepted() {
        let raw = r#"
[api]
base_url = "http://localhost"

[keys.modal]
close = "Q"
"#;
        let config = parse_str(raw).unwrap();
        assert_eq!(config.keys.modal.close, vec!["Q".to_string()]);
    }

    #[test]
    fn test_import_extensions_normalized() {
        let raw = r#"
[api]
base_url = "http://localhost"

[import]
accepted_extensions = [".CSV", " xlsx "]
preview_rows = 0
"#;
        let config = parse_str(raw).unwrap();
        assert_eq!(config.import.accepted_extensions, vec!["csv", "xlsx"]);
        assert_eq!(config.import.preview_rows, 1);
    }

    #[test]
    fn test_normalize_binding() {
        assert_eq!(normalize_binding("Esc"), "escape");
        assert_eq!(normalize_binding("ENTER"), "enter");
        assert_eq!(normalize_binding("R"), "R");
        assert_ne!(normalize_binding("r"), normalize_binding("R"));
    }

    #[test]
    fn test_color_forms() {
        let raw = r#"
[api]
base_url = "http://localhost"

[ui.colors]
border = [1, 2, 3]
error = { r = 9, g = 8, b = 7 }
"#;
        let config = parse_str(raw).unwrap();
        assert_eq!(config.ui.colors.border.g, 2);
        assert_eq!(config.ui.colors.error.r, 9);
    }
}

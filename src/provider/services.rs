//! Engine-backed services handed out by the provider.
//!
//! Apart from [`CookieManager`], each service is created only after the
//! engine has started.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::engine::Engine;
use crate::startup::{OwnerContext, StartupError, StartupResult};

/// Enable or disable remote debugging; owner thread only.
pub(crate) fn set_remote_debugging<E: Engine>(
    owner: &OwnerContext,
    engine: &E,
    enable: bool,
) -> StartupResult<()> {
    if !owner.is_current() {
        return Err(StartupError::NotOwnerContext {
            operation: "set_web_contents_debugging_enabled",
        });
    }
    engine.set_remote_debugging(enable);
    Ok(())
}

/// Process-wide helpers that need a started engine
pub struct Statics<E> {
    engine: Arc<E>,
    owner: OwnerContext,
    debuggable: bool,
}

impl<E: Engine> Statics<E> {
    pub(crate) fn new(engine: Arc<E>, owner: OwnerContext, debuggable: bool) -> Self {
        Self {
            engine,
            owner,
            debuggable,
        }
    }

    pub fn find_address(&self, text: &str) -> Option<String> {
        self.engine.find_address(text)
    }

    pub fn default_user_agent(&self) -> String {
        self.engine.default_user_agent()
    }

    /// Toggle remote debugging of web contents.
    ///
    /// Debuggable builds always have it on, so the call is a no-op there.
    pub fn set_web_contents_debugging_enabled(&self, enable: bool) -> StartupResult<()> {
        if self.debuggable {
            return Ok(());
        }
        set_remote_debugging(&self.owner, self.engine.as_ref(), enable)
    }
}

/// Per-profile engine state
#[derive(Debug)]
pub struct BrowserContext {
    data_dir: PathBuf,
    geolocation: RwLock<BTreeMap<String, bool>>,
    form_entries: RwLock<HashMap<String, Vec<String>>>,
    http_auth: RwLock<HashMap<(String, String), (String, String)>>,
}

impl BrowserContext {
    pub(crate) fn new(data_dir: PathBuf) -> Self {
        debug!("Creating browser context for {:?}", data_dir);
        Self {
            data_dir,
            geolocation: RwLock::new(BTreeMap::new()),
            form_entries: RwLock::new(HashMap::new()),
            http_auth: RwLock::new(HashMap::new()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Remember a value typed into a form field
    pub fn save_form_entry(&self, field: &str, value: &str) {
        let mut entries = self.form_entries.write();
        let values = entries.entry(field.to_string()).or_default();
        if !values.iter().any(|v| v == value) {
            values.push(value.to_string());
        }
    }

    pub fn form_suggestions(&self, field: &str) -> Vec<String> {
        self.form_entries
            .read()
            .get(field)
            .cloned()
            .unwrap_or_default()
    }
}

/// Cookie jar; usable before the engine has started
#[derive(Default)]
pub struct CookieManager {
    jar: RwLock<HashMap<String, BTreeMap<String, String>>>,
    reject: AtomicBool,
}

impl CookieManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_accept_cookie(&self, accept: bool) {
        self.reject.store(!accept, Ordering::SeqCst);
    }

    pub fn accept_cookie(&self) -> bool {
        !self.reject.load(Ordering::SeqCst)
    }

    /// Store a `name=value[; attributes]` cookie for `host`.
    ///
    /// Returns `false` if cookies are rejected or the value is malformed.
    pub fn set_cookie(&self, host: &str, cookie: &str) -> bool {
        if !self.accept_cookie() {
            return false;
        }

        let pair = cookie.split(';').next().unwrap_or_default();
        let Some((name, value)) = pair.split_once('=') else {
            return false;
        };
        let name = name.trim();
        if name.is_empty() {
            return false;
        }

        self.jar
            .write()
            .entry(host.to_string())
            .or_default()
            .insert(name.to_string(), value.trim().to_string());
        true
    }

    /// Cookie header value for `host`
    pub fn cookie(&self, host: &str) -> Option<String> {
        let jar = self.jar.read();
        let cookies = jar.get(host)?;
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn has_cookies(&self) -> bool {
        self.jar.read().values().any(|c| !c.is_empty())
    }

    pub fn remove_all_cookies(&self) {
        self.jar.write().clear();
    }
}

/// Per-origin geolocation decisions
pub struct GeolocationPermissions {
    context: Arc<BrowserContext>,
}

impl GeolocationPermissions {
    pub(crate) fn new(context: Arc<BrowserContext>) -> Self {
        Self { context }
    }

    pub fn allow(&self, origin: &str) {
        self.context.geolocation.write().insert(origin.to_string(), true);
    }

    pub fn deny(&self, origin: &str) {
        self.context
            .geolocation
            .write()
            .insert(origin.to_string(), false);
    }

    /// `None` when no decision has been recorded
    pub fn allowed(&self, origin: &str) -> Option<bool> {
        self.context.geolocation.read().get(origin).copied()
    }

    pub fn origins(&self) -> Vec<String> {
        self.context.geolocation.read().keys().cloned().collect()
    }

    pub fn clear(&self, origin: &str) {
        self.context.geolocation.write().remove(origin);
    }

    pub fn clear_all(&self) {
        self.context.geolocation.write().clear();
    }
}

/// Storage usage for one origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OriginUsage {
    pub usage: u64,
    pub quota: u64,
}

/// Per-origin storage quota accounting
#[derive(Default)]
pub struct WebStorage {
    origins: RwLock<BTreeMap<String, OriginUsage>>,
}

impl WebStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn record_usage(&self, origin: &str, usage: u64, quota: u64) {
        self.origins
            .write()
            .insert(origin.to_string(), OriginUsage { usage, quota });
    }

    pub fn origins(&self) -> Vec<(String, OriginUsage)> {
        self.origins
            .read()
            .iter()
            .map(|(origin, usage)| (origin.clone(), *usage))
            .collect()
    }

    pub fn usage_for_origin(&self, origin: &str) -> u64 {
        self.origins.read().get(origin).map(|u| u.usage).unwrap_or(0)
    }

    pub fn quota_for_origin(&self, origin: &str) -> u64 {
        self.origins.read().get(origin).map(|u| u.quota).unwrap_or(0)
    }

    pub fn delete_origin(&self, origin: &str) {
        self.origins.write().remove(origin);
    }

    pub fn delete_all_data(&self) {
        self.origins.write().clear();
    }
}

/// Favicon bookkeeping
#[derive(Default)]
pub struct WebIconDatabase {
    path: RwLock<Option<PathBuf>>,
    retained: RwLock<HashMap<String, usize>>,
}

impl WebIconDatabase {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, path: &Path) {
        *self.path.write() = Some(path.to_path_buf());
    }

    pub fn close(&self) {
        self.path.write().take();
    }

    pub fn is_open(&self) -> bool {
        self.path.read().is_some()
    }

    pub fn retain_icon_for_page_url(&self, url: &str) {
        *self.retained.write().entry(url.to_string()).or_insert(0) += 1;
    }

    pub fn release_icon_for_page_url(&self, url: &str) {
        let mut retained = self.retained.write();
        if let Some(count) = retained.get_mut(url) {
            *count -= 1;
            if *count == 0 {
                retained.remove(url);
            }
        }
    }

    pub fn retained_count(&self, url: &str) -> usize {
        self.retained.read().get(url).copied().unwrap_or(0)
    }

    pub fn remove_all_icons(&self) {
        self.retained.write().clear();
    }
}

/// Saved form data and HTTP auth credentials
pub struct ViewDatabase {
    context: Arc<BrowserContext>,
}

impl ViewDatabase {
    pub(crate) fn new(context: Arc<BrowserContext>) -> Self {
        Self { context }
    }

    pub fn has_form_data(&self) -> bool {
        self.context.form_entries.read().values().any(|v| !v.is_empty())
    }

    pub fn clear_form_data(&self) {
        self.context.form_entries.write().clear();
    }

    pub fn set_http_auth_username_password(
        &self,
        host: &str,
        realm: &str,
        username: &str,
        password: &str,
    ) {
        self.context.http_auth.write().insert(
            (host.to_string(), realm.to_string()),
            (username.to_string(), password.to_string()),
        );
    }

    pub fn http_auth_username_password(&self, host: &str, realm: &str) -> Option<(String, String)> {
        self.context
            .http_auth
            .read()
            .get(&(host.to_string(), realm.to_string()))
            .cloned()
    }

    pub fn has_http_auth_username_password(&self) -> bool {
        !self.context.http_auth.read().is_empty()
    }

    pub fn clear_http_auth_username_password(&self) {
        self.context.http_auth.write().clear();
    }
}

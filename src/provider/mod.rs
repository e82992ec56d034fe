//! Engine provider.
//!
//! Entry point for everything engine-backed. The provider:
//! - Prepares the data directory before anything can use it (a package
//!   downgrade wipes it)
//! - Starts the engine lazily through the [`StartupCoordinator`]
//! - Hands out services, each created on first use
//! - Creates views, attaching them once the engine is up

mod services;

use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::ProviderConfig;
use crate::engine::{Engine, EngineView};
use crate::prefs::{PrefsStore, VersionChange};
use crate::startup::{
    abort_on_fatal, Dispatcher, EngineState, FatalHook, Registration, StartupCoordinator,
    StartupError, StartupListener, StartupResult,
};

pub use services::{
    BrowserContext, CookieManager, GeolocationPermissions, OriginUsage, Statics, ViewDatabase,
    WebIconDatabase, WebStorage,
};

struct Services<E> {
    statics: Option<Arc<Statics<E>>>,
    browser_context: Option<Arc<BrowserContext>>,
    cookie_manager: Option<Arc<CookieManager>>,
    geolocation: Option<Arc<GeolocationPermissions>>,
    web_storage: Option<Arc<WebStorage>>,
    icon_database: Option<Arc<WebIconDatabase>>,
    view_database: Option<Arc<ViewDatabase>>,
}

impl<E> Default for Services<E> {
    fn default() -> Self {
        Self {
            statics: None,
            browser_context: None,
            cookie_manager: None,
            geolocation: None,
            web_storage: None,
            icon_database: None,
            view_database: None,
        }
    }
}

/// Lazily-started engine plus the services built on it.
pub struct EngineProvider<E> {
    config: ProviderConfig,
    coordinator: StartupCoordinator<E>,
    dispatcher: Arc<dyn Dispatcher>,
    version_change: VersionChange,
    // Never held across `ensure_started`: a waiter holding it would block
    // the owner thread from reaching the posted startup.
    services: Mutex<Services<E>>,
}

impl<E: Engine> EngineProvider<E> {
    pub fn new<F>(
        config: ProviderConfig,
        dispatcher: Arc<dyn Dispatcher>,
        initializer: F,
    ) -> Result<Self>
    where
        F: FnOnce(&ProviderConfig) -> Result<E> + Send + 'static,
    {
        Self::with_fatal_hook(config, dispatcher, initializer, Arc::new(abort_on_fatal))
    }

    pub fn with_fatal_hook<F>(
        config: ProviderConfig,
        dispatcher: Arc<dyn Dispatcher>,
        initializer: F,
        on_fatal: FatalHook,
    ) -> Result<Self>
    where
        F: FnOnce(&ProviderConfig) -> Result<E> + Send + 'static,
    {
        std::fs::create_dir_all(&config.base_dir)
            .with_context(|| format!("Failed to create base directory: {:?}", config.base_dir))?;

        let prefs = PrefsStore::new(config.prefs_path())?;
        let version_change = prefs
            .check_version(config.version_code, &config.data_dir())
            .context("Failed to check engine version")?;
        debug!("Version check: {:?}", version_change);
        // Now safe to use the data directory.

        let init_config = config.clone();
        let coordinator = StartupCoordinator::with_fatal_hook(
            dispatcher.clone(),
            move || {
                let engine = initializer(&init_config)?;
                if init_config.debuggable {
                    engine.set_remote_debugging(true);
                }
                Ok(engine)
            },
            on_fatal,
        );

        Ok(Self {
            config,
            coordinator,
            dispatcher,
            version_change,
            services: Mutex::new(Services::default()),
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &StartupCoordinator<E> {
        &self.coordinator
    }

    /// Outcome of the version check done at construction
    pub fn version_change(&self) -> VersionChange {
        self.version_change
    }

    /// Start the engine if needed; see [`StartupCoordinator::ensure_started`]
    pub fn start_engines(&self, on_owner: bool) -> StartupResult<Arc<E>> {
        self.coordinator.ensure_started(on_owner)
    }

    pub fn has_started(&self) -> bool {
        self.coordinator.has_started()
    }

    pub fn state(&self) -> EngineState {
        self.coordinator.state()
    }

    /// Create a view. Views created before startup attach once it completes.
    pub fn create_view(&self) -> Arc<EngineView> {
        let view = Arc::new(EngineView::new());
        let listener: Arc<dyn StartupListener> = view.clone();

        match self.coordinator.register_for_startup_notification(&listener) {
            Registration::NotifiedImmediately => debug!("View {} attached", view.id()),
            Registration::Pending(_) => debug!("View {} waiting for engine", view.id()),
        }
        view
    }

    pub fn statics(&self) -> StartupResult<Arc<Statics<E>>> {
        let engine = self.coordinator.ensure_started(false)?;
        let owner = self.owner();

        let mut services = self.services.lock();
        let statics = services.statics.get_or_insert_with(|| {
            Arc::new(Statics::new(engine, owner, self.config.debuggable))
        });
        Ok(statics.clone())
    }

    /// Cookie manager; does not start the engine
    pub fn cookie_manager(&self) -> Arc<CookieManager> {
        let mut services = self.services.lock();
        if services.cookie_manager.is_none() && !self.coordinator.has_started() {
            debug!("Creating cookie manager before engine startup");
        }
        services
            .cookie_manager
            .get_or_insert_with(|| Arc::new(CookieManager::new()))
            .clone()
    }

    /// Per-profile state; the engine must already be started
    pub fn browser_context(&self) -> StartupResult<Arc<BrowserContext>> {
        if !self.coordinator.has_started() {
            return Err(StartupError::NotStarted {
                operation: "browser_context",
            });
        }
        Ok(self.browser_context_locked(&mut self.services.lock()))
    }

    pub fn geolocation_permissions(&self) -> StartupResult<Arc<GeolocationPermissions>> {
        self.coordinator.ensure_started(false)?;

        let mut services = self.services.lock();
        if let Some(geolocation) = &services.geolocation {
            return Ok(geolocation.clone());
        }
        let context = self.browser_context_locked(&mut services);
        let geolocation = Arc::new(GeolocationPermissions::new(context));
        services.geolocation = Some(geolocation.clone());
        Ok(geolocation)
    }

    pub fn web_storage(&self) -> StartupResult<Arc<WebStorage>> {
        self.coordinator.ensure_started(false)?;
        Ok(self
            .services
            .lock()
            .web_storage
            .get_or_insert_with(|| Arc::new(WebStorage::new()))
            .clone())
    }

    pub fn web_icon_database(&self) -> StartupResult<Arc<WebIconDatabase>> {
        self.coordinator.ensure_started(false)?;
        Ok(self
            .services
            .lock()
            .icon_database
            .get_or_insert_with(|| Arc::new(WebIconDatabase::new()))
            .clone())
    }

    pub fn view_database(&self) -> StartupResult<Arc<ViewDatabase>> {
        self.coordinator.ensure_started(false)?;

        let mut services = self.services.lock();
        if let Some(database) = &services.view_database {
            return Ok(database.clone());
        }
        let context = self.browser_context_locked(&mut services);
        let database = Arc::new(ViewDatabase::new(context));
        services.view_database = Some(database.clone());
        Ok(database)
    }

    /// Toggle remote debugging; owner thread only, engine must be started
    pub fn set_web_contents_debugging_enabled(&self, enable: bool) -> StartupResult<()> {
        let owner = self.owner();
        let engine = self.coordinator.engine().ok_or(StartupError::NotStarted {
            operation: "set_web_contents_debugging_enabled",
        })?;
        services::set_remote_debugging(&owner, engine.as_ref(), enable)
    }

    fn owner(&self) -> crate::startup::OwnerContext {
        self.coordinator
            .owner()
            .unwrap_or_else(|| self.dispatcher.owner())
    }

    fn browser_context_locked(&self, services: &mut Services<E>) -> Arc<BrowserContext> {
        services
            .browser_context
            .get_or_insert_with(|| {
                info!("Creating browser context");
                Arc::new(BrowserContext::new(self.config.data_dir()))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SimulatedEngine;
    use crate::startup::{run_on_owner, OwnerLoop, QueueDispatcher};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use tempfile::{tempdir, TempDir};

    fn test_config(tmp: &TempDir) -> ProviderConfig {
        ProviderConfig {
            base_dir: tmp.path().to_path_buf(),
            version_code: 5,
            warmup_ms: 0,
            ..ProviderConfig::default()
        }
    }

    fn provider_on_current_thread(
        config: ProviderConfig,
    ) -> (EngineProvider<SimulatedEngine>, Arc<AtomicUsize>) {
        let boots = Arc::new(AtomicUsize::new(0));
        let b = boots.clone();
        let dispatcher = Arc::new(QueueDispatcher::for_current_thread());
        let provider = EngineProvider::new(config, dispatcher, move |config| {
            b.fetch_add(1, Ordering::SeqCst);
            SimulatedEngine::boot(config)
        })
        .unwrap();
        (provider, boots)
    }

    #[test]
    fn test_cookie_manager_does_not_start_engine() {
        let tmp = tempdir().unwrap();
        let (provider, boots) = provider_on_current_thread(test_config(&tmp));

        let cookies = provider.cookie_manager();
        assert!(cookies.set_cookie("example.com", "a=1"));
        assert!(Arc::ptr_eq(&cookies, &provider.cookie_manager()));

        assert!(!provider.has_started());
        assert_eq!(provider.state(), EngineState::NotStarted);
        assert_eq!(boots.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_statics_start_engine_once() {
        let tmp = tempdir().unwrap();
        let (provider, boots) = provider_on_current_thread(test_config(&tmp));

        let statics = provider.statics().unwrap();
        assert!(provider.has_started());
        assert!(statics.default_user_agent().contains("SimulatedEngine/5"));
        assert_eq!(
            statics.find_address("at 10 Downing Street."),
            Some("10 Downing Street".to_string())
        );

        let again = provider.statics().unwrap();
        assert!(Arc::ptr_eq(&statics, &again));
        provider.web_storage().unwrap();
        provider.web_icon_database().unwrap();
        assert_eq!(boots.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_services_share_browser_context() {
        let tmp = tempdir().unwrap();
        let (provider, _) = provider_on_current_thread(test_config(&tmp));

        assert_eq!(
            provider.browser_context().unwrap_err(),
            StartupError::NotStarted {
                operation: "browser_context"
            }
        );

        let geolocation = provider.geolocation_permissions().unwrap();
        let database = provider.view_database().unwrap();
        let context = provider.browser_context().unwrap();
        assert_eq!(context.data_dir(), tmp.path().join("data"));

        geolocation.allow("https://a.example");
        context.save_form_entry("name", "Ada");
        assert!(database.has_form_data());
        assert!(Arc::ptr_eq(&geolocation, &provider.geolocation_permissions().unwrap()));
    }

    #[test]
    fn test_views_attach_once() {
        let tmp = tempdir().unwrap();
        let (provider, _) = provider_on_current_thread(test_config(&tmp));

        let early = provider.create_view();
        let dropped_id = {
            let dropped = provider.create_view();
            dropped.id()
        };
        assert!(!early.is_attached());
        assert_ne!(early.id(), dropped_id);
        assert_eq!(provider.coordinator().pending_registrations(), 1);

        provider.start_engines(true).unwrap();
        assert!(early.is_attached());
        assert_eq!(early.attach_count(), 1);

        let late = provider.create_view();
        assert!(late.is_attached());
        assert_eq!(late.attach_count(), 1);

        provider.start_engines(true).unwrap();
        assert_eq!(early.attach_count(), 1);
    }

    #[test]
    fn test_debugging_toggle_is_owner_only() {
        let tmp = tempdir().unwrap();
        let (provider, _) = provider_on_current_thread(test_config(&tmp));
        let provider = Arc::new(provider);

        assert!(matches!(
            provider.set_web_contents_debugging_enabled(true),
            Err(StartupError::NotStarted { .. })
        ));

        let engine = provider.start_engines(true).unwrap();
        assert!(!engine.remote_debugging_enabled());

        let p = provider.clone();
        let result = thread::spawn(move || p.set_web_contents_debugging_enabled(true))
            .join()
            .unwrap();
        assert_eq!(
            result.unwrap_err(),
            StartupError::NotOwnerContext {
                operation: "set_web_contents_debugging_enabled"
            }
        );
        assert!(!engine.remote_debugging_enabled());

        provider.set_web_contents_debugging_enabled(true).unwrap();
        assert!(engine.remote_debugging_enabled());

        let statics = provider.statics().unwrap();
        statics.set_web_contents_debugging_enabled(false).unwrap();
        assert!(!engine.remote_debugging_enabled());
    }

    #[test]
    fn test_debuggable_build_keeps_debugging_on() {
        let tmp = tempdir().unwrap();
        let config = ProviderConfig {
            debuggable: true,
            ..test_config(&tmp)
        };
        let (provider, _) = provider_on_current_thread(config);

        let engine = provider.start_engines(true).unwrap();
        assert!(engine.remote_debugging_enabled());

        provider
            .statics()
            .unwrap()
            .set_web_contents_debugging_enabled(false)
            .unwrap();
        assert!(engine.remote_debugging_enabled());
    }

    #[test]
    fn test_downgrade_wipes_data_before_startup() {
        let tmp = tempdir().unwrap();
        let data_dir = tmp.path().join("data");

        let (first, _) = provider_on_current_thread(test_config(&tmp));
        assert_eq!(first.version_change(), VersionChange::FirstRun);
        first.start_engines(true).unwrap();
        std::fs::write(data_dir.join("state.db"), "newer format").unwrap();

        let older = ProviderConfig {
            version_code: 3,
            ..test_config(&tmp)
        };
        let (second, _) = provider_on_current_thread(older);
        assert_eq!(second.version_change(), VersionChange::Downgraded { from: 5 });
        assert!(!data_dir.join("state.db").exists());
    }

    #[test]
    fn test_services_from_worker_threads() {
        let tmp = tempdir().unwrap();
        let boots = Arc::new(AtomicUsize::new(0));
        let b = boots.clone();
        let owner_loop = Arc::new(OwnerLoop::spawn("provider-owner").unwrap());
        let provider = Arc::new(
            EngineProvider::new(test_config(&tmp), owner_loop.clone(), move |config| {
                b.fetch_add(1, Ordering::SeqCst);
                SimulatedEngine::boot(config)
            })
            .unwrap(),
        );

        let view = provider.create_view();

        let workers: Vec<_> = (0..6)
            .map(|i| {
                let p = provider.clone();
                thread::spawn(move || match i % 3 {
                    0 => p.statics().map(|_| ()),
                    1 => p.geolocation_permissions().map(|_| ()),
                    _ => p.view_database().map(|_| ()),
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap().unwrap();
        }
        assert_eq!(boots.load(Ordering::SeqCst), 1);

        // Debugging can be toggled by running on the owner thread
        let p = provider.clone();
        run_on_owner(owner_loop.as_ref(), move || p.set_web_contents_debugging_enabled(true))
            .unwrap()
            .unwrap();
        assert!(provider.coordinator().engine().unwrap().remote_debugging_enabled());

        assert!(view.is_attached());
        owner_loop.shutdown();
    }

    #[tokio::test]
    async fn test_startup_from_blocking_tasks() {
        let tmp = tempdir().unwrap();
        let owner_loop = Arc::new(OwnerLoop::spawn("tokio-owner").unwrap());
        let provider = Arc::new(
            EngineProvider::new(test_config(&tmp), owner_loop.clone(), SimulatedEngine::boot)
                .unwrap(),
        );

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let p = provider.clone();
                tokio::task::spawn_blocking(move || p.start_engines(false).is_ok())
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert!(provider.has_started());
        assert_eq!(provider.state(), EngineState::Started);
    }
}

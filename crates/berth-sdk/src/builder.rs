//! Fluent API for loading a compose project.

use std::path::Path;
use std::sync::Arc;

use berth_common::config::BerthConfig;
use berth_common::error::Result;
use berth_compose::manifest::{self, NormalizedManifest};
use berth_compose::naming::NameAllocator;
use berth_compose::normalize::normalize_manifest;
use berth_runtime::engine::ContainerEngine;
use berth_runtime::engine::http::DockerHttpEngine;
use berth_runtime::event::EventSink;
use berth_runtime::linker::link;
use berth_runtime::recover::recover_containers;
use berth_runtime::registry::Registry;

use crate::event::EventListener;
use crate::project::Project;

type VariableLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Builder for loading a manifest into a [`Project`].
pub struct ProjectBuilder {
    engine: Arc<dyn ContainerEngine>,
    config: BerthConfig,
    load_running: bool,
    lookup: VariableLookup,
    events: EventSink,
}

impl std::fmt::Debug for ProjectBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectBuilder")
            .field("config", &self.config)
            .field("load_running", &self.load_running)
            .finish_non_exhaustive()
    }
}

impl ProjectBuilder {
    /// Creates a builder driving `engine`.
    ///
    /// Variables are interpolated from the process environment and live
    /// containers are not recovered unless configured otherwise.
    #[must_use]
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self {
            engine,
            config: BerthConfig::default(),
            load_running: false,
            lookup: Box::new(|name| std::env::var(name).ok()),
            events: EventSink::disabled(),
        }
    }

    /// Creates a builder talking to the Docker engine at
    /// `config.engine_url`.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::Engine`](berth_common::error::BerthError::Engine)
    /// if the HTTP client cannot be constructed.
    pub fn docker(config: BerthConfig) -> Result<Self> {
        let engine = DockerHttpEngine::from_config(&config)?;
        Ok(Self::new(Arc::new(engine)).config(config))
    }

    /// Sets the runtime configuration.
    #[must_use]
    pub fn config(mut self, config: BerthConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets whether live containers of the project are adopted on load.
    #[must_use]
    pub const fn load_running(mut self, enabled: bool) -> Self {
        self.load_running = enabled;
        self
    }

    /// Sets the source used for `$VAR` interpolation.
    #[must_use]
    pub fn variables(mut self, lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        self.lookup = Box::new(lookup);
        self
    }

    /// Connects a listener to every event the loaded project emits,
    /// including unresolved-link warnings raised while loading.
    pub fn event_listener(&mut self) -> EventListener {
        let (sink, receiver) = EventSink::channel();
        self.events = sink;
        EventListener::new(receiver)
    }

    /// Loads the manifest at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::ConfigNotFound`](berth_common::error::BerthError::ConfigNotFound)
    /// for a missing file, or any error raised while parsing, normalizing,
    /// registering, recovering or linking.
    pub fn load(self, path: impl AsRef<Path>) -> Result<Project> {
        let manifest = manifest::load_with(path.as_ref(), |name| (self.lookup)(name))?;
        self.assemble(manifest)
    }

    /// Loads a manifest from `dir`, trying the standard file names in order.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::ConfigNotFound`](berth_common::error::BerthError::ConfigNotFound)
    /// if `dir` holds no manifest, otherwise the same errors as
    /// [`ProjectBuilder::load`].
    pub fn load_dir(self, dir: impl AsRef<Path>) -> Result<Project> {
        let dir = dir.as_ref();
        let path = manifest::find_manifest(dir).ok_or_else(|| {
            berth_common::error::BerthError::ConfigNotFound {
                path: dir.to_path_buf(),
            }
        })?;
        self.load(path)
    }

    /// Loads manifest text belonging to `project_dir`.
    ///
    /// # Errors
    ///
    /// Same as [`ProjectBuilder::load`], minus file access.
    pub fn load_str(self, text: &str, project_dir: impl AsRef<Path>) -> Result<Project> {
        let manifest =
            manifest::parse_manifest(text, project_dir.as_ref(), |name| (self.lookup)(name))?;
        self.assemble(manifest)
    }

    fn assemble(self, manifest: NormalizedManifest) -> Result<Project> {
        let existing = self.engine.list_containers(None)?;
        let names = NameAllocator::with_existing(
            &manifest.project,
            existing.iter().flat_map(|c| c.names.iter()),
        );
        let specs = normalize_manifest(&manifest, names)?;

        let registry = Registry::new(&manifest.project);
        for spec in specs {
            registry.add(spec)?;
        }
        if self.load_running {
            let recovered = recover_containers(self.engine.as_ref(), &registry)?;
            tracing::debug!(count = recovered.len(), "adopted live containers");
        }
        let links = link(&registry, &self.events)?;

        tracing::info!(
            project = %manifest.project,
            version = %manifest.version,
            containers = registry.len(),
            "project loaded"
        );

        Ok(Project {
            manifest,
            registry,
            links,
            engine: self.engine,
            config: self.config,
            events: self.events,
        })
    }
}

#[cfg(test)]
mod tests {
    use berth_common::error::BerthError;
    use berth_runtime::engine::memory::{EngineCall, MemoryEngine};
    use berth_runtime::event::ContainerEvent;

    use super::*;

    const MANIFEST: &str = "version: '3'\nservices:\n  db:\n    image: postgres\n  web:\n    image: $WEB_IMAGE\n    links: [db, cache]\n";

    fn builder(engine: &Arc<MemoryEngine>) -> ProjectBuilder {
        ProjectBuilder::new(engine.clone()).variables(|name| {
            (name == "WEB_IMAGE").then(|| "nginx:1.27".to_string())
        })
    }

    #[test]
    fn load_str_registers_every_service() {
        let engine = Arc::new(MemoryEngine::new());
        let project = builder(&engine).load_str(MANIFEST, "/srv/shop").expect("load");
        assert_eq!(project.name(), "shop");
        assert_eq!(project.registry().labels(), vec!["shop_db_1", "shop_web_1"]);
        let web = project.registry().get("shop_web_1").expect("web");
        assert_eq!(web.image.as_deref(), Some("nginx:1.27"));
        assert!(project.config().working_dir.is_none());
    }

    #[test]
    fn relative_volumes_resolve_against_process_directory() {
        let engine = Arc::new(MemoryEngine::new());
        let project = builder(&engine)
            .load_str(
                "version: '3'\nservices:\n  app:\n    image: busybox\n    volumes: ['./data:/data']\n",
                "/srv/shop",
            )
            .expect("load");
        assert!(project.start::<&str>(&[]).is_success());

        let cwd = std::env::current_dir().expect("cwd");
        let request = engine.request_for("shop_app_1").expect("request");
        assert_eq!(
            request.host_config.binds,
            Some(vec![format!("{}:/data:rw", cwd.join("data").display())])
        );
    }

    #[test]
    fn explicit_working_dir_wins() {
        let engine = Arc::new(MemoryEngine::new());
        let project = builder(&engine)
            .config(BerthConfig::default().with_working_dir("/opt/work"))
            .load_str(
                "version: '3'\nservices:\n  app:\n    image: busybox\n    volumes: ['./data:/data']\n",
                "/srv/shop",
            )
            .expect("load");
        assert!(project.start::<&str>(&[]).is_success());
        let request = engine.request_for("shop_app_1").expect("request");
        assert_eq!(
            request.host_config.binds,
            Some(vec!["/opt/work/data:/data:rw".to_string()])
        );
    }

    #[test]
    fn unresolved_links_reach_the_listener() {
        let engine = Arc::new(MemoryEngine::new());
        let mut builder = builder(&engine);
        let events = builder.event_listener();
        let project = builder.load_str(MANIFEST, "/srv/shop").expect("load");

        assert_eq!(project.link_report().edges, 1);
        assert_eq!(project.link_report().unresolved.len(), 1);
        assert!(matches!(
            events.try_next(),
            Some(ContainerEvent::UnresolvedLink { ref service, .. }) if service == "cache"
        ));
    }

    #[test]
    fn names_continue_after_existing_containers() {
        let engine = Arc::new(MemoryEngine::new());
        let _ = engine
            .preload_container("shop_web_4", "nginx:latest", Default::default(), false)
            .expect("preload");
        let project = builder(&engine).load_str(MANIFEST, "/srv/shop").expect("load");
        assert!(project.registry().contains("shop_web_5"));
        assert!(!project.registry().contains("shop_web_4"));
        assert_eq!(engine.calls(), vec![EngineCall::List(None)]);
    }

    #[test]
    fn load_running_adopts_project_containers() {
        let engine = Arc::new(MemoryEngine::new());
        let labels = [(
            berth_common::constants::LABEL_PROJECT.to_string(),
            "shop".to_string(),
        )]
        .into_iter()
        .collect();
        let _ = engine
            .preload_container("shop_worker_1", "busybox:latest", labels, true)
            .expect("preload");

        let project = builder(&engine)
            .load_running(true)
            .load_str(MANIFEST, "/srv/shop")
            .expect("load");
        assert_eq!(project.registry().len(), 3);
        assert!(project.registry().contains("shop_worker_1"));
    }

    #[test]
    fn missing_manifest_is_config_not_found() {
        let engine = Arc::new(MemoryEngine::new());
        let err = builder(&engine)
            .load("/nonexistent/docker-compose.yml")
            .unwrap_err();
        assert!(matches!(err, BerthError::ConfigNotFound { .. }));
    }

    #[test]
    fn empty_directory_has_no_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = Arc::new(MemoryEngine::new());
        let err = builder(&engine).load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, BerthError::ConfigNotFound { .. }));
    }
}

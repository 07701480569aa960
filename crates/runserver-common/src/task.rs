// HarnessTask: the lifecycle contract between the harness and whatever
// orchestrates it, and RunServerTask, the one task this crate provides.
//
// The orchestrator reads the task's inputs, calls `execute` once, and calls
// `on_orchestrator_ending` when it is about to go away (normally or not).

use crate::artifact_cache::ArtifactCache;
use crate::artifact_fetcher::{ArtifactFetcher, UrlFetcher};
use crate::config::HarnessConfig;
use crate::http_client_factory::HttpClientFactory;
use crate::run_directory::RunDirectoryManager;
use crate::shutdown::ShutdownHook;
use crate::supervisor::{Console, LaunchOptions, ServerProcessSupervisor};

use anyhow::Result;
use async_trait::async_trait;
use runserver_sdk::{TraceWriter, UrlUtil};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Named values a task declares as its inputs, in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TaskInputs(BTreeMap<String, String>);

impl TaskInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A unit of work driven by an orchestrator.
#[async_trait]
pub trait HarnessTask: Send + Sync {
    fn name(&self) -> &str;

    /// Values that determine what the task does.
    fn inputs(&self) -> TaskInputs;

    /// Run the task to completion. The `i32` is the task's exit code.
    async fn execute(&self) -> Result<i32>;

    /// The orchestrator is ending. Must not block.
    fn on_orchestrator_ending(&self);
}

type ConsoleFactory = Box<dyn Fn() -> Console + Send + Sync>;

/// Fetch the runtime, stage it with the plugin, run it, and report how it
/// exited.
pub struct RunServerTask {
    config: HarnessConfig,
    cache: ArtifactCache,
    hook: ShutdownHook,
    console: ConsoleFactory,
    trace: Arc<dyn TraceWriter>,
}

impl RunServerTask {
    pub fn new(
        config: HarnessConfig,
        fetcher: Arc<dyn ArtifactFetcher>,
        trace: Arc<dyn TraceWriter>,
    ) -> Self {
        let cache = ArtifactCache::new(config.cache_dir(), fetcher, trace.clone());
        Self {
            config,
            cache,
            hook: ShutdownHook::new(),
            console: Box::new(Console::stdio),
            trace,
        }
    }

    /// Task that downloads over HTTP(S) with the default client settings.
    pub fn with_default_fetcher(config: HarnessConfig, trace: Arc<dyn TraceWriter>) -> Result<Self> {
        let fetcher = UrlFetcher::new(HttpClientFactory::create_client()?);
        Ok(Self::new(config, Arc::new(fetcher), trace))
    }

    /// Use a different console for the server's stdio.
    pub fn with_console<F>(mut self, console: F) -> Self
    where
        F: Fn() -> Console + Send + Sync + 'static,
    {
        self.console = Box::new(console);
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn shutdown_hook(&self) -> &ShutdownHook {
        &self.hook
    }
}

#[async_trait]
impl HarnessTask for RunServerTask {
    fn name(&self) -> &str {
        "runServer"
    }

    fn inputs(&self) -> TaskInputs {
        TaskInputs::new()
            .with("url", UrlUtil::redact(self.config.parsed_url()))
            .with("debug", self.config.debug().to_string())
            .with("plugin", self.config.plugin_path().display().to_string())
    }

    async fn execute(&self) -> Result<i32> {
        let cached = self.cache.resolve(self.config.url()).await?;

        let manager = RunDirectoryManager::new(
            self.config.run_dir(),
            self.config.runtime_file_name(),
            self.trace.clone(),
        );
        let run = manager.prepare()?;
        let runtime = manager.install_runtime(&cached, self.config.runtime_file_name())?;
        manager.install_plugin(self.config.plugin_path(), &run.plugins_dir)?;

        let supervisor = ServerProcessSupervisor::new(
            LaunchOptions::from_config(&self.config),
            self.hook.clone(),
            self.trace.clone(),
        );
        let mut session = supervisor.launch(&runtime, &run.root, self.config.debug(), (self.console)())?;
        self.trace.info("Press Ctrl+C to stop the server");

        let exit_code = session.wait().await?;
        self.trace
            .info(&format!("Server exited with code {exit_code}"));
        Ok(exit_code)
    }

    fn on_orchestrator_ending(&self) {
        self.hook.fire();
    }
}

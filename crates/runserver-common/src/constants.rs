// Fixed values shared across the harness: process invocation flags, run and
// cache layout names, configuration defaults and environment variable names.

use std::time::Duration;

/// Port the launched runtime listens on for a debugger when debug is enabled.
pub const DEBUG_PORT: u16 = 5005;

/// JDWP agent flag that makes the runtime accept a debugger on [`DEBUG_PORT`].
pub const DEBUG_AGENT_FLAG: &str =
    "-agentlib:jdwp=transport=dt_socket,server=y,suspend=n,address=5005";

/// Flag that precedes the runtime artifact file name.
pub const RUN_FLAG: &str = "-jar";

/// Name of the plugin directory inside the run root.
pub const PLUGINS_DIR_NAME: &str = "plugins";

/// Prefix of in-flight download files inside the cache root.
pub const DOWNLOAD_TEMP_PREFIX: &str = ".download-";

/// How long output relays may keep draining after the server exits. A
/// process the server left behind can hold its pipes open indefinitely.
pub const RELAY_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration defaults.
pub mod defaults {
    pub const CONFIG_FILE_NAME: &str = "runserver.json";
    pub const PROJECT_DIR: &str = ".";
    pub const RUN_DIR: &str = "run";
    pub const CACHE_DIR: &str = "build/runserver-cache";
    pub const RUNTIME_FILE_NAME: &str = "server.jar";
    pub const JAVA: &str = "java";
}

/// Environment variables read by the harness.
pub mod env_vars {
    pub const URL: &str = "RUNSERVER_URL";
    pub const DEBUG: &str = "RUNSERVER_DEBUG";
    pub const HTTP_TIMEOUT: &str = "RUNSERVER_HTTP_TIMEOUT";
}

/// Exit codes of the `runserver` binary itself. A server that ran to
/// completion passes its own exit code through unchanged.
pub mod return_code {
    pub const FATAL_ERROR: i32 = 1;
    pub const INTERRUPTED: i32 = 130;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_binds_debug_port() {
        assert!(DEBUG_AGENT_FLAG.ends_with(&format!("address={DEBUG_PORT}")));
        assert!(DEBUG_AGENT_FLAG.starts_with("-agentlib:jdwp="));
    }
}

//! Daemon configuration loaded from environment variables.
//!
//! Config precedence: environment variable > built-in default. There is no
//! config file layer — the daemon has exactly the handful of knobs listed in
//! spec.md §6 ("Environment"), all of which are socket paths or booleans, so
//! a `config`-crate tree would be overkill here.

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

static CONFIG: OnceLock<DaemonConfig> = OnceLock::new();

/// Get the global daemon configuration.
///
/// # Panics
/// Panics if config has not been initialized via [`init`].
pub fn get() -> &'static DaemonConfig {
    CONFIG
        .get()
        .expect("kr_common::config::init() must be called before config::get()")
}

/// Initialize the global configuration from the process environment.
///
/// Should be called once at daemon (or shim) startup, before any other code
/// reads config. Calling it more than once is a no-op after the first call.
pub fn init() -> &'static DaemonConfig {
    CONFIG.get_or_init(DaemonConfig::from_env)
}

/// All paths and toggles the daemon and its satellite processes (the shim,
/// the CLI) need to find each other. See spec.md §6.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// `KR_CTL_SOCK` — control HTTP Unix socket path.
    pub control_sock: PathBuf,
    /// `KR_AGENT_SOCK` — SSH-agent Unix socket path.
    pub agent_sock: PathBuf,
    /// `KR_HOSTAUTH_SOCK` — host-auth Unix socket path.
    pub hostauth_sock: PathBuf,
    /// `KR_NOTIFY_PATH` — notifier FIFO path.
    pub notify_path: PathBuf,
    /// `SSH_AUTH_SOCK` — upstream agent socket inherited from the shell, if any.
    pub upstream_agent_sock: Option<PathBuf>,
    /// `KR_LOG_SYSLOG` — route logs to syslog instead of stderr.
    pub log_syslog: bool,
    /// Directory holding `pairing.json` / `me.json` (`~/.kr` by default).
    pub state_dir: PathBuf,
    /// `KR_RELAY_URL` — base URL of the store-and-forward relay `kr-daemon`
    /// builds its `HttpRelayTransport` against. Not named by spec.md's
    /// Environment table (the relay's real wire format is out of scope, see
    /// DESIGN.md); the daemon still needs *some* way to point its transport
    /// at a relay, so this is the knob it reads.
    pub relay_url: String,
}

impl DaemonConfig {
    fn from_env() -> Self {
        let home = dirs_home();
        Self {
            control_sock: env_path("KR_CTL_SOCK", || home.join(".kr").join("control.sock")),
            agent_sock: env_path("KR_AGENT_SOCK", || home.join(".kr").join("agent.sock")),
            hostauth_sock: env_path("KR_HOSTAUTH_SOCK", || home.join(".kr").join("hostauth.sock")),
            notify_path: env_path("KR_NOTIFY_PATH", || home.join(".kr").join("notify")),
            upstream_agent_sock: env::var_os("SSH_AUTH_SOCK").map(PathBuf::from),
            log_syslog: env_bool("KR_LOG_SYSLOG"),
            state_dir: home.join(".kr"),
            relay_url: env::var("KR_RELAY_URL").unwrap_or_else(|_| "http://127.0.0.1:8787".to_string()),
        }
    }
}

fn env_path(key: &str, default: impl FnOnce() -> PathBuf) -> PathBuf {
    env::var_os(key).map(PathBuf::from).unwrap_or_else(default)
}

fn env_bool(key: &str) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => false,
    }
}

fn dirs_home() -> PathBuf {
    env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/root"))
}

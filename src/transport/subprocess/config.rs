//! Configuration constants for agent subprocesses

/// Hosted agent binary name
pub const DEFAULT_AGENT_BINARY: &str = "amp";

/// Default endpoint for a locally built agent
pub const DEFAULT_LOCAL_SERVER_URL: &str = "https://localhost:7002";

/// Environment variable names read or written by the orchestrator
pub mod env_keys {
    /// Hosted binary override
    pub const BIN: &str = "AMP_BIN";
    /// Local agent script or binary
    pub const CLI_PATH: &str = "AMP_CLI_PATH";
    /// Server endpoint
    pub const URL: &str = "AMP_URL";
    /// API token as configured
    pub const TOKEN: &str = "AMP_TOKEN";
    /// API token as read by the agent
    pub const API_KEY: &str = "AMP_API_KEY";
    /// Authentication command
    pub const AUTH_CMD: &str = "AMP_AUTH_CMD";
    /// Extra arguments, shell-word split
    pub const EXTRA_ARGS: &str = "AMP_EXTRA_ARGS";
    /// TLS verification bypass for local endpoints
    pub const NODE_TLS: &str = "NODE_TLS_REJECT_UNAUTHORIZED";
    /// Toolbox roots, separated by `:` or `,` (`;` on Windows)
    pub const TOOLBOX_PATHS: &str = "AMP_TOOLBOX_PATHS";
    /// Set to `0` or `false` to ignore toolboxes
    pub const ENABLE_TOOLBOXES: &str = "AMP_ENABLE_TOOLBOXES";
    /// Name of the active toolbox profile
    pub const TOOLBOX_PROFILE: &str = "AMP_ACTIVE_TOOLBOX_PROFILE";
    /// Highest-priority toolbox root
    pub const TOOLBOX: &str = "AMP_TOOLBOX";
}

/// Flags requesting machine-readable streaming output
pub const STREAMING_ARGS: &[&str] = &["--execute", "--stream-json"];

/// Node flags used when the local agent is a script
pub const NODE_ARGS: &[&str] = &["--enable-source-maps", "--no-warnings"];

/// Variables describing a local endpoint, stripped in hosted mode
pub const LOCAL_ENDPOINT_VARS: &[&str] = &[env_keys::URL, env_keys::NODE_TLS, env_keys::CLI_PATH];

/// Locale pinned for the child so error text stays untranslated
pub const PINNED_LOCALE: &str = "C";

//! Constants and default values for the berth agent

/// Default bind address for the agent HTTP server
pub const DEFAULT_AGENT_HOST: &str = "0.0.0.0";

/// Default port for the agent HTTP server
pub const DEFAULT_AGENT_PORT: u16 = 7005;

/// Placeholder token value that is rejected at request time
pub const TOKEN_PLACEHOLDER: &str = "CHANGE_ME";

/// Default container port an application listens on
pub const DEFAULT_CONTAINER_PORT: u16 = 3000;

/// Container name prefix shared by all managed applications
pub const CONTAINER_NAME_PREFIX: &str = "rt-u";

/// Default database name template
pub const DEFAULT_DB_TEMPLATE: &str = "db_u{userId}_a{appId}";

/// Maximum database identifier length accepted by the engine
pub const DB_NAME_MAX_LEN: usize = 63;

/// Default post-start verification window in milliseconds
pub const DEFAULT_VERIFY_WAIT_MS: u64 = 3000;

/// Interval between post-start verification polls in milliseconds
pub const VERIFY_POLL_INTERVAL_MS: u64 = 300;

/// Lines of container logs attached to crash-on-start failures
pub const CRASH_LOG_TAIL_LINES: u32 = 20;

/// Default node name reported to the control plane
pub const DEFAULT_NODE_NAME: &str = "rt-node-01";

/// Default heartbeat interval in seconds
pub const DEFAULT_HEARTBEAT_SECS: u64 = 60;

/// Default log directory for the daemon's rotated log files
pub const DEFAULT_LOG_DIR: &str = "./logs";

//! Attribute names and default values shared across factories.

/// Length of the hex fingerprint shown for resource keys.
pub const FINGERPRINT_LEN: usize = 12;

// Clause attributes understood by the server supervisor.
pub const ATTR_HOST: &str = "host";
pub const ATTR_PORT: &str = "port";
pub const ATTR_CONTEXT_PATH: &str = "contextPath";

// Clause attributes understood by servlet context factories.
pub const ATTR_URL_PATTERN: &str = "urlPattern";
pub const ATTR_SERVLET_NAME: &str = "servletName";
pub const ATTR_DISPATCHER: &str = "dispatcher";
pub const ATTR_ASYNC_SUPPORTED: &str = "asyncSupported";
pub const INIT_PARAM_PREFIX: &str = "init-";

/// Suffix some configuration sources append to list-typed attribute names.
pub const LIST_ATTR_SUFFIX: &str = ":List<String>";

pub const PROTOCOL_HTTP_1_1: &str = "HTTP/1.1";
pub const PROTOCOL_H2C: &str = "h2c";

// HTTP connection factory defaults.
pub const DEFAULT_HEADER_CACHE_SIZE: u32 = 4 * 1024;
pub const DEFAULT_INPUT_BUFFER_SIZE: u32 = 8 * 1024;
pub const DEFAULT_OUTPUT_BUFFER_SIZE: u32 = 32 * 1024;
pub const DEFAULT_REQUEST_HEADER_SIZE: u32 = 8 * 1024;
pub const DEFAULT_RESPONSE_HEADER_SIZE: u32 = 8 * 1024;
pub const DEFAULT_SECURE_PORT: u16 = 443;
pub const DEFAULT_SECURE_SCHEME: &str = "https";
pub const DEFAULT_SEND_DATE_HEADER: bool = false;
pub const DEFAULT_SEND_SERVER_VERSION: bool = true;
pub const DEFAULT_SEND_X_POWERED_BY: bool = false;

// Server connector defaults.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_INHERIT_CHANNEL: bool = false;
pub const DEFAULT_REUSE_ADDRESS: bool = true;

// Session handler defaults.
pub const DEFAULT_MAX_INACTIVE_INTERVAL_SECS: i32 = 30 * 60;
pub const DEFAULT_SESSION_COOKIE: &str = "JSESSIONID";
pub const DEFAULT_SESSION_ID_PARAMETER_NAME: &str = "jsessionid";
pub const DEFAULT_HTTP_ONLY: bool = false;
pub const DEFAULT_SECURE_REQUEST_ONLY: bool = true;
pub const DEFAULT_USING_COOKIES: bool = true;
pub const DEFAULT_REFRESH_COOKIE_AGE: i32 = 0;
pub const DEFAULT_NODE_ID_IN_SESSION_ID: bool = false;
pub const DEFAULT_CHECKING_REMOTE_SESSION_ID_ENCODING: bool = false;

// Forwarded request customizer defaults.
pub const DEFAULT_FORWARDED_HOST_HEADER: &str = "X-Forwarded-Host";
pub const DEFAULT_FORWARDED_PROTO_HEADER: &str = "X-Forwarded-Proto";
pub const DEFAULT_FORWARDED_FOR_HEADER: &str = "X-Forwarded-For";
pub const DEFAULT_FORWARDED_SERVER_HEADER: &str = "X-Forwarded-Server";

/// Session cache eviction timeout that keeps inactive sessions forever.
pub const NEVER_EVICT: i32 = -1;
pub const DEFAULT_REMOVE_UNLOADABLE_SESSIONS: bool = false;
pub const DEFAULT_SAVE_ON_CREATE: bool = false;
pub const DEFAULT_SAVE_ON_INACTIVE_EVICTION: bool = false;

// Error page handler defaults.
pub const ERROR_PAGE_GLOBAL: &str = "global";
pub const DEFAULT_ERROR_CACHE_CONTROL: &str = "must-revalidate,no-cache,no-store";
pub const DEFAULT_SHOW_MESSAGE_IN_TITLE: bool = true;
pub const DEFAULT_SHOW_STACKS: bool = true;

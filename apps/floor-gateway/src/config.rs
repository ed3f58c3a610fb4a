use std::time::Duration;

/// Gateway configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HS256 secret used to verify bearer credentials.
    pub jwt_secret: String,
    /// Roles allowed to open a realtime connection. Empty means any role.
    pub allowed_roles: Vec<String>,
    /// Port the HTTP/WebSocket server binds to.
    pub port: u16,
    /// Snowflake worker id for event ids.
    pub worker_id: u16,
    /// Tunables of the realtime core.
    pub realtime: RealtimeConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        let defaults = RealtimeConfig::default();
        Self {
            jwt_secret: required_var("AUTH_JWT_SECRET"),
            allowed_roles: std::env::var("AUTH_ALLOWED_ROLES")
                .map(|v| parse_list(&v))
                .unwrap_or_default(),
            port: parsed_var("PORT").unwrap_or(4010),
            worker_id: parsed_var("WORKER_ID").unwrap_or(0),
            realtime: RealtimeConfig {
                max_connections: parsed_var("REALTIME_MAX_CONNECTIONS")
                    .unwrap_or(defaults.max_connections),
                queue_capacity: parsed_var("REALTIME_QUEUE_CAPACITY")
                    .unwrap_or(defaults.queue_capacity),
                submit_timeout: millis_var("REALTIME_SUBMIT_TIMEOUT_MS")
                    .unwrap_or(defaults.submit_timeout),
                max_retries: parsed_var("REALTIME_MAX_RETRIES").unwrap_or(defaults.max_retries),
                retry_base_delay: millis_var("REALTIME_RETRY_BASE_MS")
                    .unwrap_or(defaults.retry_base_delay),
                retry_max_delay: millis_var("REALTIME_RETRY_MAX_MS")
                    .unwrap_or(defaults.retry_max_delay),
                starvation_limit: parsed_var("REALTIME_STARVATION_LIMIT")
                    .unwrap_or(defaults.starvation_limit),
                send_timeout: millis_var("REALTIME_SEND_TIMEOUT_MS")
                    .unwrap_or(defaults.send_timeout),
                outbound_buffer: parsed_var("REALTIME_OUTBOUND_BUFFER")
                    .unwrap_or(defaults.outbound_buffer),
                health_interval: secs_var("REALTIME_HEALTH_INTERVAL_SECS")
                    .unwrap_or(defaults.health_interval),
                health_history: parsed_var("REALTIME_HEALTH_HISTORY")
                    .unwrap_or(defaults.health_history),
                system_alert_threshold: parsed_var("REALTIME_SYSTEM_ALERT_THRESHOLD")
                    .unwrap_or(defaults.system_alert_threshold),
                inactivity_timeout: secs_var("REALTIME_INACTIVITY_TIMEOUT_SECS")
                    .unwrap_or(defaults.inactivity_timeout),
                probe_grace: secs_var("REALTIME_PROBE_GRACE_SECS")
                    .unwrap_or(defaults.probe_grace),
            },
        }
    }
}

/// Tunables for the registry, dispatcher and health monitor.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub max_connections: usize,
    /// Total queued events across all priority classes.
    pub queue_capacity: usize,
    /// How long `submit` waits for queue space before `QueueSaturated`.
    pub submit_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Consecutive dispatches that may bypass a waiting lower-priority event.
    pub starvation_limit: u32,
    /// Upper bound on one socket write; a client that stays unwritable longer
    /// is disconnected.
    pub send_timeout: Duration,
    /// Capacity of each connection's outbound frame channel.
    pub outbound_buffer: usize,
    pub health_interval: Duration,
    /// Ring-buffer capacity of each health history series.
    pub health_history: usize,
    pub system_alert_threshold: f64,
    pub inactivity_timeout: Duration,
    pub probe_grace: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            queue_capacity: 10_000,
            submit_timeout: Duration::from_millis(1000),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_millis(5000),
            starvation_limit: 8,
            send_timeout: Duration::from_millis(5000),
            outbound_buffer: 256,
            health_interval: Duration::from_secs(30),
            health_history: 120,
            system_alert_threshold: 0.5,
            inactivity_timeout: Duration::from_secs(300),
            probe_grace: Duration::from_secs(30),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn millis_var(name: &str) -> Option<Duration> {
    parsed_var(name).map(Duration::from_millis)
}

fn secs_var(name: &str) -> Option<Duration> {
    parsed_var(name).map(Duration::from_secs)
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

use mqtt_core::QoS;

const MIN_BUF_SIZE: usize = 2;
const MAX_BUF_SIZE: usize = (1 << 28) - 1;

const DEFAULT_CMD_TIMEOUT_MS: u64 = 4_000;
const DEFAULT_KEEP_ALIVE_SECS: u16 = 60;
const DEFAULT_RECONNECT_TRY_MS: u64 = 2_000;
const DEFAULT_BUF_SIZE: usize = 1024;

/// Default cap on outstanding ack-table entries (§3 Tables).
pub const ACK_MAX: usize = 64;

/// A Will message the broker publishes on this client's behalf if the
/// network connection is lost ungracefully.
#[derive(Debug, Clone)]
pub struct Will {
    pub topic: String,
    pub message: Vec<u8>,
    pub qos: QoS,
    pub retained: bool,
}

/// Recognized client options (§6 Configuration table).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client_id: String,
    pub user_name: Option<String>,
    pub password: Option<Vec<u8>>,
    pub host: String,
    pub port: u16,
    pub ca: Option<Vec<u8>>,
    pub keep_alive_interval: u16,
    pub clean_session: bool,
    pub cmd_timeout_ms: u64,
    pub reconnect_try_duration_ms: u64,
    pub will: Option<Will>,
    pub read_buf_size: usize,
    pub write_buf_size: usize,
}

impl ClientConfig {
    pub fn builder(client_id: impl Into<String>, host: impl Into<String>, port: u16) -> ClientConfigBuilder {
        ClientConfigBuilder::new(client_id, host, port)
    }
}

/// Builds a [`ClientConfig`], clamping buffer sizes to `[2, 2^28-1]` the way
/// `build()` must (§6: "Clamped to [2, 2^28-1]; defaults otherwise").
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new(client_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        ClientConfigBuilder {
            config: ClientConfig {
                client_id: client_id.into(),
                user_name: None,
                password: None,
                host: host.into(),
                port,
                ca: None,
                keep_alive_interval: DEFAULT_KEEP_ALIVE_SECS,
                clean_session: true,
                cmd_timeout_ms: DEFAULT_CMD_TIMEOUT_MS,
                reconnect_try_duration_ms: DEFAULT_RECONNECT_TRY_MS,
                will: None,
                read_buf_size: DEFAULT_BUF_SIZE,
                write_buf_size: DEFAULT_BUF_SIZE,
            },
        }
    }

    pub fn credentials(mut self, user_name: impl Into<String>, password: impl Into<Vec<u8>>) -> Self {
        self.config.user_name = Some(user_name.into());
        self.config.password = Some(password.into());
        self
    }

    pub fn ca(mut self, ca: impl Into<Vec<u8>>) -> Self {
        self.config.ca = Some(ca.into());
        self
    }

    pub fn keep_alive_interval(mut self, secs: u16) -> Self {
        self.config.keep_alive_interval = secs;
        self
    }

    pub fn clean_session(mut self, clean_session: bool) -> Self {
        self.config.clean_session = clean_session;
        self
    }

    pub fn cmd_timeout_ms(mut self, ms: u64) -> Self {
        self.config.cmd_timeout_ms = ms;
        self
    }

    pub fn reconnect_try_duration_ms(mut self, ms: u64) -> Self {
        self.config.reconnect_try_duration_ms = ms;
        self
    }

    pub fn will(mut self, will: Will) -> Self {
        self.config.will = Some(will);
        self
    }

    pub fn read_buf_size(mut self, size: usize) -> Self {
        self.config.read_buf_size = size;
        self
    }

    pub fn write_buf_size(mut self, size: usize) -> Self {
        self.config.write_buf_size = size;
        self
    }

    pub fn build(mut self) -> ClientConfig {
        self.config.read_buf_size = self.config.read_buf_size.clamp(MIN_BUF_SIZE, MAX_BUF_SIZE);
        self.config.write_buf_size = self.config.write_buf_size.clamp(MIN_BUF_SIZE, MAX_BUF_SIZE);
        self.config
    }
}

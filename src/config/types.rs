use serde::Deserialize;

/// Main configuration structure for the harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub selectors: SelectorConfig,
}

/// Crawl behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Page listing every top-level category
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum number of units processed concurrently per stage
    #[serde(rename = "pool-size", default = "default_pool_size")]
    pub pool_size: u32,

    /// Fetch attempts per page before it is declared failed
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Upper bound for a single fetch attempt (seconds)
    #[serde(rename = "attempt-timeout-secs", default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,

    /// Number of listings per Stage 4 unit
    #[serde(rename = "item-batch-size", default = "default_item_batch_size")]
    pub item_batch_size: u32,

    /// Whether the full pipeline runs Stage 4
    #[serde(rename = "fetch-item-details", default = "default_true")]
    pub fetch_item_details: bool,

    /// Whether Stage 2 follows pagination on category pages
    #[serde(rename = "paginate-categories", default)]
    pub paginate_categories: bool,
}

/// Per-attempt browsing session configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    #[serde(rename = "connect-timeout-secs")]
    pub connect_timeout_secs: u64,

    /// Substrings that identify a bot-challenge page
    #[serde(rename = "challenge-markers")]
    pub challenge_markers: Vec<String>,

    /// Delay before re-requesting a challenged page (milliseconds)
    #[serde(rename = "challenge-settle-ms")]
    pub challenge_settle_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
                .to_string(),
            connect_timeout_secs: 30,
            challenge_markers: vec![
                "challenge-platform".to_string(),
                "cf-chl-".to_string(),
                "<title>Just a moment...</title>".to_string(),
            ],
            challenge_settle_ms: 2000,
        }
    }
}

/// Anonymizing egress process configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EgressConfig {
    /// Which egress client `binary` is
    pub kind: EgressKind,

    /// Executable launched as the egress process
    pub binary: String,

    /// Arguments passed to the executable
    pub args: Vec<String>,

    /// Host the SOCKS and control ports listen on
    pub host: String,

    #[serde(rename = "socks-port")]
    pub socks_port: u16,

    #[serde(rename = "control-port")]
    pub control_port: u16,

    #[serde(rename = "control-password")]
    pub control_password: Option<String>,

    /// Time granted to the process before it is considered up (milliseconds)
    #[serde(rename = "health-wait-ms")]
    pub health_wait_ms: u64,

    /// Check that the SOCKS port accepts connections after the health wait
    #[serde(rename = "check-socks")]
    pub check_socks: bool,

    /// Delay after an identity rotation (milliseconds)
    #[serde(rename = "identity-settle-ms")]
    pub identity_settle_ms: u64,

    /// Endpoint answering `{"IP": "..."}`, queried after an identity rotation
    #[serde(rename = "ip-check-url")]
    pub ip_check_url: Option<String>,

    /// Client settings used when `kind = "nym"`
    pub nym: NymConfig,
}

/// Egress client flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EgressKind {
    /// Tor daemon with a control port for identity rotation
    Tor,
    /// Nym SOCKS5 client (`nym-socks5-client`)
    Nym,
}

impl std::fmt::Display for EgressKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tor => f.write_str("tor"),
            Self::Nym => f.write_str("nym"),
        }
    }
}

/// Nym SOCKS5 client settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NymConfig {
    /// Client identity passed as `--id`
    #[serde(rename = "client-id")]
    pub client_id: String,

    /// Service provider address; when set the client is initialized before
    /// its first run
    pub provider: Option<String>,

    #[serde(rename = "use-reply-surbs")]
    pub use_reply_surbs: bool,
}

impl Default for NymConfig {
    fn default() -> Self {
        Self {
            client_id: "harvester".to_string(),
            provider: None,
            use_reply_surbs: true,
        }
    }
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            kind: EgressKind::Tor,
            binary: "tor".to_string(),
            args: vec![
                "--SocksPort".to_string(),
                "9050".to_string(),
                "--ControlPort".to_string(),
                "9051".to_string(),
            ],
            host: "127.0.0.1".to_string(),
            socks_port: 9050,
            control_port: 9051,
            control_password: None,
            health_wait_ms: 5000,
            check_socks: true,
            identity_settle_ms: 5000,
            ip_check_url: None,
            nym: NymConfig::default(),
        }
    }
}

/// Run workspace and store configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one sub-directory per run
    #[serde(rename = "output-dir")]
    pub output_dir: String,

    /// Bounded wait on the store write lock (milliseconds)
    #[serde(rename = "busy-timeout-ms")]
    pub busy_timeout_ms: u64,

    /// Batch insert attempts before a batch is dropped
    #[serde(rename = "insert-attempts")]
    pub insert_attempts: u32,

    #[serde(rename = "retry-delay-ms")]
    pub retry_delay_ms: u64,

    /// Upper bound of the random delay added to each retry (milliseconds)
    #[serde(rename = "retry-jitter-ms")]
    pub retry_jitter_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: "output/catalog".to_string(),
            busy_timeout_ms: 5000,
            insert_attempts: 5,
            retry_delay_ms: 500,
            retry_jitter_ms: 500,
        }
    }
}

/// CSS selectors used to extract records from raw markup
///
/// Defaults follow the layout of the source site.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SelectorConfig {
    /// Links to categories on the base page
    pub category_link: String,
    /// Container holding subcategory links; the nth match is used
    pub subcategory_container: String,
    pub subcategory_container_index: usize,
    /// Links to subcategories inside the container
    pub subcategory_link: String,
    /// Name and count elements inside a category/subcategory link
    pub entry_name: String,
    pub entry_count: String,
    /// Entries whose name starts with this prefix are placeholders
    pub placeholder_prefix: String,

    pub pagination: String,
    pub pagination_next: String,

    pub listing_item: String,
    /// Class that marks the end of the organic listing block
    pub listing_stop_class: String,
    pub listing_title: String,
    pub listing_price: String,
    pub listing_image: String,

    pub item_wrapper: String,
    pub item_title: String,
    pub item_subtitle: String,
    pub item_id: String,
    pub item_location: String,
    pub item_location_prefix: String,
    pub item_price: String,
    pub item_price_history: String,
    pub item_images: String,
    pub item_attribute: String,
    pub item_attribute_label: String,
    pub item_attribute_value: String,
    pub item_spec: String,
    pub item_description: String,
    pub item_extra: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            category_link: ".marki nobr a".to_string(),
            subcategory_container: "div.marki".to_string(),
            subcategory_container_index: 1,
            subcategory_link: "nobr a".to_string(),
            entry_name: "span".to_string(),
            entry_count: "n".to_string(),
            placeholder_prefix: "--".to_string(),
            pagination: ".pagination".to_string(),
            pagination_next: "a.saveSlink.next".to_string(),
            listing_item: ".ads2023 .item".to_string(),
            listing_stop_class: "fakti".to_string(),
            listing_title: ".zaglavie a.title".to_string(),
            listing_price: ".price div".to_string(),
            listing_image: ".photo .big img".to_string(),
            item_wrapper: ".ad2023".to_string(),
            item_title: ".obTitle h1".to_string(),
            item_subtitle: ".obTitle h1 span".to_string(),
            item_id: ".obTitle .obiava".to_string(),
            item_location: ".carLocation span".to_string(),
            item_location_prefix: "Намира се в".to_string(),
            item_price: ".Price".to_string(),
            item_price_history: ".priceHistory statistiki div".to_string(),
            item_images: ".smallPicturesGallery img".to_string(),
            item_attribute: ".mainCarParams .item".to_string(),
            item_attribute_label: ".mpLabel".to_string(),
            item_attribute_value: ".mpInfo".to_string(),
            item_spec: ".techData .items .item".to_string(),
            item_description: ".moreInfo .text".to_string(),
            item_extra: ".carExtri .items div".to_string(),
        }
    }
}

fn default_pool_size() -> u32 {
    8
}

fn default_max_attempts() -> u32 {
    3
}

fn default_attempt_timeout() -> u64 {
    90
}

fn default_item_batch_size() -> u32 {
    100
}

fn default_true() -> bool {
    true
}

impl EgressConfig {
    /// SOCKS endpoint handed to every fetch attempt
    ///
    /// `socks5h` resolves hostnames through the egress as well.
    pub fn proxy_endpoint(&self) -> String {
        format!("socks5h://{}:{}", self.host, self.socks_port)
    }
}

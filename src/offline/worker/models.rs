//! Cache worker configuration

/// Cache worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Cache version; must change whenever the precache manifest changes
    pub version: String,
    /// Partition name prefix
    pub cache_prefix: String,
    /// Origin the app shell is served from; relative paths resolve against it
    pub origin: String,
    /// Shell resources cached on install
    pub precache: Vec<String>,
    /// Path of the shell's index document
    pub index_path: String,
    /// Hosts never intercepted (suffix match), e.g. the data API host
    pub excluded_hosts: Vec<String>,
    /// Path prefixes never intercepted (analytics and data endpoints)
    pub excluded_path_prefixes: Vec<String>,
    /// Extensions served cache-first
    pub asset_extensions: Vec<String>,
}

impl WorkerConfig {
    pub fn new(version: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            cache_prefix: "salon".to_string(),
            origin: origin.into(),
            precache: ["/", "/index.html", "/manifest.json", "/favicon.ico"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
            index_path: "/index.html".to_string(),
            excluded_hosts: vec!["supabase.co".to_string()],
            excluded_path_prefixes: vec![
                "/rest/".to_string(),
                "/auth/".to_string(),
                "/realtime/".to_string(),
                "/_vercel/insights".to_string(),
                "/analytics".to_string(),
            ],
            asset_extensions: ["js", "mjs", "css", "woff", "woff2", "ttf", "otf", "eot"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }

    pub fn shell_cache_name(&self) -> String {
        format!("{}-shell-{}", self.cache_prefix, self.version)
    }

    pub fn runtime_cache_name(&self) -> String {
        format!("{}-runtime-{}", self.cache_prefix, self.version)
    }

    /// The partitions that survive activation
    pub fn valid_caches(&self) -> [String; 2] {
        [self.shell_cache_name(), self.runtime_cache_name()]
    }
}

/// Log tags identifying the component a message comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    Pool,
    Cache,
    Index,
    Gc,
    Gaps,
    Fetcher,
    Router,
    Persist,
    Registry,
    Config,
    System,
}

impl LogTag {
    /// All tags, in display order
    pub fn all() -> &'static [LogTag] {
        &[
            LogTag::Pool,
            LogTag::Cache,
            LogTag::Index,
            LogTag::Gc,
            LogTag::Gaps,
            LogTag::Fetcher,
            LogTag::Router,
            LogTag::Persist,
            LogTag::Registry,
            LogTag::Config,
            LogTag::System,
        ]
    }

    /// Key used by `--debug-<key>` flags and config tag lists
    pub fn to_debug_key(&self) -> String {
        self.to_plain_string().to_lowercase()
    }

    /// Uppercase label written to console and file
    pub fn to_plain_string(&self) -> String {
        match self {
            LogTag::Pool => "POOL",
            LogTag::Cache => "CACHE",
            LogTag::Index => "INDEX",
            LogTag::Gc => "GC",
            LogTag::Gaps => "GAPS",
            LogTag::Fetcher => "FETCHER",
            LogTag::Router => "ROUTER",
            LogTag::Persist => "PERSIST",
            LogTag::Registry => "REGISTRY",
            LogTag::Config => "CONFIG",
            LogTag::System => "SYSTEM",
        }
        .to_string()
    }

    pub fn from_debug_key(key: &str) -> Option<LogTag> {
        let key = key.trim().to_lowercase();
        LogTag::all()
            .iter()
            .copied()
            .find(|tag| tag.to_debug_key() == key)
    }
}

impl std::fmt::Display for LogTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_plain_string())
    }
}

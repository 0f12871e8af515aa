pub mod config;
pub mod jolokia;
pub mod scraper;
pub mod server;

/// Name rendered in the root banner
pub const EXPORTER_NAME: &str = "🌊 Seastat Cassandra Exporter";

/// Build-time identity of the exporter
///
/// Created once at startup and handed to whatever needs to render it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub name: String,
    pub version: String,
    pub commit: String,
}

impl BuildInfo {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        commit: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            commit: commit.into(),
        }
    }

    /// Build info baked in at compile time
    ///
    /// The commit comes from `SEASTAT_GIT_COMMIT` when set during the build.
    pub fn from_build_env() -> Self {
        Self::new(
            EXPORTER_NAME,
            env!("CARGO_PKG_VERSION"),
            option_env!("SEASTAT_GIT_COMMIT").unwrap_or("unknown"),
        )
    }

    /// `<name> <version> (Commit: <hash>)`
    pub fn banner(&self) -> String {
        format!("{} {} (Commit: {})", self.name, self.version, self.commit)
    }
}

//! Version information and build metadata display

use std::fmt;

/// Version and build information of the decoder binary
pub struct VersionInfo {
    /// Package version from Cargo.toml
    pub decoder_version: &'static str,
    /// Version of the lvcsr-search engine linked in
    pub search_version: &'static str,
    /// Target triple (e.g., x86_64-unknown-linux-gnu)
    pub target: &'static str,
    /// Build profile (debug or release)
    pub profile: &'static str,
    /// Git commit hash (if available)
    pub git_commit: Option<&'static str>,
    /// Built from a tree with uncommitted changes
    pub git_dirty: bool,
    /// Build timestamp
    pub build_timestamp: &'static str,
}

impl VersionInfo {
    /// Get current version information
    pub fn current() -> Self {
        Self {
            decoder_version: env!("CARGO_PKG_VERSION"),
            search_version: lvcsr_search::VERSION,
            target: env!("TARGET"),
            profile: if cfg!(debug_assertions) {
                "debug"
            } else {
                "release"
            },
            git_commit: option_env!("GIT_COMMIT_HASH"),
            git_dirty: option_env!("GIT_DIRTY").is_some(),
            build_timestamp: env!("BUILD_TIMESTAMP"),
        }
    }

    /// Model and language model formats this build reads
    pub fn supported_formats(&self) -> Vec<&'static str> {
        vec![
            "JSON model bundle (phone HMMs, HMM list, dictionary)",
            "ARPA word N-gram, forward and backward (up to trigram)",
            "DFA grammar (.dfa automaton + category table)",
            "JSON acoustic score matrix (frames x states)",
        ]
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "lvcsr-decoder {}", self.decoder_version)?;
        writeln!(f)?;

        writeln!(f, "Build Information:")?;
        writeln!(f, "  Search engine: {}", self.search_version)?;
        writeln!(f, "  Target:        {}", self.target)?;
        writeln!(f, "  Profile:       {}", self.profile)?;
        writeln!(f, "  Build Date:    {}", self.build_timestamp)?;

        if let Some(commit) = self.git_commit {
            let dirty = if self.git_dirty { " (modified)" } else { "" };
            writeln!(f, "  Git Commit:    {}{}", commit, dirty)?;
        }

        writeln!(f)?;
        writeln!(f, "Supported Formats:")?;
        for format in self.supported_formats() {
            writeln!(f, "  • {}", format)?;
        }

        Ok(())
    }
}

/// Short version string (for --version)
pub fn version_short() -> String {
    format!("lvcsr-decoder {}", env!("CARGO_PKG_VERSION"))
}

/// Long version string (for `version --verbose`)
pub fn version_long() -> String {
    VersionInfo::current().to_string()
}

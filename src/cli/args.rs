//! Command line argument parsing

use crate::platform::script::FetchConfig;
use clap::{ArgAction, Parser};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Resolve signature-ciphered stream URLs with a player script
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Player script URL, site-relative path, or saved file
    pub script: String,

    /// JSON array of formats to resolve ('-' reads stdin)
    #[arg(long, value_name = "FILE")]
    pub formats: Option<PathBuf>,

    /// Decipher a single signature value
    #[arg(long, value_name = "VALUE")]
    pub sig: Option<String>,

    /// Transform a single n-parameter value
    #[arg(long, value_name = "VALUE")]
    pub n: Option<String>,

    /// HTTP timeout (e.g., 30s, 1m)
    #[arg(long, value_name = "DURATION", default_value = "30s")]
    pub timeout: humantime::Duration,

    /// Override User-Agent header
    #[arg(long, value_name = "USER_AGENT")]
    pub user_agent: Option<String>,

    /// Proxy URL (http/https/socks)
    #[arg(long, value_name = "URL")]
    pub proxy: Option<String>,

    /// Origin for site-relative script paths
    #[arg(long, value_name = "URL", default_value = "https://www.youtube.com")]
    pub base_url: String,

    /// Verbose output (repeat for more)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Quiet output (only errors)
    #[arg(short, long)]
    pub quiet: bool,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,
}

impl Args {
    /// Get HTTP timeout as Duration
    pub fn timeout_duration(&self) -> Duration {
        self.timeout.into()
    }

    /// Fetch configuration for the HTTP script fetcher
    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            timeout: self.timeout_duration(),
            user_agent: self.user_agent.clone(),
            proxy_url: self.proxy.clone(),
            base_url: self.base_url.clone(),
        }
    }

    /// Whether the script argument names a file on disk
    pub fn is_local_script(&self) -> bool {
        let remote = self.script.starts_with("http://")
            || self.script.starts_with("https://")
            || self.script.starts_with("//");
        !remote && Path::new(&self.script).is_file()
    }

    /// Whether formats are read from stdin
    pub fn formats_from_stdin(&self) -> bool {
        self.formats.as_deref() == Some(Path::new("-"))
    }

    /// Get output verbosity level
    pub fn verbosity_level(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else {
            match self.verbose {
                0 => VerbosityLevel::Normal,
                1 => VerbosityLevel::Verbose,
                _ => VerbosityLevel::Trace,
            }
        }
    }

    /// Default log filter when `RUST_LOG` is unset
    pub fn log_filter(&self) -> &'static str {
        match self.verbosity_level() {
            VerbosityLevel::Quiet => "error",
            VerbosityLevel::Normal => "warn",
            VerbosityLevel::Verbose => "ryt_decipher=debug,info",
            VerbosityLevel::Trace => "trace",
        }
    }
}

/// Output verbosity level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbosityLevel {
    /// Quiet (only errors)
    Quiet,
    /// Normal (warnings and errors)
    Normal,
    /// Verbose (debug info)
    Verbose,
    /// Everything
    Trace,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            script: String::new(),
            formats: None,
            sig: None,
            n: None,
            timeout: humantime::Duration::from(Duration::from_secs(30)),
            user_agent: None,
            proxy: None,
            base_url: "https://www.youtube.com".to_string(),
            verbose: 0,
            quiet: false,
            pretty: false,
        }
    }
}

//! Command-line flags and the fixed `fuser::MountOption` set derived from them.

use std::path::PathBuf;

use clap::Parser;
use fuser::MountOption;

/// FUSE client for a remote `BasicFileService`.
#[derive(Debug, Parser)]
#[command(name = "afsd")]
pub struct Config {
    /// Mount point.
    #[arg(short = 'm', long, default_value = "root")]
    pub mountpoint: PathBuf,

    /// Cache folder.
    #[arg(short = 'c', long, default_value = "cache")]
    pub cache_dir: PathBuf,

    /// Server endpoint.
    #[arg(long = "server", default_value = "localhost:61512")]
    pub server: String,

    /// Disable server downloads and retain recovered cache files, for deterministic
    /// crash-demo testing.
    #[arg(long = "crash")]
    pub crash: bool,
}

impl Config {
    /// Parses the process arguments. The documented flag spellings are single-dash
    /// (`-server <host:port>`, `-crash`), which clap's derive only knows as `--server`/
    /// `--crash`, so those two are normalized before parsing; both spellings work.
    pub fn parse_compat() -> Self {
        Self::parse_from(std::env::args().map(normalize_flag))
    }

    /// The server endpoint as a URI `mount2`'s transport can connect to.
    pub fn server_uri(&self) -> String {
        if self.server.starts_with("http://") || self.server.starts_with("https://") {
            self.server.clone()
        } else {
            format!("http://{}", self.server)
        }
    }

    /// The fixed mount options: read-write, named for mtab, auto-unmount on exit.
    pub fn mount_options(&self) -> Vec<MountOption> {
        vec![
            MountOption::RW,
            MountOption::FSName("afsd".to_string()),
            MountOption::AutoUnmount,
        ]
    }
}

/// Rewrites the single-dash long flags to the double-dash form clap expects; everything
/// else (including the `-m`/`-c` shorts) passes through untouched.
fn normalize_flag(arg: String) -> String {
    for name in ["server", "crash"] {
        if arg == format!("-{name}") || arg.starts_with(&format!("-{name}=")) {
            return format!("-{arg}");
        }
    }
    arg
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_normalized(args: &[&str]) -> Config {
        Config::parse_from(args.iter().map(|arg| normalize_flag(arg.to_string())))
    }

    #[test]
    fn defaults_parse_from_program_name_alone() {
        let config = Config::parse_from(["afsd"]);
        assert_eq!(config.mountpoint, PathBuf::from("root"));
        assert_eq!(config.cache_dir, PathBuf::from("cache"));
        assert_eq!(config.server, "localhost:61512");
        assert!(!config.crash);
    }

    #[test]
    fn server_uri_adds_scheme_when_missing() {
        let config = Config::parse_from(["afsd", "--server", "example.com:1234"]);
        assert_eq!(config.server_uri(), "http://example.com:1234");
    }

    #[test]
    fn server_uri_is_untouched_when_scheme_present() {
        let config = Config::parse_from(["afsd", "--server", "https://example.com"]);
        assert_eq!(config.server_uri(), "https://example.com");
    }

    #[test]
    fn crash_flag_parses() {
        let config = Config::parse_from(["afsd", "--crash"]);
        assert!(config.crash);
    }

    #[test]
    fn single_dash_long_flags_are_accepted() {
        let config = parse_normalized(&["afsd", "-server", "example.com:1234", "-crash"]);
        assert_eq!(config.server, "example.com:1234");
        assert!(config.crash);
    }

    #[test]
    fn single_dash_flag_with_equals_value_is_accepted() {
        let config = parse_normalized(&["afsd", "-server=example.com:1234"]);
        assert_eq!(config.server, "example.com:1234");
    }

    #[test]
    fn short_flags_parse_with_a_single_dash() {
        let config = parse_normalized(&["afsd", "-m", "mnt", "-c", "store"]);
        assert_eq!(config.mountpoint, PathBuf::from("mnt"));
        assert_eq!(config.cache_dir, PathBuf::from("store"));
    }

    #[test]
    fn mount_options_are_fixed() {
        let config = Config::parse_from(["afsd"]);
        let options = config.mount_options();
        assert_eq!(options.len(), 3);
        assert!(options.contains(&MountOption::AutoUnmount));
    }
}

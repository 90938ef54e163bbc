use clap::Parser;
use std::path::PathBuf;

/// Monitor battery management systems over Bluetooth Low Energy and relay
/// their readings to Telegram.
#[derive(Debug, Parser)]
#[command(name = "solarmon", version, about)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "SOLARMON_CONFIG", default_value = "solarmon.toml")]
    pub config: PathBuf,

    /// Log filter, e.g. `info` or `solarmon_ble=debug`. `RUST_LOG` wins when set.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Print the validated configuration and exit.
    #[arg(long)]
    pub dry_run: bool,

    /// Telegram bot token.
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["solarmon"]).unwrap();
        assert_eq!(cli.log_level, "info");
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "solarmon",
            "--config",
            "/etc/solarmon.toml",
            "--log-level",
            "debug",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/solarmon.toml"));
        assert_eq!(cli.log_level, "debug");
        assert!(cli.dry_run);
    }

    #[test]
    fn test_command_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

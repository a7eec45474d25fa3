use clap::Parser;

use crate::config::DEFAULT_CONFIG_FILE;

/// SPM-1 meter to MQTT store-and-forward bridge
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_to_bundled_name() {
        let args = Args::parse_from(["spm-bridge"]);
        assert_eq!(args.config, DEFAULT_CONFIG_FILE);
    }

    #[test]
    fn test_config_flag_overrides_path() {
        let args = Args::parse_from(["spm-bridge", "--config", "/etc/spm/site.toml"]);
        assert_eq!(args.config, "/etc/spm/site.toml");
        let short = Args::parse_from(["spm-bridge", "-c", "x.toml"]);
        assert_eq!(short.config, "x.toml");
    }
}

//! CLI definition using clap.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{Config, Environment};

/// projectd - project lifecycle state sync service
#[derive(Parser, Debug)]
#[command(name = "projectd")]
#[command(version)]
#[command(
    about = "Consumes project lifecycle events, keeps project state current, and streams updates to watchers"
)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "PROJECTD_CONFIG")]
    pub config: Option<PathBuf>,

    /// HTTP bind address (overrides server.bind)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Deployment environment (overrides env)
    #[arg(short, long, value_parser = parse_environment)]
    pub env: Option<Environment>,
}

impl Cli {
    /// Apply flag overrides on top of an already loaded config.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(bind) = &self.bind {
            config.server.bind.clone_from(bind);
        }
        if let Some(env) = self.env {
            config.env = env;
        }
    }
}

fn parse_environment(value: &str) -> Result<Environment, String> {
    value.parse().map_err(|e: crate::config::ConfigError| e.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from(["projectd", "--bind", "127.0.0.1:9000", "--env", "prod"])
            .unwrap();
        let mut config = Config::default();
        cli.apply_to(&mut config);

        assert_eq!(config.server.bind, "127.0.0.1:9000");
        assert_eq!(config.env, Environment::Prod);
    }

    #[test]
    fn test_unknown_env_flag_rejected() {
        assert!(Cli::try_parse_from(["projectd", "--env", "staging"]).is_err());
    }

    #[test]
    fn test_no_flags_leave_config_untouched() {
        let cli = Cli::try_parse_from(["projectd"]).unwrap();
        let mut config = Config::default();
        cli.apply_to(&mut config);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

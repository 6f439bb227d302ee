use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::provision::AppCredentials;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub serve: ServeArgs,
}

impl Cli {
    /// Running without a subcommand serves HTTP.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Serve(self.serve))
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to the store and serve the items API.
    Serve(ServeArgs),
    /// Create the application user in the store, then exit.
    Provision(ProvisionArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Store connection string. The scheme picks the backend.
    #[arg(long, env = "STORE_URI", default_value = "memory://")]
    pub store_uri: String,

    /// Address to listen on.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Length of one rate-limit window, in milliseconds. Must be positive.
    #[arg(
        long,
        env = "RATE_LIMIT_WINDOW_MS",
        default_value_t = 15 * 60 * 1000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub rate_limit_window_ms: u64,

    /// Requests a single client may make per window.
    #[arg(long, env = "RATE_LIMIT_MAX", default_value_t = 100)]
    pub rate_limit_max: u32,

    /// Largest accepted request body, in bytes.
    #[arg(long, env = "BODY_LIMIT_BYTES", default_value_t = 1024 * 1024)]
    pub body_limit_bytes: usize,

    #[arg(long, env = "APP_ENV", value_enum, default_value_t = Mode::Production)]
    pub mode: Mode,

    /// Upper bound on a single store connection attempt, in milliseconds.
    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value_t = 5000)]
    pub connect_timeout_ms: u64,

    /// Pause between failed store connection attempts, in milliseconds.
    #[arg(long, env = "CONNECT_RETRY_DELAY_MS", default_value_t = 3000)]
    pub connect_retry_delay_ms: u64,
}

impl ServeArgs {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ProvisionArgs {
    /// Admin connection string used to create the user.
    #[arg(long, env = "STORE_URI", default_value = "memory://")]
    pub store_uri: String,

    #[command(flatten)]
    pub credentials: AppCredentials,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Development,
    Production,
    Test,
}

impl Mode {
    /// Internal error details only leave the process in development.
    pub fn exposes_internals(self) -> bool {
        self == Mode::Development
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "items-service",
            "--port",
            "8080",
            "--mode",
            "development",
            "--rate-limit-max",
            "5",
            "--connect-retry-delay-ms",
            "10",
        ])
        .expect("valid flags");

        let Command::Serve(args) = cli.into_command() else {
            panic!("expected serve");
        };
        assert_eq!(args.port, 8080);
        assert_eq!(args.mode, Mode::Development);
        assert_eq!(args.rate_limit_max, 5);
        assert_eq!(args.connect_retry_delay(), Duration::from_millis(10));
        assert!(args.mode.exposes_internals());
    }

    #[test]
    fn provision_subcommand_takes_credentials() {
        let cli = Cli::try_parse_from([
            "items-service",
            "provision",
            "--db-name",
            "inventory",
            "--db-username",
            "svc",
            "--db-password",
            "pw",
        ])
        .expect("valid flags");

        let Command::Provision(args) = cli.into_command() else {
            panic!("expected provision");
        };
        assert_eq!(args.credentials.database, "inventory");
        assert_eq!(args.credentials.username, "svc");
        assert_eq!(args.credentials.password, "pw");
    }

    #[test]
    fn only_development_exposes_internals() {
        assert!(!Mode::Production.exposes_internals());
        assert!(!Mode::Test.exposes_internals());
    }

    #[test]
    fn rejects_an_empty_rate_limit_window() {
        let err = Cli::try_parse_from(["items-service", "--rate-limit-window-ms", "0"])
            .expect_err("a zero window would never limit anything");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);

        let cli = Cli::try_parse_from(["items-service", "--rate-limit-window-ms", "1"])
            .expect("one millisecond is a valid window");
        assert_eq!(cli.serve.rate_limit_window(), Duration::from_millis(1));
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["items-service", "--mode", "staging"]).is_err());
    }
}

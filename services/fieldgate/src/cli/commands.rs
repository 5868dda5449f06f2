//! Command-line surface. Every option carries a `FIELDGATE_*` environment
//! binding so container deployments never pass flags.

use clap::{
    Arg, ColorChoice, Command,
    builder::{
        ValueParser,
        styling::{AnsiColor, Effects, Styles},
    },
};

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_SIGNING_KEY: &str = "signing-key";
pub const ARG_ACCESS_TTL: &str = "access-ttl";
pub const ARG_REFRESH_TTL: &str = "refresh-ttl";
pub const ARG_SESSION_TTL: &str = "session-ttl";
pub const ARG_OVERRIDE_MINUTES: &str = "override-minutes";
pub const ARG_CACHE_TTL_SECONDS: &str = "cache-ttl-seconds";
pub const ARG_VERBOSITY: &str = "verbosity";

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("fieldgate")
        .about("Access-control and device-policy core for fielded survey devices")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("FIELDGATE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long("dsn")
                .help("Database connection string; omit to run on the in-memory store")
                .env("FIELDGATE_DSN"),
        )
        .arg(
            Arg::new(ARG_SIGNING_KEY)
                .long("signing-key")
                .help("Ed25519 signing seed (32 bytes, hex or base64url)")
                .env("FIELDGATE_SIGNING_KEY")
                .required(true),
        )
        .arg(
            Arg::new(ARG_ACCESS_TTL)
                .long("access-ttl")
                .help("Access token TTL, e.g. 15m")
                .default_value("15m")
                .env("FIELDGATE_ACCESS_TTL"),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL)
                .long("refresh-ttl")
                .help("Refresh token TTL, e.g. 7d")
                .default_value("7d")
                .env("FIELDGATE_REFRESH_TTL"),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL)
                .long("session-ttl")
                .help("Session TTL, e.g. 12h")
                .default_value("12h")
                .env("FIELDGATE_SESSION_TTL"),
        )
        .arg(
            Arg::new(ARG_OVERRIDE_MINUTES)
                .long("override-minutes")
                .help("Supervisor override window in minutes")
                .default_value("120")
                .env("FIELDGATE_OVERRIDE_MINUTES")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_CACHE_TTL_SECONDS)
                .long("cache-ttl-seconds")
                .help("Permission cache TTL in seconds")
                .default_value("300")
                .env("FIELDGATE_CACHE_TTL_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Verbosity level: -v WARN, -vv INFO, -vvv DEBUG, -vvvv TRACE")
                .env("FIELDGATE_LOG_LEVEL")
                .global(true)
                .action(clap::ArgAction::Count)
                .value_parser(validator_log_level()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_command_line() {
        temp_env::with_vars([("FIELDGATE_SIGNING_KEY", None::<&str>)], || {
            let seed = "11".repeat(32);
            let matches = new()
                .try_get_matches_from(["fieldgate", "--signing-key", seed.as_str()])
                .expect("valid arguments");
            assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(8080));
            assert_eq!(
                matches.get_one::<String>(ARG_ACCESS_TTL).map(String::as_str),
                Some("15m")
            );
        });
    }

    #[test]
    fn signing_key_is_required() {
        temp_env::with_vars([("FIELDGATE_SIGNING_KEY", None::<&str>)], || {
            let result = new().try_get_matches_from(["fieldgate"]);
            assert!(result.is_err());
        });
    }

    #[test]
    fn env_bindings_feed_arguments() {
        temp_env::with_vars(
            [
                ("FIELDGATE_SIGNING_KEY", Some("abc")),
                ("FIELDGATE_PORT", Some("9090")),
            ],
            || {
                let matches = new()
                    .try_get_matches_from(["fieldgate"])
                    .expect("env supplies required args");
                assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(9090));
            },
        );
    }
}

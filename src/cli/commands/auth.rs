use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

pub const ARG_LOOKUP_TIMEOUT_SECONDS: &str = "lookup-timeout-seconds";
pub const ARG_AUTHENTICATION_TOKEN_TTL_SECONDS: &str = "authentication-token-ttl-seconds";
pub const ARG_ACTIVATION_TOKEN_TTL_SECONDS: &str = "activation-token-ttl-seconds";
pub const ARG_PASSWORD_RESET_TOKEN_TTL_SECONDS: &str = "password-reset-token-ttl-seconds";
pub const ARG_DEFAULT_PERMISSION: &str = "default-permission";

#[derive(Debug, Clone)]
pub struct Options {
    pub lookup_timeout: Duration,
    pub authentication_ttl: Duration,
    pub activation_ttl: Duration,
    pub password_reset_ttl: Duration,
    pub default_permission: String,
}

impl Options {
    /// Parse authentication arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a defaulted argument is missing or the permission is blank.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let seconds = |id: &str| {
            matches
                .get_one::<u64>(id)
                .copied()
                .map(Duration::from_secs)
                .with_context(|| format!("missing required argument: --{id}"))
        };

        let default_permission = match matches.get_one::<String>(ARG_DEFAULT_PERMISSION) {
            Some(code) if !code.trim().is_empty() => code.trim().to_string(),
            _ => anyhow::bail!("missing required argument: --{ARG_DEFAULT_PERMISSION}"),
        };

        Ok(Self {
            lookup_timeout: seconds(ARG_LOOKUP_TIMEOUT_SECONDS)?,
            authentication_ttl: seconds(ARG_AUTHENTICATION_TOKEN_TTL_SECONDS)?,
            activation_ttl: seconds(ARG_ACTIVATION_TOKEN_TTL_SECONDS)?,
            password_reset_ttl: seconds(ARG_PASSWORD_RESET_TOKEN_TTL_SECONDS)?,
            default_permission,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LOOKUP_TIMEOUT_SECONDS)
                .long(ARG_LOOKUP_TIMEOUT_SECONDS)
                .help("Upper bound in seconds on each token, permission or user lookup")
                .env("VESTIBULE_LOOKUP_TIMEOUT_SECONDS")
                .default_value("3")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_AUTHENTICATION_TOKEN_TTL_SECONDS)
                .long(ARG_AUTHENTICATION_TOKEN_TTL_SECONDS)
                .help("Bearer token TTL in seconds")
                .env("VESTIBULE_AUTHENTICATION_TOKEN_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_ACTIVATION_TOKEN_TTL_SECONDS)
                .long(ARG_ACTIVATION_TOKEN_TTL_SECONDS)
                .help("Activation token TTL in seconds")
                .env("VESTIBULE_ACTIVATION_TOKEN_TTL_SECONDS")
                .default_value("259200")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_RESET_TOKEN_TTL_SECONDS)
                .long(ARG_PASSWORD_RESET_TOKEN_TTL_SECONDS)
                .help("Password reset token TTL in seconds")
                .env("VESTIBULE_PASSWORD_RESET_TOKEN_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_DEFAULT_PERMISSION)
                .long(ARG_DEFAULT_PERMISSION)
                .help("Permission code granted to every new account")
                .env("VESTIBULE_DEFAULT_PERMISSION")
                .default_value("comments:read"),
        )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const VARS: [(&str, Option<&str>); 5] = [
        ("VESTIBULE_LOOKUP_TIMEOUT_SECONDS", None),
        ("VESTIBULE_AUTHENTICATION_TOKEN_TTL_SECONDS", None),
        ("VESTIBULE_ACTIVATION_TOKEN_TTL_SECONDS", None),
        ("VESTIBULE_PASSWORD_RESET_TOKEN_TTL_SECONDS", None),
        ("VESTIBULE_DEFAULT_PERMISSION", None),
    ];

    fn command() -> Command {
        with_args(Command::new("vestibule"))
    }

    #[test]
    fn defaults() {
        temp_env::with_vars(VARS, || {
            let matches = command().get_matches_from(vec!["vestibule"]);
            let options = Options::parse(&matches).unwrap();
            assert_eq!(options.lookup_timeout, Duration::from_secs(3));
            assert_eq!(options.authentication_ttl, Duration::from_secs(86_400));
            assert_eq!(options.activation_ttl, Duration::from_secs(259_200));
            assert_eq!(options.password_reset_ttl, Duration::from_secs(3_600));
            assert_eq!(options.default_permission, "comments:read");
        });
    }

    #[test]
    fn from_env() {
        temp_env::with_vars(
            [
                ("VESTIBULE_LOOKUP_TIMEOUT_SECONDS", Some("1")),
                ("VESTIBULE_AUTHENTICATION_TOKEN_TTL_SECONDS", Some("60")),
                ("VESTIBULE_ACTIVATION_TOKEN_TTL_SECONDS", Some("120")),
                ("VESTIBULE_PASSWORD_RESET_TOKEN_TTL_SECONDS", Some("900")),
                ("VESTIBULE_DEFAULT_PERMISSION", Some("reviews:read")),
            ],
            || {
                let matches = command().get_matches_from(vec!["vestibule"]);
                let options = Options::parse(&matches).unwrap();
                assert_eq!(options.lookup_timeout, Duration::from_secs(1));
                assert_eq!(options.authentication_ttl, Duration::from_secs(60));
                assert_eq!(options.activation_ttl, Duration::from_secs(120));
                assert_eq!(options.password_reset_ttl, Duration::from_secs(900));
                assert_eq!(options.default_permission, "reviews:read");
            },
        );
    }

    #[test]
    fn blank_default_permission() {
        temp_env::with_vars([("VESTIBULE_DEFAULT_PERMISSION", Some("  "))], || {
            let matches = command().get_matches_from(vec!["vestibule"]);
            let err = Options::parse(&matches).unwrap_err();
            assert!(err.to_string().contains("--default-permission"));
        });
    }

    #[test]
    fn zero_timeout_rejected() {
        temp_env::with_vars(VARS, || {
            let result =
                command().try_get_matches_from(vec!["vestibule", "--lookup-timeout-seconds", "0"]);
            assert!(result.is_err());
        });
    }
}

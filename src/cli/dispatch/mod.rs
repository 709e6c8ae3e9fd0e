//! Map validated CLI arguments to the action to run.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_DSN, ARG_ENV, ARG_PORT, auth, limiter};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(4000);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .filter(|dsn| !dsn.trim().is_empty())
        .map(|dsn| SecretString::from(dsn.clone()));
    let environment = matches
        .get_one::<String>(ARG_ENV)
        .cloned()
        .context("missing required argument: --env")?;

    let limiter_opts = limiter::Options::parse(matches)?;
    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        environment,
        limiter: limiter_opts.limiter,
        trust_proxy_headers: limiter_opts.trust_proxy_headers,
        lookup_timeout: auth_opts.lookup_timeout,
        authentication_ttl: auth_opts.authentication_ttl,
        activation_ttl: auth_opts.activation_ttl,
        password_reset_ttl: auth_opts.password_reset_ttl,
        default_permission: auth_opts.default_permission,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::time::Duration;

    #[test]
    fn server_action_from_env() {
        temp_env::with_vars(
            [
                ("VESTIBULE_PORT", Some("9000")),
                ("VESTIBULE_DSN", Some("postgres://vestibule@localhost/vestibule")),
                ("VESTIBULE_ENV", Some("staging")),
                ("VESTIBULE_LIMITER_BURST", Some("7")),
                ("VESTIBULE_LOOKUP_TIMEOUT_SECONDS", Some("2")),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["vestibule"]);
                let Ok(Action::Server(args)) = handler(&matches) else {
                    panic!("expected a server action");
                };
                assert_eq!(args.port, 9000);
                assert_eq!(
                    args.dsn.as_ref().map(|dsn| dsn.expose_secret().to_string()),
                    Some("postgres://vestibule@localhost/vestibule".to_string())
                );
                assert_eq!(args.environment, "staging");
                assert_eq!(args.limiter.burst(), 7);
                assert_eq!(args.lookup_timeout, Duration::from_secs(2));
            },
        );
    }

    #[test]
    fn blank_dsn_means_memory_store() {
        temp_env::with_vars([("VESTIBULE_DSN", Some(" "))], || {
            let matches = crate::cli::commands::new().get_matches_from(vec!["vestibule"]);
            let Ok(Action::Server(args)) = handler(&matches) else {
                panic!("expected a server action");
            };
            assert!(args.dsn.is_none());
        });
    }
}

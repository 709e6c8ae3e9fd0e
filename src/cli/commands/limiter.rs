use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command, builder::ValueParser};

use crate::gateway::rate_limit::LimiterConfig;

pub const ARG_LIMITER_RPS: &str = "limiter-rps";
pub const ARG_LIMITER_BURST: &str = "limiter-burst";
pub const ARG_LIMITER_ENABLED: &str = "limiter-enabled";
pub const ARG_TRUST_PROXY_HEADERS: &str = "trust-proxy-headers";

#[derive(Debug, Clone)]
pub struct Options {
    pub limiter: LimiterConfig,
    pub trust_proxy_headers: bool,
}

impl Options {
    /// Parse limiter arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a defaulted argument is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let rps = matches
            .get_one::<f64>(ARG_LIMITER_RPS)
            .copied()
            .context("missing required argument: --limiter-rps")?;
        let burst = matches
            .get_one::<u32>(ARG_LIMITER_BURST)
            .copied()
            .context("missing required argument: --limiter-burst")?;
        let enabled = matches
            .get_one::<bool>(ARG_LIMITER_ENABLED)
            .copied()
            .unwrap_or(true);

        Ok(Self {
            limiter: LimiterConfig::new()
                .with_rps(rps)
                .with_burst(burst)
                .with_enabled(enabled),
            trust_proxy_headers: matches.get_flag(ARG_TRUST_PROXY_HEADERS),
        })
    }
}

#[must_use]
pub fn validator_rps() -> ValueParser {
    ValueParser::from(move |value: &str| -> std::result::Result<f64, String> {
        match value.parse::<f64>() {
            Ok(rps) if rps.is_finite() && rps > 0.0 => Ok(rps),
            _ => Err("must be a number greater than zero".to_string()),
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LIMITER_RPS)
                .long(ARG_LIMITER_RPS)
                .help("Tokens refilled per second for each client")
                .env("VESTIBULE_LIMITER_RPS")
                .default_value("2")
                .value_parser(validator_rps()),
        )
        .arg(
            Arg::new(ARG_LIMITER_BURST)
                .long(ARG_LIMITER_BURST)
                .help("Bucket capacity: requests a client may send at once")
                .env("VESTIBULE_LIMITER_BURST")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_LIMITER_ENABLED)
                .long(ARG_LIMITER_ENABLED)
                .help("Enable per-client rate limiting")
                .env("VESTIBULE_LIMITER_ENABLED")
                .default_value("true")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_TRUST_PROXY_HEADERS)
                .long(ARG_TRUST_PROXY_HEADERS)
                .help("Key clients by X-Forwarded-For / X-Real-IP before the socket address")
                .long_help(
                    "Key clients by X-Forwarded-For / X-Real-IP before the socket address.\n\nOnly enable behind a reverse proxy that overwrites these headers; otherwise clients can pick their own rate limit key.",
                )
                .env("VESTIBULE_TRUST_PROXY_HEADERS")
                .action(ArgAction::SetTrue),
        )
}

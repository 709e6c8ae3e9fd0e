use clap::{Arg, Command, builder::ValueParser};

pub const ARG_VERBOSITY: &str = "verbosity";

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            if parsed <= 4 {
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
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env("VESTIBULE_LOG_LEVEL")
            .global(true)
            .action(clap::ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_from_env() {
        for (index, level) in ["error", "warn", "info", "debug", "trace"].iter().enumerate() {
            temp_env::with_vars([("VESTIBULE_LOG_LEVEL", Some(*level))], || {
                let matches = with_args(Command::new("vestibule")).get_matches_from(vec!["vestibule"]);
                assert_eq!(
                    matches.get_one::<u8>(ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }

    #[test]
    fn log_level_from_flags() {
        temp_env::with_vars([("VESTIBULE_LOG_LEVEL", None::<&str>)], || {
            let matches =
                with_args(Command::new("vestibule")).get_matches_from(vec!["vestibule", "-vvv"]);
            assert_eq!(matches.get_one::<u8>(ARG_VERBOSITY).copied(), Some(3));
        });
    }

    #[test]
    fn numeric_and_invalid_levels() {
        temp_env::with_vars([("VESTIBULE_LOG_LEVEL", Some("2"))], || {
            let matches = with_args(Command::new("vestibule")).get_matches_from(vec!["vestibule"]);
            assert_eq!(matches.get_one::<u8>(ARG_VERBOSITY).copied(), Some(2));
        });

        temp_env::with_vars([("VESTIBULE_LOG_LEVEL", Some("loud"))], || {
            let result = with_args(Command::new("vestibule")).try_get_matches_from(vec!["vestibule"]);
            assert!(result.is_err());
        });
    }
}

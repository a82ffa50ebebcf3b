use regex::Regex;
use std::env;
use std::sync::OnceLock;

use crate::ConfigError;

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static env pattern is valid")
    })
}

/// Replace every `${VAR_NAME}` with the value of that environment variable.
///
/// All missing variables are collected and reported together.
pub fn interpolate_env(input: &str) -> Result<String, ConfigError> {
    let mut missing = Vec::new();

    let result = env_pattern().replace_all(input, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match env::var(name) {
            Ok(value) => value,
            Err(_) => {
                if !missing.iter().any(|m: &String| m == name) {
                    missing.push(name.to_string());
                }
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ConfigError::MissingEnvVars(missing));
    }

    Ok(result.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_env() {
        env::set_var("CR_TEST_VAR", "hello");
        env::set_var("CR_ANOTHER_VAR", "world");

        let input = "prefix ${CR_TEST_VAR} middle ${CR_ANOTHER_VAR} suffix";
        let result = interpolate_env(input).unwrap();
        assert_eq!(result, "prefix hello middle world suffix");
    }

    #[test]
    fn test_interpolate_env_missing() {
        let result = interpolate_env("prefix ${CR_MISSING_VAR_12345} suffix");
        match result {
            Err(ConfigError::MissingEnvVars(vars)) => {
                assert_eq!(vars, vec!["CR_MISSING_VAR_12345"]);
            }
            _ => panic!("Expected MissingEnvVars error"),
        }
    }

    #[test]
    fn test_interpolate_env_reports_each_missing_once() {
        let input = "${CR_MISSING_ONE} ${CR_MISSING_TWO} ${CR_MISSING_ONE}";
        match interpolate_env(input) {
            Err(ConfigError::MissingEnvVars(vars)) => {
                assert_eq!(vars, vec!["CR_MISSING_ONE", "CR_MISSING_TWO"]);
            }
            _ => panic!("Expected MissingEnvVars error"),
        }
    }

    #[test]
    fn test_interpolate_env_no_vars() {
        assert_eq!(interpolate_env("no variables here").unwrap(), "no variables here");
        assert_eq!(interpolate_env("").unwrap(), "");
    }

    #[test]
    fn test_interpolate_env_adjacent_and_repeated() {
        env::set_var("CR_VAR_A", "hello");
        env::set_var("CR_VAR_B", "world");
        assert_eq!(interpolate_env("${CR_VAR_A}${CR_VAR_B}").unwrap(), "helloworld");
        assert_eq!(
            interpolate_env("${CR_VAR_A} and ${CR_VAR_A}").unwrap(),
            "hello and hello"
        );
    }

    #[test]
    fn test_interpolate_env_partial_syntax_not_matched() {
        assert_eq!(
            interpolate_env("not a $VAR variable").unwrap(),
            "not a $VAR variable"
        );
        assert_eq!(
            interpolate_env("not a ${VAR variable").unwrap(),
            "not a ${VAR variable"
        );
    }

    #[test]
    fn test_interpolate_env_value_is_not_reexpanded() {
        env::set_var("CR_DOLLAR_VAR", "${CR_VAR_A}");
        assert_eq!(interpolate_env("${CR_DOLLAR_VAR}").unwrap(), "${CR_VAR_A}");
    }
}

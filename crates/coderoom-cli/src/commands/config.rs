use coderoom_config::CoderoomConfig;
use serde_yaml::Value;

const REDACTED: &str = "***";

/// The config as YAML with every token and API key masked.
fn redacted(config: &CoderoomConfig) -> Result<Value, serde_yaml::Error> {
    let mut value = serde_yaml::to_value(config)?;

    if let Some(users) = value
        .get_mut("auth")
        .and_then(|auth| auth.get_mut("users"))
        .and_then(Value::as_mapping_mut)
    {
        for (_, user) in users.iter_mut() {
            if let Some(token) = user.get_mut("token") {
                *token = Value::from(REDACTED);
            }
        }
    }

    if let Some(key) = value.get_mut("ai").and_then(|ai| ai.get_mut("api_key")) {
        if !key.is_null() {
            *key = Value::from(REDACTED);
        }
    }

    Ok(value)
}

pub fn run(config: &CoderoomConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Print as YAML for readability
    let yaml = serde_yaml::to_string(&redacted(config)?)?;
    println!("{}", yaml);

    Ok(())
}

use crate::error::Result;
use crate::settings::{load_settings, parse_delimiter, save_settings, settings_path, ENDPOINT_ENV};

pub fn show() -> Result<()> {
    let settings = load_settings();
    println!("Settings file:  {}", settings_path().display());
    println!("Endpoint:       {}", settings.endpoint);
    if let Ok(env) = std::env::var(ENDPOINT_ENV) {
        println!("  overridden by {ENDPOINT_ENV}={env}");
    }
    let delimiter = match settings.delimiter {
        Some('\t') => "tab".to_string(),
        Some(c) => c.to_string(),
        None => "auto".to_string(),
    };
    println!("Delimiter:      {delimiter}");
    println!(
        "Timeout:        {}",
        settings
            .timeout_secs
            .map_or_else(|| "none".to_string(), |s| format!("{s}s"))
    );
    println!(
        "Max in flight:  {}",
        settings
            .max_in_flight
            .map_or_else(|| "unbounded".to_string(), |n| n.to_string())
    );
    Ok(())
}

pub fn set_endpoint(url: &str) -> Result<()> {
    let mut settings = load_settings();
    settings.endpoint = url.trim_end_matches('/').to_string();
    save_settings(&settings)?;
    println!("Endpoint set to {}", settings.endpoint);
    Ok(())
}

pub fn set_delimiter(raw: &str) -> Result<()> {
    let mut settings = load_settings();
    settings.delimiter = parse_delimiter(raw)?;
    save_settings(&settings)?;
    println!("Delimiter set to {raw}");
    Ok(())
}

pub fn set_max_in_flight(limit: usize) -> Result<()> {
    let mut settings = load_settings();
    settings.max_in_flight = (limit > 0).then_some(limit);
    save_settings(&settings)?;
    match settings.max_in_flight {
        Some(n) => println!("At most {n} prediction requests in flight"),
        None => println!("Prediction requests unbounded"),
    }
    Ok(())
}

pub fn set_timeout(secs: u64) -> Result<()> {
    let mut settings = load_settings();
    settings.timeout_secs = (secs > 0).then_some(secs);
    save_settings(&settings)?;
    match settings.timeout_secs {
        Some(s) => println!("Request timeout set to {s}s"),
        None => println!("Request timeout removed"),
    }
    Ok(())
}

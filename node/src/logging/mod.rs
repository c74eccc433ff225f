use lazy_static::lazy_static;
use serde::Serialize;

lazy_static! {
    /// Render logged messages as pretty JSON instead of `Debug` output.
    pub static ref RUST_LOG_JSON: bool = std::env::var("RUST_LOG_JSON").is_ok();
}

/// Enables logging when `RUST_LOG` is set.
pub fn init() {
    match std::env::var("RUST_LOG") {
        Ok(directives) => init_with_directives(&directives),
        Err(_) => println!("Logging disabled, set RUST_LOG to enable it"),
    }
}

pub fn init_with_directives(directives: &str) {
    println!("Logging enabled with directives: {directives}");
    let result = pretty_env_logger::formatted_timed_builder()
        .parse_filters(directives)
        .format_timestamp_millis()
        .try_init();
    if let Err(err) = result {
        eprintln!("Logger already initialized: {err}");
    }
}

/// Test logger, output is captured by the test harness. Safe to call from every test.
#[cfg(test)]
pub(crate) fn init_test() {
    let directives = std::env::var("RUST_LOG").unwrap_or_else(|_| "lamina=debug".to_string());
    let _ = pretty_env_logger::formatted_timed_builder()
        .parse_filters(&directives)
        .format_timestamp_millis()
        .is_test(true)
        .try_init();
}

pub fn pretty_json<T: Serialize + std::fmt::Debug>(value: &T) -> String {
    if *RUST_LOG_JSON {
        let json = serde_json::json!(&value);
        serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
    } else {
        format!("{value:?}")
    }
}

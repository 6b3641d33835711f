use sentry::types::Dsn;

fn parse_bool(s: &str) -> bool {
    match s.to_lowercase().as_str() {
        "true" | "1" => true,
        "false" | "0" => false,
        _ => true,
    }
}

/// Setup Sentry error reporting.
///
/// Reporting is on by default and opts out via CHANSCOPE_ERROR_REPORTING;
/// the DSN comes from CHANSCOPE_SENTRY_DSN. The returned guard must stay
/// alive for the lifetime of the process.
pub fn setup_sentry() -> sentry::ClientInitGuard {
    let error_reporting_enabled = std::env::var("CHANSCOPE_ERROR_REPORTING")
        .map(|v| parse_bool(&v))
        .unwrap_or(true);

    let dsn: Option<Dsn> = if error_reporting_enabled {
        std::env::var("CHANSCOPE_SENTRY_DSN")
            .ok()
            .and_then(|dsn| dsn.parse().ok())
    } else {
        None
    };

    sentry::init(sentry::ClientOptions {
        dsn,
        release: sentry::release_name!(),
        ..Default::default()
    })
}

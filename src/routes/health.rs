use actix_web::web::Data;
use actix_web::HttpResponse;
use chrono::Utc;

use crate::admission::AdmissionControl;
use crate::config::Settings;
use crate::rate_limit::RateLimiter;

// Liveness and current configuration. Unauthenticated, read-only, and
// careful never to echo the SMTP password or API key.
pub(crate) async fn health(
    config: Data<Settings>,
    admission: Data<AdmissionControl>,
    rate_limiter: Data<RateLimiter>,
) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "OK",
        "timestamp": Utc::now().to_rfc3339(),
        "smtp": {
            "host": config.smtp.host,
            "port": config.smtp.port,
            "secure": config.smtp.secure,
            "user": config.smtp.username,
            "poolSize": config.smtp.pool_size,
        },
        "security": {
            "rateLimitWindowSecs": config.security.rate_limit_window_secs,
            "rateLimitMax": config.security.rate_limit_max,
            "trackedRateLimitKeys": rate_limiter.tracked_keys(),
            "maxConcurrent": config.security.max_concurrent,
            "inFlight": admission.in_flight(),
            "requestTimeoutMs": config.security.request_timeout_ms,
            "retryAttempts": config.security.retry_attempts,
            "retryDelayMs": config.security.retry_delay_ms,
        },
    }))
}

use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::error::InternalError;
use actix_web::{web, HttpResponse};
use actix_web_lab::middleware::Next;
use secrecy::{ExposeSecret, Secret};

use crate::utils::err500;

const API_KEY_HEADER: &str = "X-API-Key";

/// The shared secret clients must present on protected routes.
pub(crate) struct ApiKey(Secret<String>);

impl ApiKey {
    pub(crate) fn new(key: Secret<String>) -> Self {
        Self(key)
    }

    // Accumulates the comparison over the whole candidate so timing does
    // not reveal the position of the first mismatching byte.
    fn matches(&self, candidate: &str) -> bool {
        let expected = self.0.expose_secret().as_bytes();
        let candidate = candidate.as_bytes();
        if expected.len() != candidate.len() {
            return false;
        }
        expected.iter().zip(candidate).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
    }
}

// Credential gate for `/send-email`. Rejections happen before the rate
// limiter or admission control ever see the request.
pub(crate) async fn require_api_key(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, actix_web::Error> {
    let api_key = match req.app_data::<web::Data<ApiKey>>() {
        Some(api_key) => api_key,
        None => return Err(err500("API key is missing from the application state")),
    };

    match req.headers().get(API_KEY_HEADER).map(|value| value.to_str().unwrap_or_default()) {
        None => Err(unauthorized("Missing API key").into()),
        Some(candidate) if !api_key.matches(candidate) => {
            Err(unauthorized("Invalid API key").into())
        }
        Some(_) => next.call(req).await,
    }
}

fn unauthorized(message: &'static str) -> InternalError<anyhow::Error> {
    let response = HttpResponse::Unauthorized().json(serde_json::json!({
        "error": "Unauthorized",
        "message": message,
    }));
    InternalError::from_response(anyhow::anyhow!(message), response)
}

use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::web::{Data, Json};
use actix_web::{HttpRequest, HttpResponse, ResponseError};

use crate::admission::{AdmissionControl, OVERLOAD_RETRY_AFTER};
use crate::domain::EmailAddress;
use crate::email_client::{DeliveryClient, DeliveryError};
use crate::rate_limit::{RateLimitKey, RateLimiter};
use crate::routes::error_chain_fmt;

// Rate-limit bucket for requests that do not carry a recipient; all such
// malformed traffic from one address shares it.
const UNKNOWN_RECIPIENT: &str = "unknown";

#[derive(Debug, serde::Deserialize)]
pub(crate) struct SendEmailBody {
    // Presence is validated by hand so that a missing field yields a
    // structured 400 instead of a deserialization error.
    to: Option<String>,
    from: Option<String>,
    subject: Option<String>,
    code: Option<String>,
}

#[tracing::instrument(
    name = "Relaying a verification code email",
    skip(request, body, rate_limiter, admission, delivery_client),
    fields(recipient = tracing::field::Empty)
)]
pub(crate) async fn send_email(
    request: HttpRequest,
    body: Json<SendEmailBody>,
    rate_limiter: Data<RateLimiter>,
    admission: Data<AdmissionControl>,
    delivery_client: Data<DeliveryClient>,
) -> Result<HttpResponse, SendEmailError> {
    let caller_addr = request
        .peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_RECIPIENT.to_owned());
    let recipient_key =
        body.to.as_deref().filter(|to| !to.trim().is_empty()).unwrap_or(UNKNOWN_RECIPIENT);

    rate_limiter
        .check_and_record(RateLimitKey::new(caller_addr, recipient_key))
        .map_err(|retry_after| SendEmailError::RateLimited { retry_after })?;

    let _permit = admission.try_acquire().ok_or(SendEmailError::Overloaded)?;

    let outcome = tokio::time::timeout(admission.request_timeout(), async {
        if let Some(delay) = admission.throttle_delay() {
            tokio::time::sleep(delay).await;
        }
        relay(&body, &delivery_client).await
    })
    .await;

    match outcome {
        // The downstream future was dropped at the deadline, so no second
        // response can race this one; the permit is released below.
        Err(_elapsed) => Err(SendEmailError::Timeout),
        Ok(Err(err)) => Err(err),
        Ok(Ok(())) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "message": "Email sent",
        }))),
    }
}

async fn relay(body: &SendEmailBody, delivery_client: &DeliveryClient) -> Result<(), SendEmailError> {
    let to = require_field(&body.to, "to")?;
    let subject = require_field(&body.subject, "subject")?;
    let code = require_field(&body.code, "code")?;

    let recipient =
        EmailAddress::parse(to.to_owned()).map_err(SendEmailError::InvalidRecipient)?;
    tracing::Span::current().record("recipient", &tracing::field::display(&recipient));

    let html_body = render_verification_email(code);
    delivery_client.send_email(&recipient, body.from.as_deref(), subject, &html_body).await?;

    Ok(())
}

fn require_field<'a>(
    field: &'a Option<String>,
    name: &'static str,
) -> Result<&'a str, SendEmailError> {
    match field.as_deref() {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(SendEmailError::MissingField(name)),
    }
}

// Fixed template; the code is the only variable part.
fn render_verification_email(code: &str) -> String {
    format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h3>Your verification code</h3>
  <div style="background-color: #f3f4f6; padding: 20px; border-radius: 8px; text-align: center; margin: 20px 0;">
    <span style="font-size: 32px; font-weight: bold; letter-spacing: 4px;">{code}</span>
  </div>
  <p><strong>This code is valid for 5 minutes.</strong></p>
  <p>If you did not request this code, please ignore this email.</p>
</div>"#,
        code = code
    )
}

// Round up to whole seconds so a caller still inside the window never
// sees a zero retry hint.
fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}


#[derive(thiserror::Error)]
pub(crate) enum SendEmailError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("{0}")]
    InvalidRecipient(String),
    #[error("rate limit exceeded for this caller and recipient")]
    RateLimited { retry_after: Duration },
    #[error("the relay is at its concurrent request capacity")]
    Overloaded,
    #[error("the request did not complete within the configured deadline")]
    Timeout,
    #[error("failed to relay the verification email")]
    Delivery(#[from] DeliveryError),
}

impl std::fmt::Debug for SendEmailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for SendEmailError {
    fn status_code(&self) -> StatusCode {
        match self {
            SendEmailError::MissingField(_) | SendEmailError::InvalidRecipient(_) => {
                StatusCode::BAD_REQUEST
            }
            SendEmailError::RateLimited { .. } | SendEmailError::Overloaded => {
                StatusCode::TOO_MANY_REQUESTS
            }
            SendEmailError::Timeout => StatusCode::REQUEST_TIMEOUT,
            SendEmailError::Delivery(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        match self {
            SendEmailError::MissingField(_) | SendEmailError::InvalidRecipient(_) => {
                builder.json(serde_json::json!({ "error": self.to_string() }))
            }
            SendEmailError::RateLimited { retry_after } => {
                let retry_after = ceil_secs(*retry_after);
                builder.insert_header(("Retry-After", retry_after.to_string())).json(
                    serde_json::json!({
                        "error": "Too many requests",
                        "message": format!(
                            "Rate limit exceeded, retry in {} seconds", retry_after
                        ),
                        "retryAfter": retry_after,
                    }),
                )
            }
            SendEmailError::Overloaded => {
                let retry_after = OVERLOAD_RETRY_AFTER.as_secs();
                builder.insert_header(("Retry-After", retry_after.to_string())).json(
                    serde_json::json!({
                        "error": "Too many requests",
                        "message": "The server is busy, please retry shortly",
                        "retryAfter": retry_after,
                    }),
                )
            }
            SendEmailError::Timeout => builder.json(serde_json::json!({
                "error": "Request timeout",
                "message": "The request took too long to process",
            })),
            SendEmailError::Delivery(err) => builder.json(serde_json::json!({
                "error": "Failed to send email",
                "details": err.to_string(),
            })),
        }
    }
}

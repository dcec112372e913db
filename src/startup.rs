use std::net::TcpListener;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::error::InternalError;
use actix_web::{web, App, HttpResponse, HttpServer};
use actix_web_lab::middleware::from_fn;
use tracing_actix_web::TracingLogger;

use crate::admission::AdmissionControl;
use crate::authentication::{require_api_key, ApiKey};
use crate::config::Settings;
use crate::email_client::{DeliveryClient, MailTransport, RetryPolicy, SmtpMailTransport};
use crate::rate_limit::RateLimiter;
use crate::routes::{health, send_email};

pub struct Application {
    port: u16,
    server: Server,
}

impl Application {
    /// Build the relay against the configured upstream SMTP server.
    pub fn build(config: Settings) -> Result<Self, anyhow::Error> {
        let transport = SmtpMailTransport::from_settings(&config.smtp)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Build the relay around an arbitrary transport. Tests use this to
    /// substitute a scripted transport for the SMTP pool.
    pub fn with_transport(
        config: Settings,
        transport: Arc<dyn MailTransport>,
    ) -> Result<Self, anyhow::Error> {
        let sender = config
            .smtp
            .sender()
            .map_err(|err| anyhow::anyhow!("invalid sender address: {}", err))?;
        let delivery_client = DeliveryClient::new(
            transport,
            sender,
            config.smtp.sender_name.clone(),
            RetryPolicy {
                attempts: config.security.retry_attempts,
                delay: config.security.retry_delay(),
            },
        );

        let listener =
            TcpListener::bind((config.application.host.as_str(), config.application.port))?;
        let port = listener.local_addr()?.port();
        let server = run(listener, config, delivery_client)?;

        Ok(Self { port, server })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        self.server.await
    }
}

pub fn run(
    listener: TcpListener,
    config: Settings,
    delivery_client: DeliveryClient,
) -> std::io::Result<Server> {
    let security = &config.security;

    let rate_limiter =
        web::Data::new(RateLimiter::new(security.rate_limit_max, security.rate_limit_window()));
    // Evict abandoned rate-limit keys once per window.
    rate_limiter.clone().into_inner().start_cleanup_task(security.rate_limit_window());

    let admission = web::Data::new(AdmissionControl::new(
        security.max_concurrent,
        security.request_timeout(),
        security.throttle_delay(),
    ));
    let api_key = web::Data::new(ApiKey::new(security.api_key.clone()));
    let delivery_client = web::Data::new(delivery_client);
    let config = web::Data::new(config);

    // Malformed JSON still gets the structured `{error}` shape instead of
    // actix's plain-text default.
    let json_config = web::JsonConfig::default().error_handler(|err, _req| {
        let response = HttpResponse::BadRequest().json(serde_json::json!({
            "error": format!("Invalid request body: {}", err),
        }));
        InternalError::from_response(err, response).into()
    });

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            // Browser frontends call the relay directly; allow any origin.
            .wrap(Cors::permissive())
            .app_data(json_config.clone())
            .app_data(rate_limiter.clone())
            .app_data(admission.clone())
            .app_data(api_key.clone())
            .app_data(delivery_client.clone())
            .app_data(config.clone())
            .route("/health", web::get().to(health))
            .service(
                web::resource("/send-email")
                    .wrap(from_fn(require_api_key))
                    .route(web::post().to(send_email)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}

use libverimail::{config, startup::Application, telemetry};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = telemetry::get_subscriber("verimail".into(), "info".into(), std::io::stdout);
    telemetry::init_subscriber(subscriber);

    let config = config::settings().expect("Failed to read configuration");
    tracing::info!(
        smtp_host = %config.smtp.host,
        smtp_port = config.smtp.port,
        smtp_user = %config.smtp.username,
        "Relaying through upstream SMTP server"
    );

    let app = Application::build(config)?;
    tracing::info!(port = app.port(), "Verification email relay is listening");
    app.run_until_stopped().await?;

    Ok(())
}

use hatchlink_mock::MockIncubator;
use hatchlink_mock::settings::Settings;

#[tokio::main]
async fn main() {
    let settings = Settings::new().expect("Failed to load settings.");

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let app_name = env!("CARGO_PKG_NAME").replace('-', "_");
            let level = settings.logger.level.as_str();

            format!("{app_name}={level}").into()
        }))
        .init();

    let incubator = MockIncubator::bind(settings.address().as_str())
        .await
        .expect("Failed to bind mock incubator.");
    incubator.controls().set_reply_delay(settings.reply_delay());
    tracing::info!("Simulating {:?}", incubator.settings());

    let stop = incubator.start();

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
    }
    let _ = stop.send(());
}

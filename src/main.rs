use field_tracker::{app, config::Config};
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;

    // `authorize` only runs the Google consent flow and exits
    match env::args().nth(1).as_deref() {
        None | Some("serve") => app::run(config).await?,
        Some("authorize") => {
            app::authorize(&config).await?;
            log::info!("Authorization complete");
        }
        Some(other) => {
            eprintln!("Usage: field-tracker [serve|authorize]");
            return Err(format!("unknown command '{}'", other).into());
        }
    }

    Ok(())
}

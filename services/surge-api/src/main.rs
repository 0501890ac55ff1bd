use surge_api::{run_server, telemetry, Config};

#[tokio::main]
async fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            std::process::exit(1);
        }
    };
    if let Err(err) = config.validate() {
        eprintln!("invalid configuration: {err}");
        std::process::exit(1);
    }

    telemetry::init_tracing(&config.logging);

    if let Err(err) = run_server(config).await {
        tracing::error!(error = %err, "server terminated with error");
        std::process::exit(1);
    }
}

use coderoom_config::CoderoomConfig;

pub async fn run(
    mut config: CoderoomConfig,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    eprintln!(
        "Starting coderoom on http://{}:{}",
        config.server.host, config.server.port
    );
    eprintln!("Endpoints: /health, /ws, /projects/*");
    if config.auth.users.is_empty() {
        eprintln!("Warning: no users configured, every request will be rejected");
    }

    coderoom_server::serve(config).await
}

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use wabot_bridge::{BridgeConfig, BridgeConnector};
use wabot_core::{
    config::Config,
    handlers::default_dispatcher,
    model::ModelClient,
    session::{SessionManager, Termination},
};
use wabot_gemini::GeminiClient;

#[tokio::main]
async fn main() -> Result<(), wabot_core::Error> {
    wabot_core::logging::init("wabot")?;

    let cfg = Arc::new(Config::load()?);

    let model: Option<Arc<dyn ModelClient>> = match &cfg.gemini_api_key {
        Some(key) => Some(Arc::new(GeminiClient::new(
            key.clone(),
            cfg.gemini_model.clone(),
            cfg.ai_timeout,
        )?)),
        None => {
            warn!("GEMINI_API_KEY is not set; ,ai will answer with a notice");
            None
        }
    };

    let dispatcher = Arc::new(default_dispatcher(&cfg, model));
    let connector = Arc::new(BridgeConnector::new(BridgeConfig::from_config(&cfg)));
    let manager = SessionManager::new(cfg.clone(), connector, dispatcher);

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received; shutting down");
            }
            shutdown.cancel();
        }
    });

    info!(
        session_dir = %cfg.session_dir.display(),
        seeded = cfg.is_seeded_externally(),
        "starting bot"
    );

    match manager.run(shutdown.clone()).await? {
        Termination::Shutdown => {}
        Termination::LoggedOut => {
            // Idle until Ctrl-C; re-pairing needs an operator.
            error!("device logged out; delete the session and pair again");
            shutdown.cancelled().await;
        }
    }

    info!("bye");
    Ok(())
}

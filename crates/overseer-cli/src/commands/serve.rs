use overseer_config::ConfigLoader;
use overseer_core::Result;
use overseer_engine::GovernanceEngine;

pub(super) async fn cmd_serve(config_loader: ConfigLoader, listen: Option<String>) -> Result<()> {
    let shared = config_loader.shared();
    if let Some(listen) = listen {
        shared.write().server.listen = listen;
    }
    let config = config_loader.get();

    println!("Overseer v{}", env!("CARGO_PKG_VERSION"));
    println!("   Store: {}", config.store.db_path.display());
    println!("   Listen: {}", config.server.listen);
    println!(
        "   Approval timeout: {}s (x{} per tier, max tier {})",
        config.approval.timeout_secs, config.approval.escalation_factor, config.approval.max_escalation_tier
    );
    println!();

    // Kept alive for the lifetime of the server
    let _watcher = match config_loader.watch() {
        Ok(w) => {
            println!("   Config hot-reload: enabled");
            Some(w)
        }
        Err(e) => {
            tracing::warn!(error = %e, "config hot-reload disabled");
            None
        }
    };

    let engine = GovernanceEngine::open(shared.clone())?;
    overseer_server::start_server(engine, shared).await
}

use std::sync::Arc;
use anyhow::{Context, Result};
use sqlx::mysql::MySqlPoolOptions;
use paysys::config::ServerConfig;
use paysys::resolver::learned::LearnedKeyStore;
use paysys::servers::paysys::db::MySqlAccountStore;
use paysys::servers::paysys::store::{AccountStore, MemoryAccountStore};
use paysys::servers::paysys::PaysysState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut conf_file = "conf/paysys.yaml".to_string();

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!("Usage: paysys_server [--conf FILE]");
                return Ok(());
            }
            "--conf" => {
                if i + 1 < args.len() {
                    i += 1;
                    conf_file = args[i].clone();
                } else {
                    eprintln!("Error: --conf requires a FILE argument");
                    return Ok(());
                }
            }
            _ => {}
        }
        i += 1;
    }

    let config = ServerConfig::from_file(&conf_file)
        .with_context(|| format!("Cannot load config: {}", conf_file))?;

    let store: Arc<dyn AccountStore> = if config.uses_database() {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect(&config.database_url())
            .await
            .with_context(|| format!("Cannot connect to DB: {}", config.sql_ip))?;
        let store = MySqlAccountStore::new(pool);
        store.migrate().await.context("Cannot apply migrations")?;
        Arc::new(store)
    } else {
        tracing::warn!("[paysys] [permissive] no sql_ip configured, accepting any well-formed login");
        Arc::new(MemoryAccountStore::permissive())
    };

    let (learned, persist_worker) = LearnedKeyStore::with_persistence(&config.learned_keys_path);

    let bind = config.bind_addr();
    let state = Arc::new(PaysysState::new(config, store, Arc::new(learned))?);

    let signal_state = Arc::clone(&state);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_state.shutdown();
        }
    });

    tracing::info!("[paysys] [started] PaySys Server Started");
    PaysysState::run(Arc::clone(&state), &bind).await?;

    // dropping the last state handle closes the persistence queue
    drop(state);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), persist_worker).await;
    Ok(())
}

use switchboard::config::Config;
use switchboard::server::{control, Reactor};
use switchboard::site;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;

    let mut reactor = Reactor::bind(&cfg, site::routes)?;
    control::spawn_console(reactor.control())?;

    if let Some(addr) = reactor.local_addr() {
        tracing::info!(%addr, quit = %cfg.reactor.quit_char, "Serving, type the quit character to stop");
    }

    reactor.run()?;

    tracing::info!("Shutdown complete");
    Ok(())
}

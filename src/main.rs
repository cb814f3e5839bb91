//! dapmux - tool-call server in front of debug adapters.

mod args;

use anyhow::Context;
use args::{Args, Command};
use clap::Parser;
use dapmux::config::{Config, LaunchConfigurations};
use dapmux::engine::dap::DapEngine;
use dapmux::server::Server;
use dapmux::session::SessionRegistry;
use dapmux::tools::{catalog, Tools};
use dapmux::tracer::FileTracer;
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::oneshot;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let path = args
        .config
        .clone()
        .or_else(Config::default_path)
        .context("cannot locate the home directory, use --config")?;

    // logger goes first so that config loading is logged too
    let log_file = args.log_file.as_deref().map(FileTracer::new).transpose()?;
    dapmux::log::init(args.startup_log_level(), log_file.clone())?;

    let mut config = Config::load(&path)?;
    args.apply(&mut config.server);
    dapmux::log::set_level(config.server.log_level());

    let rpc_tracer = match (log_file, args.trace_rpc) {
        (Some(tracer), true) => Some(tracer),
        (None, true) => {
            warn!(target: "server", "--trace-rpc requires --log-file; tracing disabled");
            None
        }
        _ => None,
    };

    match args.command {
        Some(Command::Tools) => {
            println!("{}", serde_json::to_string_pretty(&catalog())?);
            return Ok(());
        }
        Some(Command::Configurations) => {
            for c in &config.configurations {
                println!("{}\t{}\t{}", c.name, c.kind, c.request);
            }
            return Ok(());
        }
        Some(Command::Serve) => {}
        None if config.server.autostart => {}
        None => {
            println!(
                "autostart is disabled in {}, run `dapmux serve` to start the server",
                path.display()
            );
            return Ok(());
        }
    }

    serve(&args, &path, config, rpc_tracer).await
}

struct App {
    engine: Arc<DapEngine>,
    configurations: Arc<LaunchConfigurations>,
}

impl App {
    /// Re-read the configuration file and apply what can change without a restart.
    fn reload(&self, args: &Args, path: &Path) -> anyhow::Result<Config> {
        let mut config = Config::load(path)?;
        args.apply(&mut config.server);

        self.configurations.replace(config.configurations.clone());
        self.engine.set_adapters(config.adapter_addresses());
        dapmux::log::set_level(config.server.log_level());
        info!(
            target: "config",
            "reloaded {}: {} launch configuration(s)",
            path.display(),
            config.configurations.len()
        );
        Ok(config)
    }
}

async fn serve(
    args: &Args,
    path: &Path,
    mut config: Config,
    rpc_tracer: Option<FileTracer>,
) -> anyhow::Result<()> {
    let app = App {
        engine: Arc::new(DapEngine::new(config.adapter_addresses())),
        configurations: Arc::new(LaunchConfigurations::new(config.configurations.clone())),
    };
    let registry = Arc::new(SessionRegistry::new(app.engine.clone()));
    let events = registry.spawn_event_loop();
    let tools = Arc::new(Tools::new(
        app.engine.clone(),
        registry,
        app.configurations.clone(),
    ));

    let mut hangup = signal(SignalKind::hangup()).context("install SIGHUP handler")?;
    loop {
        let addr = config.server.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("bind {addr}"))?;
        let server = Server::new(tools.clone(), rpc_tracer.clone());
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let mut serving = tokio::spawn(async move {
            server
                .serve(listener, async move {
                    _ = stop_rx.await;
                })
                .await
        });

        let restart = loop {
            tokio::select! {
                result = &mut serving => {
                    events.abort();
                    return result?;
                }
                _ = tokio::signal::ctrl_c() => break false,
                _ = hangup.recv() => match app.reload(args, path) {
                    Ok(reloaded) => {
                        let moved = reloaded.server.listen_addr() != addr;
                        config = reloaded;
                        if moved {
                            info!(target: "server", "listen address changed, restarting listener");
                            break true;
                        }
                    }
                    Err(e) => warn!(target: "config", "reload failed, keeping current configuration: {e:#}"),
                },
            }
        };

        _ = stop_tx.send(());
        serving.await??;
        if !restart {
            break;
        }
    }

    events.abort();
    Ok(())
}

mod controller;
mod display;
mod player;
mod validation;

use std::sync::Arc;
use std::time::{Duration, Instant};
use anyhow::Result;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use lumen_common::{ErrorReporting, IpcCommand, IpcResponse, IpcServer, PlaylistStore};
use lumen_config::{Config, ConfigStore};
use crate::controller::{Orchestrator, Outcome};
use crate::display::SystemDisplays;
use crate::player::ProcessBackendFactory;
use crate::validation::{PendingSource, Validator};

const FLUSH_TICK: Duration = Duration::from_millis(250);

type Request = (IpcCommand, oneshot::Sender<IpcResponse>);
type Validated = (PendingSource, lumen_common::Result<()>, oneshot::Sender<IpcResponse>);

fn reply(sender: oneshot::Sender<IpcResponse>, response: IpcResponse) {
    if sender.send(response).is_err() {
        log::debug!("IPC client went away before the reply");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    log::info!("Starting lumen daemon...");

    let config_path = Config::default_path()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e.user_friendly_message()))?;
    let config = ConfigStore::open(&config_path)
        .map_err(|e| {
            log::error!("Configuration error: {}", e.user_friendly_message());
            anyhow::anyhow!("Configuration error: {}", e.user_friendly_message())
        })?;

    log::info!("Configuration loaded from {:?}", config_path);

    let daemon_config = config.current().daemon.clone();
    let provider = SystemDisplays::detect(daemon_config.display_provider)
        .map_err(|e| {
            log::error!("Display discovery unavailable: {}", e.user_friendly_message());
            anyhow::anyhow!("Display discovery unavailable: {}", e.user_friendly_message())
        })?;
    let factory = ProcessBackendFactory::new(&daemon_config.player_command, &daemon_config.web_command);

    let mut orchestrator = Orchestrator::new(provider, factory, config, PlaylistStore::get_store_file());
    orchestrator.startup();

    // Commands are forwarded to this task; nothing else touches the orchestrator
    let (request_tx, mut request_rx) = mpsc::channel::<Request>(32);
    let (validated_tx, mut validated_rx) = mpsc::channel::<Validated>(8);

    let server = IpcServer::new();
    let listener = server.bind()?;
    let socket_path = server.socket_path().to_path_buf();

    std::thread::spawn(move || {
        IpcServer::serve(listener, move |command| {
            let (reply_tx, reply_rx) = oneshot::channel();
            request_tx
                .blocking_send((command, reply_tx))
                .map_err(|_| anyhow::anyhow!("lumen daemon is shutting down"))?;
            reply_rx
                .blocking_recv()
                .map_err(|_| anyhow::anyhow!("lumen daemon dropped the request"))
        });
    });

    let validator = Arc::new(Validator::new(orchestrator.validation_timeout()));
    let mut poll = interval(orchestrator.poll_interval());
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut flush_tick = interval(FLUSH_TICK);
    let mut terminate = signal(SignalKind::terminate())?;

    log::info!("Daemon started, polling displays every {:?}", orchestrator.poll_interval());

    loop {
        tokio::select! {
            Some((command, reply_tx)) = request_rx.recv() => {
                match orchestrator.handle(command) {
                    Outcome::Reply(response) => reply(reply_tx, response),
                    Outcome::Validate(pending) => {
                        log::info!("Checking {} before switching to {} mode", pending.content, pending.mode);
                        let validator = Arc::clone(&validator);
                        let validated_tx = validated_tx.clone();
                        tokio::spawn(async move {
                            let result = validator.validate(&pending).await;
                            if validated_tx.send((pending, result, reply_tx)).await.is_err() {
                                log::debug!("Validation finished after shutdown");
                            }
                        });
                    }
                    Outcome::Quit(response) => {
                        reply(reply_tx, response);
                        log::info!("Quit requested");
                        break;
                    }
                }
            }
            Some((pending, result, reply_tx)) = validated_rx.recv() => {
                let response = orchestrator.finish_validation(pending, result);
                reply(reply_tx, response);
            }
            _ = poll.tick() => {
                for (monitor, e) in orchestrator.refresh_monitors() {
                    e.log_error(&format!("Monitor {} stays unbound", monitor));
                }
            }
            _ = flush_tick.tick() => orchestrator.flush_if_due(Instant::now()),
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted");
                break;
            }
            _ = terminate.recv() => {
                log::info!("Terminated");
                break;
            }
        }
    }

    orchestrator.shutdown();
    if let Err(e) = std::fs::remove_file(&socket_path) {
        log::debug!("Could not remove {:?}: {}", socket_path, e);
    }

    log::info!("lumen daemon stopped");
    Ok(())
}

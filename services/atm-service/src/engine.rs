//! Runs the single-threaded `AtmApp` on its own thread and serves requests
//! from the axum workers over a command channel.

use anyhow::{Context, Result, anyhow};
use atm_api_types::{ActionResponse, AtmSnapshot, OperationKind};
use atm_core::{AtmApp, ContractConfig};
use atm_rpc::RpcProviderSource;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{LocalSet, spawn_local};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::config::ServiceConfig;

const COMMAND_BUFFER: usize = 64;

enum Command {
    Snapshot(oneshot::Sender<AtmSnapshot>),
    Connect(oneshot::Sender<AtmSnapshot>),
    Refresh(oneshot::Sender<AtmSnapshot>),
    Submit {
        kind: OperationKind,
        amount: i128,
        reply: oneshot::Sender<ActionResponse>,
    },
}

#[derive(Clone)]
pub(crate) struct EngineHandle {
    commands: mpsc::Sender<Command>,
}

impl EngineHandle {
    /// Start the engine thread. Returns once the contract configuration has
    /// loaded; wallet detection continues in the background.
    pub(crate) async fn spawn(config: &ServiceConfig) -> Result<Self> {
        let (commands, inbox) = mpsc::channel(COMMAND_BUFFER);
        let (ready_tx, ready_rx) = oneshot::channel();
        let rpc_url = config.rpc_url.clone();
        let account_poll = config.account_poll;

        std::thread::Builder::new()
            .name("atm-engine".to_owned())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err.into()));
                        return;
                    }
                };
                LocalSet::new().block_on(&runtime, run(rpc_url, account_poll, inbox, ready_tx));
            })
            .context("failed to spawn engine thread")?;

        ready_rx.await.context("engine thread exited during startup")??;
        Ok(Self { commands })
    }

    pub(crate) async fn snapshot(&self) -> Result<AtmSnapshot> {
        self.ask(Command::Snapshot).await
    }

    pub(crate) async fn connect(&self) -> Result<AtmSnapshot> {
        self.ask(Command::Connect).await
    }

    pub(crate) async fn refresh(&self) -> Result<AtmSnapshot> {
        self.ask(Command::Refresh).await
    }

    pub(crate) async fn submit(&self, kind: OperationKind, amount: i128) -> Result<ActionResponse> {
        self.ask(|reply| Command::Submit {
            kind,
            amount,
            reply,
        })
        .await
    }

    async fn ask<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| anyhow!("atm engine is not running"))?;
        response.await.context("atm engine dropped the request")
    }
}

async fn run(
    rpc_url: Option<String>,
    account_poll: Duration,
    mut inbox: mpsc::Receiver<Command>,
    ready: oneshot::Sender<Result<()>>,
) {
    let config = match ContractConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    info!(contract = %config.address, "atm engine started");
    let app = AtmApp::new(Rc::new(RpcProviderSource::new(rpc_url)), config);
    let _ = ready.send(Ok(()));

    let startup = app.clone();
    spawn_local(async move {
        if let Err(err) = startup.init().await {
            debug!("initial wallet sync failed: {}", err);
        }
    });
    spawn_local(watch_accounts(app.clone(), account_poll));

    // each command runs as its own task so reads stay answerable while a
    // submit waits for confirmation
    while let Some(command) = inbox.recv().await {
        spawn_local(serve(app.clone(), command));
    }
    debug!("command channel closed, atm engine stopping");
}

async fn serve(app: Rc<AtmApp>, command: Command) {
    // failures are reported through the snapshot's `last_error`
    match command {
        Command::Snapshot(reply) => {
            let _ = reply.send(app.snapshot());
        }
        Command::Connect(reply) => {
            let _ = app.connect().await;
            let _ = reply.send(app.snapshot());
        }
        Command::Refresh(reply) => {
            let _ = app.refresh().await;
            let _ = reply.send(app.snapshot());
        }
        Command::Submit {
            kind,
            amount,
            reply,
        } => {
            let receipt = app.submit(kind, amount).await.ok().flatten();
            let _ = reply.send(ActionResponse {
                snapshot: app.snapshot(),
                receipt,
            });
        }
    }
}

/// Node-backed providers cannot push `accountsChanged`; poll instead.
async fn watch_accounts(app: Rc<AtmApp>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(err) = app.poll_accounts().await {
            debug!("account poll failed: {}", err);
        }
    }
}

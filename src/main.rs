use axum::Server;
use log::error;
use log::info;
use log::warn;
use mission_vis::app::notifier;
use mission_vis::app::Worker;
use mission_vis::config::Role;
use mission_vis::config::ServerConfig;
use mission_vis::providers::ipc::remove_socket;
use std::path::Path;
use std::time::Duration;
use tokio::process::Child;
use tokio::process::Command;

const BUS_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

async fn run_notifier(config: ServerConfig) {
    let notifier = notifier(&config).expect("could not start the notifier");

    tokio::select! {
        _ = notifier.run() => {}
        _ = tokio::signal::ctrl_c() => info!("notifier shutting down"),
    }

    remove_socket(&config.notify_ipc);
    remove_socket(&config.watch_ipc);
}

fn spawn_notifier(config: &ServerConfig) -> Child {
    let exe = std::env::current_exe().expect("could not locate own executable");

    Command::new(exe)
        .envs(config.child_env("notifier"))
        .kill_on_drop(true)
        .spawn()
        .expect("could not spawn the notifier")
}

async fn wait_for_socket(path: &Path) {
    let waiting = async {
        while !tokio::fs::try_exists(path).await.unwrap_or(false) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };

    if tokio::time::timeout(BUS_STARTUP_TIMEOUT, waiting).await.is_err() {
        warn!("{} did not appear, starting without the bus", path.display());
    }
}

async fn run_worker(config: ServerConfig) {
    let worker = Worker::new(&config).expect("could not start the worker");

    let synchronizer = worker.synchronizer;
    tokio::spawn(async move { synchronizer.sync_events_to_state().await });

    info!("listening on {}", config.bind);

    Server::bind(&config.bind)
        .serve(worker.router.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .unwrap_or_else(|err| error!("server error: {}", err));
}

#[tokio::main]
async fn main() {
    pretty_env_logger::init_timed();

    let config = ServerConfig::from_env().expect("invalid configuration");

    match config.role {
        Role::Notifier => run_notifier(config).await,
        Role::Worker => run_worker(config).await,
        Role::Server => {
            let mut child = spawn_notifier(&config);
            wait_for_socket(&config.watch_ipc).await;

            let notify_ipc = config.notify_ipc.clone();
            let watch_ipc = config.watch_ipc.clone();

            run_worker(config).await;

            if let Err(err) = child.kill().await {
                warn!("notifier did not stop cleanly: {}", err);
            }
            remove_socket(&notify_ipc);
            remove_socket(&watch_ipc);
        }
    }
}

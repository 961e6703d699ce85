use rankode_worker::{Server, WorkerConfig};
use std::process::exit;

#[tokio::main]
async fn main() {
    let config = WorkerConfig::default();

    if let Err(e) = Server::new(config).start().await {
        // Do not use the logger for printing here: it may not be
        // initialized yet if startup failed before `set_logging_verbosity`.
        println!("Unable to run server: {:#}", e);
        exit(1);
    }
}

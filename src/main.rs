mod bloom;
mod cli;
mod common;
mod db;
mod dispatcher;
mod event;
mod filter;
mod identity;
mod node;
mod processor;
mod ratelimit;
mod server;
mod session;
mod validate;

#[tokio::main]
async fn main() {
    let code = cli::handle_cli().await;
    std::process::exit(code);
}

use std::net::SocketAddr;
use std::path::PathBuf;

use parleyd::{Config, Server};

fn usage_and_exit() -> ! {
    eprintln!(
        "parleyd (chat/presence server)\n\n\
USAGE:\n  parleyd [--listen HOST:PORT] [--accounts PATH] [--key PATH]\n\n\
ENV:\n  PARLEY_LISTEN     default 0.0.0.0:4044\n  PARLEY_ACCOUNTS   default account.dat\n  PARLEY_KEY        default server.key (missing file disables secure auth)\n"
    );
    std::process::exit(2);
}

fn parse_args() -> Config {
    let mut listen: SocketAddr = std::env::var("PARLEY_LISTEN")
        .unwrap_or_else(|_| "0.0.0.0:4044".to_string())
        .parse()
        .unwrap_or_else(|_| usage_and_exit());

    let mut accounts_path: PathBuf = std::env::var("PARLEY_ACCOUNTS")
        .unwrap_or_else(|_| "account.dat".to_string())
        .into();

    let mut key_path: PathBuf = std::env::var("PARLEY_KEY")
        .unwrap_or_else(|_| "server.key".to_string())
        .into();

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--listen" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                listen = v.parse().unwrap_or_else(|_| usage_and_exit());
            }
            "--accounts" => {
                accounts_path = it.next().unwrap_or_else(|| usage_and_exit()).into();
            }
            "--key" => {
                key_path = it.next().unwrap_or_else(|| usage_and_exit()).into();
            }
            "-h" | "--help" => usage_and_exit(),
            _ => usage_and_exit(),
        }
    }

    Config {
        listen,
        accounts_path,
        key_path,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,parleyd=info".into()),
        )
        .with_target(false)
        .init();

    let cfg = parse_args();
    let server = Server::bind(&cfg).await?;

    // A faulting task must not flush a half-updated store over the file.
    let store = server.store_handle();
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        store.seal();
        default_hook(info);
    }));

    server.run().await
}

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::time::Duration;

use stampede_testserver::{Admission, TestServerConfig, TestServerStats};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let mut bind_addr: SocketAddr = "127.0.0.1:0".parse()?;
    let mut config = TestServerConfig::default();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--bind" => {
                let addr = args.next().ok_or_else(|| {
                    anyhow::anyhow!("--bind requires an address, e.g. 127.0.0.1:0")
                })?;
                bind_addr = addr.parse()?;
            }
            "--limit" => {
                let limit = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--limit requires an amount"))?;
                config.limit = limit.parse()?;
            }
            "--racy-ms" => {
                let ms = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--racy-ms requires milliseconds"))?;
                config.admission = Admission::Racy {
                    window: Duration::from_millis(ms.parse()?),
                };
            }
            "-h" | "--help" => {
                eprintln!(
                    "stampede-testserver\n\nUSAGE:\n  stampede-testserver [--bind 127.0.0.1:0] [--limit AMOUNT] [--racy-ms MS]\n\nOUTPUT:\n  Prints HTTP_URL=<url> and API_URL=<url>/api to stdout once ready."
                );
                return Ok(());
            }
            other => {
                return Err(anyhow::anyhow!("unknown argument: {other}"));
            }
        }
    }

    let listener = TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    let app = stampede_testserver::router(config, TestServerStats::default());

    println!("HTTP_URL=http://{addr}");
    println!("API_URL=http://{addr}/api");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}

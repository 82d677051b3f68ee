//! wsmux demo
//!
//! Drives a client over the loopback connector, playing the server side
//! in-process:
//! - Load config (strict parsing + validate)
//! - Answer every INIT with OPEN and hand out a persistent id
//! - Echo one RPC on the `demo` channel

use std::sync::Arc;

use serde_json::json;
use tracing_subscriber::{fmt, EnvFilter};

use wsmux_client::loopback::{LoopbackConnection, LoopbackConnector};
use wsmux_client::{config, Client, ClientError, Data, Envelope, FileStore, Result};
use wsmux_core::topics;

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "wsmux.yaml".into());
    let cfg = config::load_from_file(&path)?;
    let store = Arc::new(FileStore::open("wsmux-session.json")?);
    let connector = LoopbackConnector::new();

    let client = Client::from_config(&cfg, Arc::new(connector.clone()), store)?;
    client.on_open(|| tracing::info!("connected"));
    client.on_close(|| tracing::info!("disconnected"));
    tracing::info!(url = %client.url(), persistent_id = ?client.persistent_id(), "client ready");

    client.connect()?;
    let conn = connector.connection().ok_or(ClientError::NotConnected)?;
    conn.accept();
    serve(&conn)?;

    let demo = client.channel("demo");
    demo.on_open(|info| tracing::info!(connection_id = %info.connection_id, "demo channel open"));
    serve(&conn)?;

    let reply = demo.invoke("echo", json!({ "msg": "hi" })).reply();
    serve(&conn)?;
    let echoed = reply.await?;
    tracing::info!(%echoed, "echo reply");

    client.close(false);
    Ok(())
}

/// Answer whatever the client sent: INIT gets OPEN, anything else is echoed.
fn serve(conn: &LoopbackConnection) -> Result<()> {
    for env in conn.take_sent() {
        let response = if env.topic == topics::INIT {
            let info = json!({ "CI": format!("ci-{}", env.channel), "PI": "demo-session" });
            Envelope::control(&env.channel, topics::OPEN, Data::Value(info))
        } else {
            Envelope::new(&env.channel, &env.topic, Data::Raw(env.data))
        };
        conn.deliver(&response)?;
    }
    Ok(())
}

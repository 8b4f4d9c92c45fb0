use std::time::Duration;

use anyhow::Result;
use clap::Parser as _;
use event_loop::event_loop;
use forwarder::Forwarder;
use tokio::select;
use zbus::Connection;

mod args;
mod attributes;
mod dbus;
mod event_loop;
mod forwarder;
mod player;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = args::Args::parse();
    args.init_tracing_subscriber();

    let mut forwarder = Forwarder::new(args.endpoint.clone());
    let connection = Connection::session().await?;
    forwarder.on_ready();

    let result = select! {
        r = event_loop(
            connection,
            &mut forwarder,
            Duration::from_secs_f64(args.refresh_every),
            args.player.clone(),
        ) => r,
        r = tokio::signal::ctrl_c() => r.map_err(Into::into),
    };
    forwarder.on_before_quit();
    result
}

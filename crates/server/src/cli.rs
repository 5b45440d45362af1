//! CLI argument definitions, grounded on the teacher's `gateway/src/cli.rs`
//! `GatewayArgs` shape — scaled down to the flags this engine actually
//! needs.

use std::net::SocketAddr;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct ServerArgs {
    /// Sets the socket address the server will bind to (e.g. "0.0.0.0:8000").
    /// Falls back to `API_PORT` (spec.md §6) bound on `0.0.0.0` if unset.
    #[arg(long)]
    pub bind_address: Option<SocketAddr>,

    /// Run pending Postgres migrations then exit, without starting the
    /// worker or the HTTP listener.
    #[arg(long)]
    pub run_migrations: bool,

    /// Skip running the Seeder at startup.
    #[arg(long)]
    pub skip_seed: bool,
}

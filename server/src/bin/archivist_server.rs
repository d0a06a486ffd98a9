#![deny(warnings)]

use {anyhow::Result, archivist_server::Options, structopt::StructOpt};

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init_timed();

    archivist_server::serve(&Options::from_args()).await
}

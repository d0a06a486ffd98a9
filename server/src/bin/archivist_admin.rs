#![deny(warnings)]

use {
    anyhow::Result,
    archivist_server::{error::Access, normalize, path_guard, Catalog, Ffprobe},
    serde_json::json,
    structopt::StructOpt,
    tracing::info,
};

#[derive(StructOpt, Debug)]
#[structopt(name = "archivist-admin", about = "Media archiving webapp admin tool")]
enum Command {
    /// Create the catalog in an archive directory, or upgrade an existing one
    InitCatalog {
        /// Archive directory
        path: String,
    },

    /// Print the tag and people popularity recorded in an archive directory's catalog
    Popularity {
        /// Archive directory
        path: String,
    },

    /// Print the metadata extracted from each image and video in a directory
    Scan {
        /// Directory containing incoming images and videos
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init_timed();

    match Command::from_args() {
        Command::InitCatalog { path } => {
            let path = path_guard::check_path(Some(&path), Access::ReadWrite).await?;

            let mut catalog = Catalog::open(&path).await?;

            let [media, tags, people, _, _] = catalog.row_counts().await?;

            info!(
                "catalog in {} holds {} items, {} tags, and {} people",
                path, media, tags, people
            );
        }

        Command::Popularity { path } => {
            let path = path_guard::check_path(Some(&path), Access::Read).await?;

            let mut catalog = Catalog::open(&path).await?;

            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "tags": catalog.tag_popularity().await?,
                    "people": catalog.person_popularity().await?,
                }))?
            );
        }

        Command::Scan { path } => {
            let path = path_guard::check_path(Some(&path), Access::Read).await?;

            println!(
                "{}",
                serde_json::to_string_pretty(&normalize::scan(&path, &Ffprobe).await?)?
            );
        }
    }

    Ok(())
}

#![deny(warnings)]

use {
    crate::{session::Session, warp_util::HttpError},
    anyhow::Result,
    archivist_shared::{
        Command, FileQuery, LoadQuery, MediaType, SaveRequest, SaveResponse, ScanResponse,
        TrashRequest,
    },
    futures::future::TryFutureExt,
    http::response::{self, Response},
    std::{convert::Infallible, net::SocketAddrV4, sync::Arc, time::Duration},
    structopt::StructOpt,
    tokio::sync::Mutex as AsyncMutex,
    tracing::{info, warn},
    warp::{Filter, Rejection, Reply},
};

pub use {
    catalog::Catalog,
    probe::Ffprobe,
    session::{load, Services},
};

pub mod archive;
pub mod catalog;
pub mod error;
pub mod labels;
pub mod normalize;
pub mod path_guard;
pub mod preview;
pub mod probe;
pub mod session;
pub mod timezone;
mod warp_util;

#[cfg(test)]
mod test_util;

#[derive(StructOpt, Debug)]
#[structopt(name = "archivist-server", about = "Media archiving webapp backend")]
pub struct Options {
    /// Address to which to bind
    #[structopt(long, default_value = "0.0.0.0:8090")]
    pub address: SocketAddrV4,

    /// Directory containing static resources
    #[structopt(long)]
    pub public_directory: String,

    /// Google Cloud Vision API key used for label detection
    #[structopt(long)]
    pub vision_api_key: Option<String>,

    /// Google Time Zone API key used to resolve capture timezones
    #[structopt(long)]
    pub timezone_api_key: Option<String>,

    /// Directory in which to store poster frames extracted from videos
    #[structopt(long, default_value = "posters")]
    pub poster_directory: String,

    /// Timeout, in seconds, for requests to external services
    #[structopt(long, default_value = "30")]
    pub request_timeout_secs: u64,
}

/// Build the production [Services] described by `options`.
pub fn services(options: &Options) -> Result<Arc<Services>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(options.request_timeout_secs))
        .build()?;

    Ok(Arc::new(Services {
        probe: Arc::new(Ffprobe),
        timezones: timezone::TimezoneResolver::new(Arc::new(timezone::GoogleTimezone::new(
            client.clone(),
            options.timezone_api_key.clone(),
        ))),
        labels: Arc::new(labels::GoogleVision::new(
            client,
            options.vision_api_key.clone(),
        )),
        poster_directory: options.poster_directory.clone().into(),
    }))
}

fn response() -> response::Builder {
    Response::builder()
}

fn routes(
    services: &Arc<Services>,
    public_directory: &str,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let session = Arc::new(AsyncMutex::new(Session::new(services.clone())));

    warp::get()
        .and(
            warp::path!("api" / "ls")
                .and(warp::query::<LoadQuery>())
                .and_then(|query: LoadQuery| {
                    async move {
                        warp_util::json_response(
                            &path_guard::list_directories(query.path.as_deref()).await?,
                        )
                    }
                    .map_err(|e| {
                        warn!("error listing directories: {:?}", e);

                        Rejection::from(HttpError::from(e))
                    })
                })
                .or(warp::path!("api" / "load")
                    .and(warp::query::<LoadQuery>())
                    .and_then({
                        let services = services.clone();

                        move |query: LoadQuery| {
                            let services = services.clone();

                            async move {
                                warp_util::json_response(
                                    &session::load(
                                        &services,
                                        query.path.as_deref(),
                                        query.output.as_deref(),
                                    )
                                    .await?,
                                )
                            }
                            .map_err(|e| {
                                warn!("error loading directory: {:?}", e);

                                Rejection::from(HttpError::from(e))
                            })
                        }
                    }))
                .or(warp::path!("api" / "img")
                    .and(warp::query::<FileQuery>())
                    .and_then(|query: FileQuery| {
                        async move { preview::image(&query.file, query.size).await }.map_err(
                            |e| {
                                warn!("error rendering image preview: {:?}", e);

                                Rejection::from(HttpError::from(e))
                            },
                        )
                    }))
                .or(warp::path!("api" / "poster")
                    .and(warp::query::<FileQuery>())
                    .and_then({
                        let services = services.clone();

                        move |query: FileQuery| {
                            let services = services.clone();

                            async move {
                                preview::poster(&services.poster_directory, &query.file, query.size)
                                    .await
                            }
                            .map_err(|e| {
                                warn!("error rendering poster: {:?}", e);

                                Rejection::from(HttpError::from(e))
                            })
                        }
                    }))
                .or(warp::path!("api" / "video")
                    .and(warp::query::<FileQuery>())
                    .and_then(|query: FileQuery| {
                        async move { preview::video(&query.file).await }.map_err(|e| {
                            warn!("error streaming video: {:?}", e);

                            Rejection::from(HttpError::from(e))
                        })
                    }))
                .or(warp::path!("api" / "annotate")
                    .and(warp::query::<FileQuery>())
                    .and_then({
                        let services = services.clone();

                        move |query: FileQuery| {
                            let services = services.clone();

                            async move {
                                let tags = labels::scan(
                                    services.labels.as_ref(),
                                    &services.poster_directory,
                                    &query.file,
                                    query.media_type.unwrap_or(MediaType::Image),
                                    query.size,
                                )
                                .await?;

                                warp_util::json_response(&ScanResponse {
                                    file: query.file,
                                    tags,
                                })
                            }
                            .map_err(|e| {
                                warn!("error scanning for labels: {:?}", e);

                                Rejection::from(HttpError::from(e))
                            })
                        }
                    }))
                .or(warp::path!("api" / "trash")
                    .and(warp::query::<TrashRequest>())
                    .and_then(|request: TrashRequest| {
                        async move {
                            let destination =
                                archive::trash(request.path.as_deref(), &request.file).await?;

                            warp_util::json_response(&destination.to_string_lossy())
                        }
                        .map_err(|e| {
                            warn!("error trashing file: {:?}", e);

                            Rejection::from(HttpError::from(e))
                        })
                    }))
                .or(warp::fs::dir(public_directory.to_owned())),
        )
        .or(warp::post().and(
            warp::path!("api" / "save")
                .and(warp::body::json())
                .and_then(|request: SaveRequest| {
                    async move {
                        let saved = archive::save(request.path.as_deref(), &request.item).await?;

                        warp_util::json_response(&SaveResponse {
                            file: saved.file,
                            warning: saved.warning.map(|warning| warning.to_string()),
                        })
                    }
                    .map_err(|e| {
                        warn!("error saving item: {:?}", e);

                        Rejection::from(HttpError::from(e))
                    })
                })
                .or(warp::path!("api" / "session")
                    .and(warp::body::json())
                    .and_then(move |command: Command| {
                        let session = session.clone();

                        async move {
                            let view = session.lock().await.apply(command).await?;

                            warp_util::json_response(&view)
                        }
                        .map_err(|e| {
                            warn!("error applying session command: {:?}", e);

                            Rejection::from(HttpError::from(e))
                        })
                    })),
        ))
        .recover(warp_util::handle_rejection)
        .with(warp::log("archivist"))
}

pub async fn serve(options: &Options) -> Result<()> {
    let routes = routes(&services(options)?, &options.public_directory);

    let (address, future) = warp::serve(routes).try_bind_ephemeral(options.address)?;

    info!("listening on {}", address);

    future.await;

    Ok(())
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::test_util::{self, complete_media, MockLabels, MockProbe, MockTimezone},
        archivist_shared::{DirectoryEntry, LoadResponse, Media, SessionView},
        http::StatusCode,
        hyper::body::Bytes,
        image::GenericImageView,
        maplit::{btreemap, hashmap},
        serde_json::Value,
        std::{collections::BTreeMap, path::Path},
        tempfile::TempDir,
    };

    struct TestState<F> {
        root: TempDir,
        incoming: String,
        archive: String,
        routes: F,
    }

    fn test_state(
        labels: Option<BTreeMap<String, f64>>,
    ) -> Result<TestState<impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone>> {
        test_util::init_logging();

        let root = TempDir::new()?;

        for name in &["incoming", "archive", "public"] {
            std::fs::create_dir(root.path().join(name))?;
        }

        let services = Arc::new(Services {
            probe: Arc::new(MockProbe::new(hashmap![])),
            timezones: timezone::TimezoneResolver::new(Arc::new(MockTimezone::new(Some(
                timezone::Zone {
                    timezone: "Australia/Sydney".into(),
                    offset: 39_600,
                },
            )))),
            labels: Arc::new(MockLabels::new(labels)),
            poster_directory: root.path().join("posters"),
        });

        let routes = routes(&services, root.path().join("public").to_str().unwrap());

        Ok(TestState {
            incoming: root.path().join("incoming").to_str().unwrap().to_owned(),
            archive: root.path().join("archive").to_str().unwrap().to_owned(),
            root,
            routes,
        })
    }

    impl<F: Filter<Extract = (R,), Error = Infallible> + Clone + 'static, R: Reply> TestState<F> {
        fn photo(&self, name: &str) -> Result<String> {
            let path = format!("{}/{}", self.incoming, name);

            test_util::write_jpeg(
                Path::new(&path),
                Some("2019:02:14 14:02:17"),
                Some((-29.6687, 153.109)),
                Some("Google"),
                Some("Pixel"),
            )?;

            Ok(path)
        }

        async fn get(&self, path: &str) -> (StatusCode, Bytes) {
            let response = warp::test::request()
                .method("GET")
                .path(path)
                .reply(&self.routes)
                .await;

            (response.status(), response.body().clone())
        }

        async fn post(&self, path: &str, body: &impl serde::Serialize) -> (StatusCode, Bytes) {
            let response = warp::test::request()
                .method("POST")
                .path(path)
                .json(body)
                .reply(&self.routes)
                .await;

            (response.status(), response.body().clone())
        }
    }

    fn message(body: &[u8]) -> Result<String> {
        Ok(serde_json::from_slice::<Value>(body)?["message"]
            .as_str()
            .unwrap_or_default()
            .to_owned())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn directories() -> Result<()> {
        let state = test_state(None)?;

        let (status, body) = state
            .get(&format!("/api/ls?path={}", state.root.path().to_str().unwrap()))
            .await;

        assert_eq!(status, StatusCode::OK);

        let names = serde_json::from_slice::<Vec<DirectoryEntry>>(&body)?
            .into_iter()
            .map(|entry| entry.name)
            .collect::<Vec<_>>();

        assert_eq!(names, vec!["archive", "incoming", "public"]);

        let (status, _) = state
            .get(&format!("/api/ls?path={}/missing", state.incoming))
            .await;

        assert_eq!(status, StatusCode::NOT_FOUND);

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn load_and_preview() -> Result<()> {
        let state = test_state(Some(btreemap!["ocean".into() => 0.93]))?;

        let file = state.photo("a.jpg")?;

        let (status, body) = state
            .get(&format!(
                "/api/load?path={}&output={}",
                state.incoming, state.archive
            ))
            .await;

        assert_eq!(status, StatusCode::OK);

        let response = serde_json::from_slice::<LoadResponse>(&body)?;

        assert_eq!(response.media.len(), 1);
        assert_eq!(response.media[0].file, file);
        assert_eq!(response.media[0].camera.as_deref(), Some("Google Pixel"));

        let (status, body) = state.get(&format!("/api/img?file={}&size=100", file)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(image::load_from_memory(&body)?.dimensions(), (100, 66));

        let (status, _) = state
            .get(&format!("/api/img?file={}/missing.jpg", state.incoming))
            .await;

        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = state
            .get(&format!("/api/annotate?file={}&type=image", file))
            .await;

        assert_eq!(status, StatusCode::OK);

        assert_eq!(
            serde_json::from_slice::<ScanResponse>(&body)?,
            ScanResponse {
                file,
                tags: btreemap!["ocean".into() => 0.93]
            }
        );

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn failed_annotation() -> Result<()> {
        let state = test_state(None)?;

        let file = state.photo("a.jpg")?;

        let (status, _) = state.get(&format!("/api/annotate?file={}", file)).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn save_and_trash() -> Result<()> {
        let state = test_state(None)?;

        let file = state.photo("a.jpg")?;

        let (status, body) = state
            .post(
                "/api/save",
                &SaveRequest {
                    path: Some(state.archive.clone()),
                    item: Media {
                        camera: None,
                        ..complete_media(&file)
                    },
                },
            )
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message(&body)?, "item is missing a value for 'camera'");

        let (status, body) = state
            .post(
                "/api/save",
                &SaveRequest {
                    path: Some(state.archive.clone()),
                    item: complete_media(&file),
                },
            )
            .await;

        assert_eq!(status, StatusCode::OK);

        assert_eq!(
            serde_json::from_slice::<SaveResponse>(&body)?,
            SaveResponse {
                file: "2019/February/1550152937.jpg".into(),
                warning: None
            }
        );

        assert!(!Path::new(&file).exists());

        // Saving into the directory the item came from is refused.
        let other = state.photo("b.jpg")?;

        let (status, _) = state
            .post(
                "/api/save",
                &SaveRequest {
                    path: Some(state.incoming.clone()),
                    item: complete_media(&other),
                },
            )
            .await;

        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = state
            .get(&format!("/api/trash?path={}&file={}", state.archive, other))
            .await;

        assert_eq!(status, StatusCode::OK);

        assert_eq!(
            serde_json::from_slice::<String>(&body)?,
            format!("{}/trash/b.jpg", state.archive)
        );

        // The file is gone now.
        let (status, _) = state
            .get(&format!("/api/trash?path={}&file={}", state.archive, other))
            .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn session_commands() -> Result<()> {
        let state = test_state(Some(btreemap!["ocean".into() => 0.93]))?;

        state.photo("a.jpg")?;
        state.photo("b.jpg")?;

        let (status, body) = state
            .post(
                "/api/session",
                &Command::Load {
                    path: Some(state.incoming.clone()),
                    output: Some(state.archive.clone()),
                },
            )
            .await;

        assert_eq!(status, StatusCode::OK);

        let view = serde_json::from_slice::<SessionView>(&body)?;

        assert_eq!(view.total, 2);
        assert_eq!(view.index, Some(0));

        let (status, body) = state.post("/api/session", &Command::View).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<SessionView>(&body)?, view);

        let (status, _) = state
            .post("/api/session", &Command::Select { index: 5 })
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Malformed commands are rejected before reaching the session.
        let (status, _) = state
            .post("/api/session", &serde_json::json!({ "type": "dance" }))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);

        Ok(())
    }
}

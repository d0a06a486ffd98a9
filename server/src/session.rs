//! This module provides [Session], the stateful review workflow: a list of incoming items with a cursor, the
//! tag and people frequencies used to rank suggestions, and the [Command]s which move an item through timezone
//! resolution, label scanning, annotation, and finally archiving or trashing.

use {
    crate::{
        archive,
        catalog::Catalog,
        error::Access,
        labels::{self, LabelDetector},
        normalize, path_guard, preview,
        probe::VideoProbe,
        timezone::{Resolution, TimezoneResolver},
        warp_util::HttpError,
    },
    anyhow::Result,
    archivist_shared::{
        suggest_people, suggest_tags, Command, Field, Frequency, LoadResponse, Media, SessionView,
    },
    http::StatusCode,
    std::{path::PathBuf, sync::Arc},
    tracing::info,
};

/// External collaborators shared by every request
pub struct Services {
    pub probe: Arc<dyn VideoProbe>,
    pub timezones: TimezoneResolver,
    pub labels: Arc<dyn LabelDetector>,

    /// Directory in which video poster frames are written
    pub poster_directory: PathBuf,
}

/// Read the tag and people popularity from the catalog in the archive directory `output`.
async fn popularity(output: &str) -> Result<(Frequency, Frequency)> {
    let mut catalog = Catalog::open(output).await?;

    Ok((
        catalog.tag_popularity().await?,
        catalog.person_popularity().await?,
    ))
}

/// Scan the incoming directory `path`, pairing the result with popularity data from the archive directory
/// `output`, if specified.
///
/// Any poster frames extracted during a previous scan are discarded.
pub async fn load(
    services: &Services,
    path: Option<&str>,
    output: Option<&str>,
) -> Result<LoadResponse> {
    let path = path_guard::check_path(path, Access::ReadWrite).await?;

    let (tags, people) = match output.filter(|output| !output.is_empty()) {
        Some(output) => {
            popularity(&path_guard::check_path(Some(output), Access::ReadWrite).await?).await?
        }
        None => (Frequency::default(), Frequency::default()),
    };

    preview::clear_posters(&services.poster_directory).await?;

    let media = normalize::scan(&path, services.probe.as_ref()).await?;

    Ok(LoadResponse {
        media,
        tags,
        people,
    })
}

fn no_selection() -> HttpError {
    HttpError::from_slice(StatusCode::BAD_REQUEST, "no item selected")
}

/// Remove `index` from `media`, returning the cursor position which should follow.
fn remove(media: &mut Vec<Media>, index: usize) -> Option<usize> {
    media.remove(index);

    if media.is_empty() {
        None
    } else {
        Some(index.min(media.len() - 1))
    }
}

pub struct Session {
    services: Arc<Services>,
    media: Vec<Media>,
    cursor: Option<usize>,
    output: Option<String>,
    global_tags: Frequency,
    global_people: Frequency,
    session_tags: Frequency,
    session_people: Frequency,
}

impl Session {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            media: Vec::new(),
            cursor: None,
            output: None,
            global_tags: Frequency::default(),
            global_people: Frequency::default(),
            session_tags: Frequency::default(),
            session_people: Frequency::default(),
        }
    }

    fn selected(&mut self) -> Result<(usize, &mut Media)> {
        let index = self.cursor.ok_or_else(no_selection)?;

        Ok((index, self.media.get_mut(index).ok_or_else(no_selection)?))
    }

    fn output(&self) -> Result<&str> {
        self.output.as_deref().ok_or_else(|| {
            HttpError::from_slice(StatusCode::BAD_REQUEST, "no archive directory selected").into()
        })
    }

    /// Resolve the timezone of the selected item, if any, returning a notice for the user on failure.
    async fn resolve_selected(&mut self) -> Option<String> {
        let services = self.services.clone();

        let item = self.cursor.and_then(|index| self.media.get_mut(index))?;

        match services.timezones.resolve(item).await {
            Resolution::Failed(notice) => Some(notice),
            Resolution::Skipped | Resolution::Cached | Resolution::Resolved => None,
        }
    }

    /// Move the cursor to `index` after removing the current item, and resolve the newly selected item.
    async fn advance(&mut self, index: usize) -> Option<String> {
        self.cursor = remove(&mut self.media, index);

        self.resolve_selected().await
    }

    async fn scan_selected(&mut self) -> Result<Option<String>> {
        let services = self.services.clone();

        let (_, item) = self.selected()?;

        if item.scanned_tags.is_some() {
            return Ok(None);
        }

        item.processing_scanned_tags = true;

        let result = labels::scan(
            services.labels.as_ref(),
            &services.poster_directory,
            &item.file,
            item.media_type,
            None,
        )
        .await;

        item.processing_scanned_tags = false;

        Ok(match result {
            Ok(tags) => {
                item.scanned_tags = Some(tags);

                None
            }

            Err(e) => {
                item.scanned_tags = Some(Default::default());

                Some(e.to_string())
            }
        })
    }

    async fn update_selected(&mut self, field: Field) -> Result<Option<String>> {
        let (_, item) = self.selected()?;

        let relocated = match field {
            Field::Timestamp(timestamp) => {
                item.timestamp = Some(timestamp);
                true
            }

            Field::Location { lat, lng } => {
                item.lat = Some(lat);
                item.lng = Some(lng);
                true
            }

            Field::Camera(camera) => {
                let camera = camera.trim();

                item.camera = if camera.is_empty() {
                    None
                } else {
                    Some(camera.to_owned())
                };

                false
            }

            Field::Tags(tags) => {
                item.tags = tags.into_iter().collect();
                false
            }

            Field::People(people) => {
                item.people = people.into_iter().collect();
                false
            }
        };

        Ok(if relocated {
            self.resolve_selected().await
        } else {
            None
        })
    }

    async fn save_selected(&mut self) -> Result<Option<String>> {
        let output = self.output()?.to_owned();

        let index = self.cursor.ok_or_else(no_selection)?;
        let item = self.media.get(index).ok_or_else(no_selection)?;

        let saved = archive::save(Some(&output), item).await?;

        for tag in &item.tags {
            self.session_tags.increment(tag);
            self.global_tags.increment(tag);
        }

        for person in &item.people {
            self.session_people.increment(person);
            self.global_people.increment(person);
        }

        let warning = saved.warning.map(|warning| warning.to_string());

        let notice = self.advance(index).await;

        Ok(warning.or(notice))
    }

    async fn trash_selected(&mut self) -> Result<Option<String>> {
        let output = self.output()?.to_owned();

        let index = self.cursor.ok_or_else(no_selection)?;
        let item = self.media.get(index).ok_or_else(no_selection)?;

        archive::trash(Some(&output), &item.file).await?;

        Ok(self.advance(index).await)
    }

    /// Apply `command` to this session, returning the resulting state.
    ///
    /// If a command fails, the session is left as it was before the command was applied, with the exception that
    /// a failed timezone lookup or label scan is recorded on the item and reported via [SessionView::notice].
    pub async fn apply(&mut self, command: Command) -> Result<SessionView> {
        let notice = match command {
            Command::Load { path, output } => {
                let response = load(&self.services, path.as_deref(), output.as_deref()).await?;

                info!(
                    "session loaded {} items from {}",
                    response.media.len(),
                    path.as_deref().unwrap_or("/")
                );

                self.media = response.media;
                self.global_tags = response.tags;
                self.global_people = response.people;
                self.session_tags = Frequency::default();
                self.session_people = Frequency::default();
                self.output = output.filter(|output| !output.is_empty());
                self.cursor = if self.media.is_empty() { None } else { Some(0) };

                self.resolve_selected().await
            }

            Command::Select { index } => {
                if index >= self.media.len() {
                    return Err(
                        HttpError::from_slice(StatusCode::BAD_REQUEST, "index out of range").into(),
                    );
                }

                self.cursor = Some(index);

                self.resolve_selected().await
            }

            Command::Update { field } => self.update_selected(field).await?,

            Command::Scan => self.scan_selected().await?,

            Command::Save => self.save_selected().await?,

            Command::Trash => self.trash_selected().await?,

            Command::View => None,
        };

        Ok(self.view(notice))
    }

    /// The current state of this session, as seen by the client
    pub fn view(&self, notice: Option<String>) -> SessionView {
        let item = self.cursor.and_then(|index| self.media.get(index));

        SessionView {
            index: self.cursor,
            total: self.media.len(),
            tag_suggestions: item.and_then(|item| {
                suggest_tags(&self.global_tags, &self.session_tags, item.scan_state())
            }),
            people_suggestions: suggest_people(&self.global_people, &self.session_people),
            item: item.cloned(),
            notice,
        }
    }
}

//! This module provides [Catalog], which owns the SQLite database recording the contents of an archive.
//!
//! Each archive directory has its own catalog file.  A connection is opened per operation, so foreign key
//! enforcement (which SQLite tracks per connection) is switched on every time.

use {
    anyhow::Result,
    archivist_shared::{Frequency, MediaType},
    sqlx::{
        query::Query,
        sqlite::{SqliteArguments, SqliteConnectOptions, SqliteRow},
        ConnectOptions, Row, Sqlite, SqliteConnection,
    },
    std::{path::Path, sync::Arc, time::Duration},
    tracing::warn,
};

/// Name of the catalog file within an archive directory
pub const CATALOG_FILE: &str = "media.db";

/// How long a writer waits for another connection's exclusive transaction to finish
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const TAG_POPULARITY: &str = "SELECT tag.name, COUNT(*) AS count \
                              FROM tag_map LEFT JOIN tag ON tag.id = tag_map.tag \
                              GROUP BY tag_map.tag \
                              ORDER BY count DESC";

const PERSON_POPULARITY: &str = "SELECT person.name, COUNT(*) AS count \
                                 FROM person_map LEFT JOIN person ON person.id = person_map.person \
                                 GROUP BY person_map.person \
                                 ORDER BY count DESC";

/// A statement parameter
#[derive(Debug, PartialEq, Clone)]
pub enum Param {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Param::Integer(value)
    }
}

impl From<u32> for Param {
    fn from(value: u32) -> Self {
        Param::Integer(i64::from(value))
    }
}

impl From<f64> for Param {
    fn from(value: f64) -> Self {
        Param::Real(value)
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::Text(value.to_owned())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Param::Text(value)
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Param::Null)
    }
}

/// Outcome of [Catalog::execute]
#[derive(Debug, Copy, Clone)]
pub struct Executed {
    pub rows_affected: u64,
    pub last_insert_id: i64,
}

fn bind<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[Param],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    params.iter().fold(query, |query, param| match param {
        Param::Null => query.bind(None::<i64>),
        Param::Integer(value) => query.bind(*value),
        Param::Real(value) => query.bind(*value),
        Param::Text(value) => query.bind(value.clone()),
    })
}

/// A media row ready to be inserted, with every mandatory value present
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRow {
    /// Path relative to the archive directory
    pub file: String,
    pub media_type: MediaType,
    pub size: u64,
    pub length: Option<f64>,
    pub width: u32,
    pub height: u32,
    pub timestamp: i64,
    pub timezone: String,
    pub tz_offset: i64,
    pub lat: f64,
    pub lng: f64,
    pub camera: String,
}

/// A tag to be linked to a media row, with the confidence score recorded in `tag_map`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredTag {
    pub name: String,
    pub score: i64,
}

pub struct Catalog {
    conn: SqliteConnection,
}

impl Catalog {
    /// Open (creating if necessary) the catalog in the archive directory `root`.
    ///
    /// The schema is created under an exclusive lock, so this may be called any number of times against the same
    /// file.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, sqlx::Error> {
        let conn = SqliteConnectOptions::new()
            .filename(root.as_ref().join(CATALOG_FILE))
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT)
            .connect()
            .await?;

        let mut catalog = Self { conn };

        catalog.begin_exclusive().await?;

        for statement in schema::DDL_STATEMENTS {
            if let Err(e) = catalog.execute(statement, &[]).await {
                catalog.rollback().await;

                return Err(e);
            }
        }

        catalog.commit().await?;

        Ok(catalog)
    }

    /// Run a statement which returns no rows.
    pub async fn execute(&mut self, sql: &str, params: &[Param]) -> Result<Executed, sqlx::Error> {
        let result = bind(sqlx::query(sql), params)
            .execute(&mut self.conn)
            .await?;

        Ok(Executed {
            rows_affected: result.rows_affected(),
            last_insert_id: result.last_insert_rowid(),
        })
    }

    /// Run a query, returning its first row, if any.
    pub async fn fetch_one(
        &mut self,
        sql: &str,
        params: &[Param],
    ) -> Result<Option<SqliteRow>, sqlx::Error> {
        bind(sqlx::query(sql), params)
            .fetch_optional(&mut self.conn)
            .await
    }

    /// Run a query, returning all its rows.
    pub async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[Param],
    ) -> Result<Vec<SqliteRow>, sqlx::Error> {
        bind(sqlx::query(sql), params)
            .fetch_all(&mut self.conn)
            .await
    }

    /// Begin a transaction which locks out every other connection until it ends.
    pub async fn begin_exclusive(&mut self) -> Result<(), sqlx::Error> {
        self.execute("BEGIN EXCLUSIVE", &[]).await.map(drop)
    }

    pub async fn commit(&mut self) -> Result<(), sqlx::Error> {
        self.execute("COMMIT", &[]).await.map(drop)
    }

    /// Roll back the current transaction, logging (but otherwise ignoring) any failure to do so.
    pub async fn rollback(&mut self) {
        if let Err(e) = self.execute("ROLLBACK", &[]).await {
            warn!("error rolling back transaction: {:?}", e);
        }
    }

    async fn popularity(&mut self, sql: &str) -> Result<Frequency, sqlx::Error> {
        let rows = self.fetch_all(sql, &[]).await?;

        let mut counts = Vec::with_capacity(rows.len());

        for row in rows {
            let name = row.try_get::<&str, _>(0)?;
            let count = row.try_get::<i64, _>(1)?;

            counts.push((Arc::from(name), u32::try_from(count).unwrap_or(u32::MAX)));
        }

        Ok(Frequency::from_counts(counts))
    }

    /// Number of cataloged items carrying each tag, most popular first
    ///
    /// Tags with equal counts appear in whatever order SQLite produces them.
    pub async fn tag_popularity(&mut self) -> Result<Frequency, sqlx::Error> {
        self.popularity(TAG_POPULARITY).await
    }

    /// Number of cataloged items featuring each person, most popular first
    pub async fn person_popularity(&mut self) -> Result<Frequency, sqlx::Error> {
        self.popularity(PERSON_POPULARITY).await
    }

    /// Find the id of the row in `tag` or `person` with the specified name, inserting it if necessary.
    async fn name_id(&mut self, select: &str, insert: &str, name: &str) -> Result<i64, sqlx::Error> {
        if let Some(row) = self.fetch_one(select, &[name.into()]).await? {
            row.try_get(0)
        } else {
            Ok(self.execute(insert, &[name.into()]).await?.last_insert_id)
        }
    }

    async fn insert_rows(
        &mut self,
        row: &MediaRow,
        tags: &[ScoredTag],
        people: &[String],
    ) -> Result<i64, sqlx::Error> {
        let id = self
            .execute(
                "INSERT INTO media \
                 (file, type, size, length, width, height, timestamp, timezone, tzOffset, lat, lng, camera) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                &[
                    row.file.as_str().into(),
                    row.media_type.as_str().into(),
                    i64::try_from(row.size).unwrap_or(i64::MAX).into(),
                    row.length.into(),
                    row.width.into(),
                    row.height.into(),
                    row.timestamp.into(),
                    row.timezone.as_str().into(),
                    row.tz_offset.into(),
                    row.lat.into(),
                    row.lng.into(),
                    row.camera.as_str().into(),
                ],
            )
            .await?
            .last_insert_id;

        for tag in tags {
            let tag_id = self
                .name_id(
                    "SELECT id FROM tag WHERE name = ?1",
                    "INSERT INTO tag (name) VALUES (?1)",
                    &tag.name,
                )
                .await?;

            self.execute(
                "INSERT INTO tag_map (media, tag, score) VALUES (?1, ?2, ?3)",
                &[id.into(), tag_id.into(), tag.score.into()],
            )
            .await?;
        }

        for person in people {
            let person_id = self
                .name_id(
                    "SELECT id FROM person WHERE name = ?1",
                    "INSERT INTO person (name) VALUES (?1)",
                    person,
                )
                .await?;

            self.execute(
                "INSERT INTO person_map (media, person) VALUES (?1, ?2)",
                &[id.into(), person_id.into()],
            )
            .await?;
        }

        Ok(id)
    }

    /// Record a media item along with its tags and people in a single exclusive transaction, returning the new
    /// media row id.
    ///
    /// If any statement fails, the whole transaction is rolled back and no rows remain.
    pub async fn insert_media(
        &mut self,
        row: &MediaRow,
        tags: &[ScoredTag],
        people: &[String],
    ) -> Result<i64, sqlx::Error> {
        self.begin_exclusive().await?;

        match self.insert_rows(row, tags, people).await {
            Ok(id) => {
                if let Err(e) = self.commit().await {
                    self.rollback().await;

                    Err(e)
                } else {
                    Ok(id)
                }
            }

            Err(e) => {
                self.rollback().await;

                Err(e)
            }
        }
    }

    /// Retrieve the id of the media row for `file` (relative to the archive directory), if any.
    pub async fn media_by_file(&mut self, file: &str) -> Result<Option<i64>, sqlx::Error> {
        self.fetch_one("SELECT id FROM media WHERE file = ?1", &[file.into()])
            .await?
            .map(|row| row.try_get(0))
            .transpose()
    }

    /// Number of rows in each catalog table, in the order media, tag, person, tag_map, person_map
    pub async fn row_counts(&mut self) -> Result<[i64; 5], sqlx::Error> {
        let mut counts = [0; 5];

        for (index, table) in ["media", "tag", "person", "tag_map", "person_map"]
            .iter()
            .enumerate()
        {
            // Table names come from the fixed list above, never from callers.
            if let Some(row) = self
                .fetch_one(&format!("SELECT COUNT(*) FROM {}", table), &[])
                .await?
            {
                counts[index] = row.try_get(0)?;
            }
        }

        Ok(counts)
    }
}

#[cfg(test)]
mod test {
    use {super::*, tempfile::TempDir};

    fn media_row(file: &str) -> MediaRow {
        MediaRow {
            file: file.to_owned(),
            media_type: MediaType::Image,
            size: 1234,
            length: None,
            width: 480,
            height: 320,
            timestamp: 1_550_152_937,
            timezone: "Australia/Sydney".into(),
            tz_offset: 39_600,
            lat: -29.6687,
            lng: 153.109,
            camera: "Google Pixel".into(),
        }
    }

    fn tags(names: &[&str]) -> Vec<ScoredTag> {
        names
            .iter()
            .map(|&name| ScoredTag {
                name: name.to_owned(),
                score: 1,
            })
            .collect()
    }

    fn people(names: &[&str]) -> Vec<String> {
        names.iter().map(|&name| name.to_owned()).collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn open_is_idempotent() -> Result<()> {
        let dir = TempDir::new()?;

        {
            let mut catalog = Catalog::open(dir.path()).await?;

            catalog
                .insert_media(&media_row("2019/February/1.jpg"), &tags(&["dog"]), &[])
                .await?;
        }

        let mut catalog = Catalog::open(dir.path()).await?;

        assert_eq!(catalog.row_counts().await?, [1, 1, 0, 1, 0]);

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn primitives_are_parameterized() -> Result<()> {
        let dir = TempDir::new()?;
        let mut catalog = Catalog::open(dir.path()).await?;

        let hostile = "x'); DROP TABLE tag; --";

        let executed = catalog
            .execute("INSERT INTO tag (name) VALUES (?1)", &[hostile.into()])
            .await?;

        assert_eq!(executed.rows_affected, 1);

        let row = catalog
            .fetch_one("SELECT name FROM tag WHERE id = ?1", &[executed.last_insert_id.into()])
            .await?
            .unwrap();

        assert_eq!(row.try_get::<String, _>(0)?, hostile);

        assert_eq!(
            catalog
                .fetch_all("SELECT name FROM tag", &[])
                .await?
                .len(),
            1
        );

        assert!(catalog
            .execute("INSERT INTO no_such_table VALUES (?1)", &[Param::Null])
            .await
            .is_err());

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn popularity() -> Result<()> {
        let dir = TempDir::new()?;
        let mut catalog = Catalog::open(dir.path()).await?;

        catalog
            .insert_media(
                &media_row("a.jpg"),
                &tags(&["beach", "dog"]),
                &people(&["Ivy"]),
            )
            .await?;

        catalog
            .insert_media(
                &media_row("b.jpg"),
                &tags(&["dog"]),
                &people(&["Ivy", "Josef"]),
            )
            .await?;

        catalog
            .insert_media(&media_row("c.jpg"), &tags(&["dog", "tree"]), &[])
            .await?;

        let tags = catalog.tag_popularity().await?;

        assert_eq!(tags.ranked().first().map(|s| s.as_ref()), Some("dog"));
        assert_eq!(tags.count("dog"), 3);
        assert_eq!(tags.count("beach"), 1);
        assert_eq!(tags.count("tree"), 1);

        let people = catalog.person_popularity().await?;

        assert_eq!(people.ranked().first().map(|s| s.as_ref()), Some("Ivy"));
        assert_eq!(people.count("Ivy"), 2);
        assert_eq!(people.count("Josef"), 1);

        // Names are shared between media rows rather than duplicated.
        assert_eq!(catalog.row_counts().await?, [3, 3, 2, 5, 3]);

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn cascading_deletes() -> Result<()> {
        let dir = TempDir::new()?;
        let mut catalog = Catalog::open(dir.path()).await?;

        let id = catalog
            .insert_media(&media_row("a.jpg"), &tags(&["dog"]), &people(&["Ivy"]))
            .await?;

        catalog
            .insert_media(&media_row("b.jpg"), &tags(&["dog"]), &[])
            .await?;

        catalog
            .execute("DELETE FROM media WHERE id = ?1", &[id.into()])
            .await?;

        assert_eq!(catalog.row_counts().await?, [1, 1, 1, 1, 0]);

        catalog
            .execute("DELETE FROM tag WHERE name = ?1", &["dog".into()])
            .await?;

        assert_eq!(catalog.row_counts().await?, [1, 0, 1, 0, 0]);

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn duplicate_file_rolls_back() -> Result<()> {
        let dir = TempDir::new()?;
        let mut catalog = Catalog::open(dir.path()).await?;

        catalog
            .insert_media(&media_row("a.jpg"), &tags(&["dog"]), &[])
            .await?;

        assert!(catalog
            .insert_media(&media_row("a.jpg"), &tags(&["cat"]), &people(&["Ivy"]))
            .await
            .is_err());

        assert_eq!(catalog.row_counts().await?, [1, 1, 0, 1, 0]);
        assert!(catalog.media_by_file("a.jpg").await?.is_some());
        assert!(catalog.media_by_file("b.jpg").await?.is_none());

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn second_writer_waits() -> Result<()> {
        let dir = TempDir::new()?;

        let mut first = Catalog::open(dir.path()).await?;
        let mut second = Catalog::open(dir.path()).await?;

        first.begin_exclusive().await?;

        first
            .execute("INSERT INTO tag (name) VALUES (?1)", &["first".into()])
            .await?;

        let (tx, mut rx) = tokio::sync::oneshot::channel();

        let writer = tokio::spawn(async move {
            let result = second
                .insert_media(&media_row("a.jpg"), &tags(&["second"]), &[])
                .await;

            let _ = tx.send(());

            result.map(|_| second)
        });

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(rx.try_recv().is_err());

        first.commit().await?;

        let mut second = writer.await??;

        assert_eq!(second.row_counts().await?, [1, 2, 0, 1, 0]);

        Ok(())
    }
}

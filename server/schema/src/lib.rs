#![deny(warnings)]

/// Catalog DDL, safe to run against an existing catalog.
pub static DDL_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS media (
       id          INTEGER PRIMARY KEY,
       file        TEXT NOT NULL UNIQUE,
       type        TEXT NOT NULL,
       size        INTEGER NOT NULL,
       length      INTEGER DEFAULT NULL,
       width       INTEGER NOT NULL,
       height      INTEGER NOT NULL,
       timestamp   INTEGER NOT NULL,
       timezone    TEXT NOT NULL,
       tzOffset    INTEGER NOT NULL,
       lat         REAL NOT NULL,
       lng         REAL NOT NULL,
       camera      TEXT NOT NULL
     )",
    "CREATE TABLE IF NOT EXISTS tag (
       id          INTEGER PRIMARY KEY,
       name        TEXT NOT NULL UNIQUE
     )",
    "CREATE TABLE IF NOT EXISTS person (
       id          INTEGER PRIMARY KEY,
       name        TEXT NOT NULL UNIQUE
     )",
    "CREATE TABLE IF NOT EXISTS tag_map (
       media       INTEGER NOT NULL REFERENCES media(id) ON DELETE CASCADE ON UPDATE CASCADE,
       tag         INTEGER NOT NULL REFERENCES tag(id) ON DELETE CASCADE ON UPDATE CASCADE,
       score       INTEGER NOT NULL,

       UNIQUE (media, tag)
     )",
    "CREATE TABLE IF NOT EXISTS person_map (
       media       INTEGER NOT NULL REFERENCES media(id) ON DELETE CASCADE ON UPDATE CASCADE,
       person      INTEGER NOT NULL REFERENCES person(id) ON DELETE CASCADE ON UPDATE CASCADE,

       UNIQUE (media, person)
     )",
];

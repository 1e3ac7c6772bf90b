use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Local};
use rusqlite::Connection;

use crate::measurement::Payload;

/// Local record of every payload handed to the broker.
#[derive(Debug)]
pub struct Journal {
    conn: Connection,
}

impl Journal {
    pub fn open(path: &Path) -> Result<Self, anyhow::Error> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open journal file {}", path.display()))?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, anyhow::Error> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory journal")?;
        Ok(Self { conn })
    }

    pub fn init(&self) -> Result<(), anyhow::Error> {
        self.conn
            .execute_batch(
                r"
                CREATE TABLE IF NOT EXISTS temperature_data (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    timestamp TEXT NOT NULL,
                    temperature REAL NOT NULL,
                    average REAL NOT NULL
                );
                ",
            )
            .context("Failed to create table")?;
        Ok(())
    }

    pub fn insert(&self, timestamp: DateTime<Local>, payload: &Payload) -> Result<(), anyhow::Error> {
        self.conn
            .execute(
                r"
                INSERT INTO temperature_data (timestamp, temperature, average) VALUES (?1, ?2, ?3)",
                rusqlite::params![timestamp.to_rfc3339(), payload.temperature, payload.average],
            )
            .context("Failed to insert data into table")?;
        Ok(())
    }

    /// Most recent rows first.
    #[cfg(test)]
    pub fn latest(&self, limit: usize) -> Result<Vec<Payload>, anyhow::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT temperature, average FROM temperature_data ORDER BY id DESC LIMIT ?1")
            .context("Failed to prepare query")?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok(Payload {
                    temperature: row.get(0)?,
                    average: row.get(1)?,
                })
            })
            .context("Failed to query journal")?;

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to read journal row")
    }
}

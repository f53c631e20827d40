//! SQLite access to the probemon database.
//!
//! The capture process owns the raw tables (`vendor`, `mac`, `ssid`,
//! `probemon`). This crate reads them, and in read-write mode additionally
//! owns the derived `stats` table. Reporting opens the file read-only at
//! the SQLite level so no error path can write to it.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, OptionalExtension, params, params_from_iter};
use serde::Serialize;

use crate::core::errors::{ProbeError, Result};
use crate::stats::daily::ProbeSample;
use crate::stats::filter::{Columns, Filter};

/// How the store was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccessMode {
    ReadWrite,
    ReadOnly,
}

/// Handle on one probemon database file.
#[derive(Debug)]
pub struct ProbeStore {
    conn: Connection,
    path: PathBuf,
    mode: AccessMode,
}

impl ProbeStore {
    /// Open an existing database for consolidation.
    pub fn open_read_write(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ProbeError::MissingDatabase {
                path: path.to_path_buf(),
            });
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| ProbeError::sql("open read-write", &e))?;
        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            mode: AccessMode::ReadWrite,
        })
    }

    /// Create (or open) a database and make sure the raw tables exist.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| ProbeError::io(parent, source))?;
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| ProbeError::sql("create", &e))?;
        let store = Self {
            conn,
            path: path.to_path_buf(),
            mode: AccessMode::ReadWrite,
        };
        store.init_raw_schema()?;
        Ok(store)
    }

    /// Open an existing database for reporting. Writes are impossible.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ProbeError::MissingDatabase {
                path: path.to_path_buf(),
            });
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| ProbeError::sql("open read-only", &e))?;
        conn.execute_batch(
            "PRAGMA query_only = ON;
             PRAGMA temp_store = MEMORY;",
        )?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            mode: AccessMode::ReadOnly,
        })
    }

    /// Path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.mode == AccessMode::ReadOnly
    }

    /// Borrow the underlying connection (for the stats and report engines).
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Whether a table called `name` exists.
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |row| row.get(0),
            )
            .map_err(|e| ProbeError::sql("table lookup", &e))?;
        Ok(count == 1)
    }

    // ──────────────────── raw tables ────────────────────

    /// Create the capture-side tables if they are missing.
    pub fn init_raw_schema(&self) -> Result<()> {
        self.ensure_writable()?;
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS vendor (
                    id INTEGER NOT NULL PRIMARY KEY,
                    name TEXT
                );

                CREATE TABLE IF NOT EXISTS mac (
                    id INTEGER NOT NULL PRIMARY KEY,
                    address TEXT,
                    vendor INTEGER,
                    FOREIGN KEY(vendor) REFERENCES vendor(id)
                );

                CREATE TABLE IF NOT EXISTS ssid (
                    id INTEGER NOT NULL PRIMARY KEY,
                    name TEXT
                );

                CREATE TABLE IF NOT EXISTS probemon (
                    date FLOAT,
                    mac INTEGER,
                    ssid INTEGER,
                    rssi INTEGER,
                    FOREIGN KEY(mac) REFERENCES mac(id),
                    FOREIGN KEY(ssid) REFERENCES ssid(id)
                );

                CREATE INDEX IF NOT EXISTS idx_probemon_date ON probemon(date);",
            )
            .map_err(|e| ProbeError::sql("raw schema", &e))?;
        Ok(())
    }

    /// Append one probe event, creating vendor/device/network rows as needed.
    ///
    /// An empty `network` records "no network". A `signal` of 0 records
    /// "strength not captured".
    pub fn record_probe(
        &self,
        timestamp: f64,
        address: &str,
        vendor: &str,
        network: &str,
        signal: i32,
    ) -> Result<()> {
        self.ensure_writable()?;
        let vendor_id = self.lookup_or_insert("vendor", vendor)?;
        let mac_id = match self
            .conn
            .query_row(
                "SELECT id FROM mac WHERE address = ?1",
                params![address],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
        {
            Some(id) => id,
            None => {
                self.conn
                    .prepare_cached("INSERT INTO mac (address, vendor) VALUES (?1, ?2)")?
                    .execute(params![address, vendor_id])?;
                self.conn.last_insert_rowid()
            }
        };
        let ssid_id = self.lookup_or_insert("ssid", network)?;
        self.conn
            .prepare_cached("INSERT INTO probemon (date, mac, ssid, rssi) VALUES (?1,?2,?3,?4)")?
            .execute(params![timestamp, mac_id, ssid_id, signal])?;
        Ok(())
    }

    /// Earliest and latest event timestamps, or `None` for an empty store.
    pub fn event_time_range(&self) -> Result<Option<(f64, f64)>> {
        let (first, last): (Option<f64>, Option<f64>) = self
            .conn
            .query_row("SELECT MIN(date), MAX(date) FROM probemon", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .map_err(|e| ProbeError::sql("event time range", &e))?;
        Ok(first.zip(last))
    }

    /// Look up a network name's id.
    pub fn network_id(&self, name: &str) -> Result<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM ssid WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| ProbeError::sql("network lookup", &e))?;
        Ok(id)
    }

    /// Distinct device ids with an event inside `[start, end)`.
    pub fn devices_seen_between(&self, start: f64, end: f64) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT DISTINCT mac FROM probemon
                 WHERE date >= ?1 AND date < ?2
                 ORDER BY mac",
            )
            .map_err(|e| ProbeError::sql("devices in window", &e))?;
        let ids = stmt
            .query_map(params![start, end], |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Samples of one device inside `[start, end)`.
    pub fn device_samples(&self, device_id: i64, start: f64, end: f64) -> Result<Vec<ProbeSample>> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT probemon.date, ssid.name, probemon.rssi FROM probemon
                 INNER JOIN ssid ON ssid.id = probemon.ssid
                 WHERE probemon.mac = ?1 AND probemon.date >= ?2 AND probemon.date < ?3",
            )
            .map_err(|e| ProbeError::sql("device samples", &e))?;
        let samples = stmt
            .query_map(params![device_id, start, end], |row| {
                Ok(ProbeSample {
                    timestamp: row.get(0)?,
                    network_name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    signal: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(samples)
    }

    /// Devices selected by the device clauses of `filter`, by id.
    pub fn devices_matching(&self, filter: &Filter) -> Result<Vec<Device>> {
        let (clause, args) = filter.device_clauses().render(&Columns::EVENTS);
        let sql = format!(
            "SELECT mac.id, mac.address, vendor.name FROM mac
             INNER JOIN vendor ON vendor.id = mac.vendor{clause}
             ORDER BY mac.id"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| ProbeError::sql("devices matching", &e))?;
        let devices = stmt
            .query_map(params_from_iter(args), Device::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(devices)
    }

    /// Distinct devices with an event on `network_id` that passes `filter`.
    pub fn devices_probing_network(&self, network_id: i64, filter: &Filter) -> Result<Vec<Device>> {
        let (clause, args) = filter.for_network(network_id).render(&Columns::EVENTS);
        let sql = format!(
            "SELECT DISTINCT mac.id, mac.address, vendor.name FROM probemon
             INNER JOIN mac ON mac.id = probemon.mac
             INNER JOIN vendor ON vendor.id = mac.vendor{clause}
             ORDER BY mac.id"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| ProbeError::sql("devices probing network", &e))?;
        let devices = stmt
            .query_map(params_from_iter(args), Device::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(devices)
    }

    /// Every event passing `filter`, oldest first.
    pub fn events(&self, filter: &Filter) -> Result<Vec<ProbeEvent>> {
        let (clause, args) = filter.render(&Columns::EVENTS);
        let sql = format!(
            "SELECT probemon.date, mac.id, mac.address, vendor.name, ssid.name, probemon.rssi
             FROM probemon
             INNER JOIN mac ON mac.id = probemon.mac
             INNER JOIN vendor ON vendor.id = mac.vendor
             INNER JOIN ssid ON ssid.id = probemon.ssid{clause}
             ORDER BY probemon.date"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| ProbeError::sql("events", &e))?;
        let events = stmt
            .query_map(params_from_iter(args), |row| {
                Ok(ProbeEvent {
                    timestamp: row.get(0)?,
                    device_id: row.get(1)?,
                    address: row.get(2)?,
                    vendor: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    network_name: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    signal: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }

    fn lookup_or_insert(&self, table: &'static str, name: &str) -> Result<i64> {
        let select = format!("SELECT id FROM {table} WHERE name = ?1");
        let existing = self
            .conn
            .query_row(&select, params![name], |row| row.get::<_, i64>(0))
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        let insert = format!("INSERT INTO {table} (name) VALUES (?1)");
        self.conn.prepare_cached(&insert)?.execute(params![name])?;
        Ok(self.conn.last_insert_rowid())
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.is_read_only() {
            return Err(ProbeError::ReadOnlyStore {
                path: self.path.clone(),
            });
        }
        Ok(())
    }
}

// ──────────────────── row types ────────────────────

/// A device as recorded in the `mac` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub id: i64,
    pub address: String,
    pub vendor: String,
}

impl Device {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            address: row.get(1)?,
            vendor: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        })
    }

    /// Whether this address has the locally-administered (randomized) bit set.
    pub fn is_locally_administered(&self) -> bool {
        is_locally_administered(&self.address)
    }
}

/// Whether bit `0x02` of the first octet is set.
///
/// An address whose first octet is not hex is treated as globally unique.
pub fn is_locally_administered(address: &str) -> bool {
    address
        .split(':')
        .next()
        .and_then(|octet| u8::from_str_radix(octet, 16).ok())
        .is_some_and(|byte| byte & 0b0000_0010 != 0)
}

/// One joined probe event, as returned by filtered raw queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeEvent {
    pub timestamp: f64,
    pub device_id: i64,
    pub address: String,
    pub vendor: String,
    pub network_name: String,
    pub signal: i32,
}

impl ProbeEvent {
    pub fn is_locally_administered(&self) -> bool {
        is_locally_administered(&self.address)
    }
}

// ──────────────────── tests ────────────────────

// src/store/reservations.rs

//! Host reservations persisted as `<nick>.<user>.gim` files in the drop
//! directory. Each file holds one line: `user start end`.

use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, warn};

use crate::hosts::Reservation;
use crate::store::queue::QueueStore;
use crate::store::records::file_name;

/// A reservation file read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredReservation {
    pub host: String,
    pub reservation: Reservation,
}

impl QueueStore {
    fn reservation_path(&self, host: &str, user: &str) -> PathBuf {
        self.drop_dir().join(format!("{host}.{user}.gim"))
    }

    pub fn save_reservation(&self, host: &str, reservation: &Reservation) -> Result<()> {
        let line = format!(
            "{} {} {}\n",
            reservation.owner, reservation.start, reservation.end
        );
        self.fs.write_atomic(
            &self.reservation_path(host, &reservation.owner),
            line.as_bytes(),
        )
    }

    pub fn remove_reservation(&self, host: &str, user: &str) -> Result<()> {
        let path = self.reservation_path(host, user);
        if self.fs.exists(&path) {
            self.fs.remove_file(&path)?;
        }
        Ok(())
    }

    /// Load every reservation that has not yet expired. Expired files are
    /// deleted.
    pub fn load_reservations(&self, now: i64) -> Vec<StoredReservation> {
        let mut out = Vec::new();
        if !self.fs.is_dir(self.drop_dir()) {
            return out;
        }
        let paths = match self.fs.read_dir(self.drop_dir()) {
            Ok(paths) => paths,
            Err(err) => {
                warn!(error = %err, "failed to scan drop directory for reservations");
                return out;
            }
        };

        for path in paths {
            let Some(name) = file_name(&path) else { continue };
            if !self.patterns.reservation.is_match(name) {
                continue;
            }
            let Some(host) = name.split('.').next().filter(|h| !h.is_empty()) else {
                continue;
            };

            let parsed = self
                .fs
                .read_to_string(&path)
                .ok()
                .and_then(|text| parse_reservation_line(&text));
            match parsed {
                Some(reservation) if reservation.end > now => out.push(StoredReservation {
                    host: host.to_string(),
                    reservation,
                }),
                Some(_) => {
                    debug!(path = ?path, "discarding expired reservation");
                    if let Err(err) = self.fs.remove_file(&path) {
                        warn!(path = ?path, error = %err, "failed to delete expired reservation");
                    }
                }
                None => warn!(path = ?path, "ignoring malformed reservation file"),
            }
        }
        out
    }
}

fn parse_reservation_line(text: &str) -> Option<Reservation> {
    let mut words = text.split_whitespace();
    let owner = words.next()?.to_string();
    let start = words.next()?.parse().ok()?;
    let end = words.next()?.parse().ok()?;
    Some(Reservation {
        owner,
        start,
        end,
        reason: String::new(),
    })
}

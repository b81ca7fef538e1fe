//! Pairs a new sighting with the stored one for the same plate and decides
//! what it means: duplicate, first sighting, expired pair, or a speed.

use crate::db::Store;
use crate::notify::Notifier;
use crate::types::{DetectionEvent, NewDetection};
use chrono::DateTime;
use failure::Fail;
use log::{error, info, warn};

pub const CAMERA_DISTANCE_METERS: f64 = 25.0;
pub const SPEED_LIMIT_KMH: f64 = 30.0;
pub const FRESHNESS_WINDOW_SECONDS: f64 = 300.0;

/// Cameras send e.g. `2024-05-01T12:00:00.000+02:00`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.%3f%:z";

/// Byte layout every timestamp must match before chrono sees it: `0` is any
/// digit, `+` is either offset sign, anything else is literal.
const TIMESTAMP_LAYOUT: &[u8] = b"0000-00-00T00:00:00.000+00:00";

#[derive(Debug, Clone)]
pub struct Rules {
    pub camera_distance_meters: f64,
    pub speed_limit_kmh: f64,
    pub freshness_window_seconds: f64,
    /// Keep the new sighting as a first sighting once the old one expired.
    pub store_after_expiry: bool,
}

impl Default for Rules {
    fn default() -> Self {
        Rules {
            camera_distance_meters: CAMERA_DISTANCE_METERS,
            speed_limit_kmh: SPEED_LIMIT_KMH,
            freshness_window_seconds: FRESHNESS_WINDOW_SECONDS,
            store_after_expiry: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// An identical (plate, timestamp) was stored; it has been removed.
    Duplicate,
    /// No earlier sighting; the candidate was stored.
    FirstSighting(DetectionEvent),
    /// The earlier sighting was outside the freshness window and was removed.
    StaleReplaced {
        expired: DetectionEvent,
        stored: Option<DetectionEvent>,
    },
    Speeding { kmh: f64 },
    NotSpeeding { kmh: f64 },
}

#[derive(Debug, Fail)]
pub enum EvaluateError {
    #[fail(display = "invalid timestamp format")]
    InvalidTimestamp,
    #[fail(display = "store error: {}", _0)]
    Store(#[cause] rusqlite::Error),
}

impl From<rusqlite::Error> for EvaluateError {
    fn from(e: rusqlite::Error) -> Self {
        EvaluateError::Store(e)
    }
}

fn matches_layout(s: &str) -> bool {
    s.len() == TIMESTAMP_LAYOUT.len()
        && s
            .bytes()
            .zip(TIMESTAMP_LAYOUT.iter())
            .all(|(b, &l)| match l {
                b'0' => b.is_ascii_digit(),
                b'+' => b == b'+' || b == b'-',
                _ => b == l,
            })
}

/// chrono alone accepts `+0200` and a space before the offset; the layout
/// check rejects both.
pub fn parse_timestamp(s: &str) -> Option<DateTime<chrono::FixedOffset>> {
    if !matches_layout(s) {
        return None;
    }
    DateTime::parse_from_str(s, TIMESTAMP_FORMAT).ok()
}

pub fn speed_kmh(diff_seconds: f64, distance_meters: f64) -> f64 {
    (diff_seconds / distance_meters) * 3600.0
}

pub struct SpeedEvaluator {
    store: Box<dyn Store>,
    notifier: Box<dyn Notifier>,
    rules: Rules,
}

impl SpeedEvaluator {
    pub fn new(store: Box<dyn Store>, notifier: Box<dyn Notifier>, rules: Rules) -> Self {
        SpeedEvaluator {
            store,
            notifier,
            rules,
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub async fn evaluate(&self, candidate: NewDetection) -> Result<Outcome, EvaluateError> {
        if let Some(duplicate) = self
            .store
            .find_exact_duplicate(&candidate.plate, &candidate.timestamp)?
        {
            self.store.delete(&duplicate)?;
            info!(
                "Similar license plate already exists: {} at {}",
                candidate.plate, candidate.timestamp
            );
            return Ok(Outcome::Duplicate);
        }

        let existing = match self.store.find_any_by_plate(&candidate.plate)? {
            Some(existing) => existing,
            None => {
                let stored = self.store.insert(candidate)?;
                info!(
                    "Saved first sighting of {} at {} from {}",
                    stored.plate, stored.timestamp, stored.source
                );
                return Ok(Outcome::FirstSighting(stored));
            }
        };

        let (existing_time, current_time) = match (
            parse_timestamp(&existing.timestamp),
            parse_timestamp(&candidate.timestamp),
        ) {
            (Some(e), Some(c)) => (e, c),
            _ => {
                error!(
                    "Invalid timestamp format: existing {:?}, current {:?}",
                    existing.timestamp, candidate.timestamp
                );
                return Err(EvaluateError::InvalidTimestamp);
            }
        };

        let diff = current_time.signed_duration_since(existing_time).num_milliseconds() as f64
            / 1000.0;
        info!("Timestamp difference for {}: {} seconds", candidate.plate, diff);
        if diff < 0.0 {
            warn!(
                "Sighting of {} at {} is older than the stored one at {}",
                candidate.plate, candidate.timestamp, existing.timestamp
            );
        }

        if diff > self.rules.freshness_window_seconds {
            self.store.delete(&existing)?;
            info!(
                "Deleted expired sighting of {} at {}",
                existing.plate, existing.timestamp
            );
            let stored = if self.rules.store_after_expiry {
                let stored = self.store.insert(candidate)?;
                info!(
                    "Saved {} at {} in place of the expired sighting",
                    stored.plate, stored.timestamp
                );
                Some(stored)
            } else {
                None
            };
            return Ok(Outcome::StaleReplaced {
                expired: existing,
                stored,
            });
        }

        let kmh = speed_kmh(diff, self.rules.camera_distance_meters);
        if kmh > self.rules.speed_limit_kmh {
            if let Err(e) = self.notifier.notify(&candidate.plate, kmh).await {
                error!("Couldn't send notification for {}: {}", candidate.plate, e);
            }
            info!("License plate {} is speeding: {:.2} km/h", candidate.plate, kmh);
            Ok(Outcome::Speeding { kmh })
        } else {
            info!(
                "License plate {} is not speeding: {:.2} km/h",
                candidate.plate, kmh
            );
            Ok(Outcome::NotSpeeding { kmh })
        }
    }
}

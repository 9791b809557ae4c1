// ABOUTME: UTC timestamp formats shared by decoded records, checkpoints, and partition names.
// ABOUTME: Zulu timestamps carry microseconds; partitions use date and date-hour strings.

use chrono::{DateTime, Utc};

pub const ZULU_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATE_AND_HOUR_FORMAT: &str = "%Y-%m-%dT%H";

pub fn to_zulu(dt: &DateTime<Utc>) -> String {
    dt.format(ZULU_FORMAT).to_string()
}

pub fn to_date(dt: &DateTime<Utc>) -> String {
    dt.format(DATE_FORMAT).to_string()
}

pub fn to_date_and_hour(dt: &DateTime<Utc>) -> String {
    dt.format(DATE_AND_HOUR_FORMAT).to_string()
}

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// 12-hour clock time with meridiem, e.g. "05:30 AM".
pub static PRAYER_TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(0?[1-9]|1[0-2]):[0-5][0-9] (AM|PM)$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrayerTimings {
    pub fajr: String,
    pub dhuhr: String,
    pub asr: String,
    pub maghrib: String,
    pub isha: String,
    pub jummah: String,
}

impl PrayerTimings {
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("fajr", self.fajr.as_str()),
            ("dhuhr", self.dhuhr.as_str()),
            ("asr", self.asr.as_str()),
            ("maghrib", self.maghrib.as_str()),
            ("isha", self.isha.as_str()),
            ("jummah", self.jummah.as_str()),
        ]
        .into_iter()
    }
}

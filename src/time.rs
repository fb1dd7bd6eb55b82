//! The one wall-clock source this crate implements: `chrono::Utc::now`.
//! Alternate clock sources (simulated time, injected clocks for
//! deterministic testing beyond what these helpers already allow) are the
//! named Non-goal of spec.md §1 — callers needing that inject their own
//! timestamps into `Session` test helpers rather than through a trait here.

pub fn now_naive() -> chrono::NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

pub fn today_weekday(local: bool) -> crate::config::Weekday {
    let day = if local { chrono::Local::now().weekday() } else { chrono::Utc::now().weekday() };
    crate::config::Weekday::from_chrono(day)
}

pub fn now_time(local: bool) -> chrono::NaiveTime {
    if local {
        chrono::Local::now().time()
    } else {
        chrono::Utc::now().time()
    }
}

use chrono::{Datelike, Timelike};

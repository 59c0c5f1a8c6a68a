//! ICS export of bookings and blocked ranges.
//!
//! Every exported event is an all-day VEVENT. `DTEND` is exclusive, so a
//! blocked range whose last day is `D` is written with `DTEND` of `D + 1`
//! and parses back to the same inclusive range.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{BlockedRange, Booking, BookingStatus};
use crate::time::{DayRange, DisplayZone};

const CRLF: &str = "\r\n";
const MAX_LINE_OCTETS: usize = 75;

/// Settings for the exported calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Value of `X-WR-CALNAME`.
    pub calendar_name: String,
    /// Domain part of every event UID.
    pub uid_domain: String,
    /// Value of `PRODID`.
    pub product_id: String,
    /// Whether ranges synced from external feeds are exported too.
    pub include_external: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            calendar_name: "Room availability".to_string(),
            uid_domain: "roomsync.local".to_string(),
            product_id: "-//roomsync//availability 1.0//EN".to_string(),
            include_external: true,
        }
    }
}

/// Renders the availability calendar.
#[derive(Debug, Clone)]
pub struct CalendarExport {
    options: ExportOptions,
    zone: DisplayZone,
}

impl CalendarExport {
    pub fn new(options: ExportOptions, zone: DisplayZone) -> Self {
        Self { options, zone }
    }

    /// Renders a VCALENDAR document with CRLF line endings.
    ///
    /// Callers pass only the records that should appear; cancelled bookings
    /// are skipped regardless.
    pub fn render(
        &self,
        bookings: &[Booking],
        blocks: &[BlockedRange],
        generated_at: DateTime<Utc>,
    ) -> String {
        let stamp = generated_at.format("%Y%m%dT%H%M%SZ").to_string();
        let mut lines = vec![
            "BEGIN:VCALENDAR".to_string(),
            "VERSION:2.0".to_string(),
            format!("PRODID:{}", self.options.product_id),
            "CALSCALE:GREGORIAN".to_string(),
            "METHOD:PUBLISH".to_string(),
            format!("X-WR-CALNAME:{}", escape_text(&self.options.calendar_name)),
            format!("X-WR-TIMEZONE:{}", self.zone.name()),
        ];

        for booking in bookings
            .iter()
            .filter(|b| b.status != BookingStatus::Cancelled)
        {
            self.push_event(
                &mut lines,
                &format!("booking-{}", booking.id),
                &stamp,
                booking.days(&self.zone),
                "Unavailable - Booking",
            );
        }

        for block in blocks
            .iter()
            .filter(|b| self.options.include_external || b.external_id.is_none())
        {
            self.push_event(
                &mut lines,
                &format!("blocked-{}", block.id),
                &stamp,
                block.days(),
                &format!("Unavailable - {}", block.reason),
            );
        }

        lines.push("END:VCALENDAR".to_string());

        let mut out = String::new();
        for line in lines {
            out.push_str(&fold_line(&line));
            out.push_str(CRLF);
        }
        out
    }

    fn push_event(
        &self,
        lines: &mut Vec<String>,
        uid: &str,
        stamp: &str,
        days: DayRange,
        summary: &str,
    ) {
        lines.push("BEGIN:VEVENT".to_string());
        lines.push(format!("UID:{uid}@{}", self.options.uid_domain));
        lines.push(format!("DTSTAMP:{stamp}"));
        lines.push(format!("DTSTART;VALUE=DATE:{}", date_token(days.start)));
        lines.push(format!("DTEND;VALUE=DATE:{}", date_token(days.end)));
        lines.push(format!("SUMMARY:{}", escape_text(summary)));
        lines.push("STATUS:CONFIRMED".to_string());
        lines.push("END:VEVENT".to_string());
    }
}

fn date_token(day: NaiveDate) -> String {
    day.format("%Y%m%d").to_string()
}

/// Escapes a TEXT value.
fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            _ => out.push(c),
        }
    }
    out
}

/// Folds a content line at 75 octets without splitting a character.
fn fold_line(line: &str) -> String {
    if line.len() <= MAX_LINE_OCTETS {
        return line.to_string();
    }
    let mut out = String::with_capacity(line.len() + line.len() / MAX_LINE_OCTETS * 3);
    let mut width = 0;
    for c in line.chars() {
        let len = c.len_utf8();
        if width + len > MAX_LINE_OCTETS {
            out.push_str(CRLF);
            out.push(' ');
            width = 1;
        }
        out.push(c);
        width += len;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ics::parse_ics;
    use crate::time::EventTime;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn block(id: u64, start: NaiveDate, end: NaiveDate, reason: &str, external: bool) -> BlockedRange {
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        BlockedRange {
            id,
            start_date: start,
            end_date: end,
            reason: reason.into(),
            external_id: external.then(|| format!("ext-{id}")),
            source: external.then(|| "Airbnb".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    fn booking(id: u64, status: BookingStatus) -> Booking {
        Booking {
            id,
            first_name: "Ana".into(),
            last_name: "Reyes".into(),
            check_in: Utc.with_ymd_and_hms(2024, 3, 10, 6, 0, 0).unwrap(),
            check_out: Utc.with_ymd_and_hms(2024, 3, 12, 4, 0, 0).unwrap(),
            status,
        }
    }

    #[test]
    fn renders_calendar() {
        let export = CalendarExport::new(ExportOptions::default(), DisplayZone::default());
        let generated = Utc.with_ymd_and_hms(2024, 2, 20, 8, 30, 0).unwrap();
        let ics = export.render(
            &[booking(3, BookingStatus::Confirmed), booking(4, BookingStatus::Cancelled)],
            &[block(9, date(2024, 3, 1), date(2024, 3, 4), "Repairs, roof", false)],
            generated,
        );
        assert!(ics.ends_with("END:VCALENDAR\r\n"));

        insta::assert_snapshot!(ics.replace(CRLF, "\n").trim_end(), @r"
        BEGIN:VCALENDAR
        VERSION:2.0
        PRODID:-//roomsync//availability 1.0//EN
        CALSCALE:GREGORIAN
        METHOD:PUBLISH
        X-WR-CALNAME:Room availability
        X-WR-TIMEZONE:Asia/Manila
        BEGIN:VEVENT
        UID:booking-3@roomsync.local
        DTSTAMP:20240220T083000Z
        DTSTART;VALUE=DATE:20240310
        DTEND;VALUE=DATE:20240312
        SUMMARY:Unavailable - Booking
        STATUS:CONFIRMED
        END:VEVENT
        BEGIN:VEVENT
        UID:blocked-9@roomsync.local
        DTSTAMP:20240220T083000Z
        DTSTART;VALUE=DATE:20240301
        DTEND;VALUE=DATE:20240305
        SUMMARY:Unavailable - Repairs\, roof
        STATUS:CONFIRMED
        END:VEVENT
        END:VCALENDAR
        ");
    }

    #[test]
    fn export_parses_back_to_same_range() {
        let export = CalendarExport::new(ExportOptions::default(), DisplayZone::default());
        let ics = export.render(
            &[],
            &[block(1, date(2024, 3, 1), date(2024, 3, 4), "Family", false)],
            Utc::now(),
        );
        let events = parse_ics(&ics);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start, EventTime::AllDay(date(2024, 3, 1)));
        assert_eq!(events[0].end, EventTime::AllDay(date(2024, 3, 4)));
    }

    #[test]
    fn external_ranges_can_be_left_out() {
        let options = ExportOptions {
            include_external: false,
            ..ExportOptions::default()
        };
        let export = CalendarExport::new(options, DisplayZone::default());
        let ics = export.render(
            &[],
            &[
                block(1, date(2024, 3, 1), date(2024, 3, 4), "Family", false),
                block(2, date(2024, 4, 1), date(2024, 4, 4), "Airbnb - External Booking", true),
            ],
            Utc::now(),
        );
        assert!(ics.contains("UID:blocked-1@"));
        assert!(!ics.contains("UID:blocked-2@"));
    }

    #[test]
    fn long_lines_fold() {
        let folded = fold_line(&format!("SUMMARY:{}", "é".repeat(60)));
        for line in folded.split(CRLF) {
            assert!(line.len() <= MAX_LINE_OCTETS);
        }
        assert_eq!(folded.replace("\r\n ", ""), format!("SUMMARY:{}", "é".repeat(60)));
    }
}

//! ICS feed parsing.
//!
//! Only the subset needed for availability is read: `DTSTART`, `DTEND` and
//! `DTSTAMP` inside `VEVENT` blocks. Recurrence, `VTIMEZONE` and alarms are
//! ignored. Parsing never fails; bad lines or events are skipped.

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, trace};

use crate::event::ParsedEvent;
use crate::time::EventTime;

/// Decodes an ICS date token.
///
/// - `YYYYMMDD` decodes to [`EventTime::AllDay`]
/// - `YYYYMMDDTHHMMSS` or `YYYYMMDDTHHMMSSZ` decodes to that literal UTC instant
pub fn decode_date_token(token: &str) -> Option<EventTime> {
    let token = token.trim();
    match token.len() {
        8 if token.bytes().all(|b| b.is_ascii_digit()) => {
            NaiveDate::parse_from_str(token, "%Y%m%d")
                .ok()
                .map(EventTime::AllDay)
        }
        15 | 16 => {
            let body = token.strip_suffix('Z').unwrap_or(token);
            if body.len() != 15 {
                return None;
            }
            NaiveDateTime::parse_from_str(body, "%Y%m%dT%H%M%S")
                .ok()
                .map(|naive| EventTime::DateTime(naive.and_utc()))
        }
        _ => None,
    }
}

#[derive(Default)]
struct Pending {
    start: Option<(EventTime, String)>,
    end: Option<(EventTime, String)>,
    stamp: Option<EventTime>,
}

impl Pending {
    fn finish(self) -> Option<ParsedEvent> {
        let (start, raw_start) = self.start?;
        let (end, raw_end) = self.end?;
        Some(ParsedEvent {
            start,
            end: end.previous_day()?,
            stamp: self.stamp.map(|s| s.to_utc_datetime()),
            raw_start,
            raw_end,
        })
    }
}

/// Parses ICS text into events.
///
/// Each event's end is moved back one day so it names the last occupied
/// day. Events missing `DTSTART` or `DTEND` are dropped.
pub fn parse_ics(ics: &str) -> Vec<ParsedEvent> {
    let mut events = Vec::new();
    let mut current: Option<Pending> = None;
    let mut dropped = 0usize;

    for line in ics.lines() {
        let line = line.trim();
        if line == "BEGIN:VEVENT" {
            if current.is_some() {
                dropped += 1;
            }
            current = Some(Pending::default());
            continue;
        }
        if line == "END:VEVENT" {
            if let Some(pending) = current.take() {
                match pending.finish() {
                    Some(event) => events.push(event),
                    None => dropped += 1,
                }
            }
            continue;
        }

        let Some(pending) = current.as_mut() else {
            continue;
        };
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let key = name.split(';').next().unwrap_or(name);
        let value = value.trim();
        let slot = match key {
            "DTSTART" => &mut pending.start,
            "DTEND" => &mut pending.end,
            "DTSTAMP" => {
                pending.stamp = decode_date_token(value);
                continue;
            }
            _ => continue,
        };
        match decode_date_token(value) {
            Some(time) => *slot = Some((time, value.to_string())),
            None => trace!(key, value, "Ignoring undecodable date token"),
        }
    }

    debug!(events = events.len(), dropped, "Parsed ICS feed");
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn decode_tokens() {
        assert_eq!(
            decode_date_token("20240110"),
            Some(EventTime::AllDay(date(2024, 1, 10)))
        );
        assert_eq!(
            decode_date_token("20240301T140000Z"),
            Some(EventTime::DateTime(
                Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap()
            ))
        );
        assert_eq!(
            decode_date_token("20240301T140000"),
            Some(EventTime::DateTime(
                Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap()
            ))
        );
        assert_eq!(decode_date_token("2024011"), None);
        assert_eq!(decode_date_token("20241310"), None);
        assert_eq!(decode_date_token("2024-01-10"), None);
        assert_eq!(decode_date_token("20240301T1400000"), None);
    }

    #[test]
    fn all_day_end_is_inclusive() {
        let ics = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nDTSTART:20240110\nDTEND:20240112\nEND:VEVENT\nEND:VCALENDAR";
        let events = parse_ics(ics);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start, EventTime::AllDay(date(2024, 1, 10)));
        assert_eq!(events[0].end, EventTime::AllDay(date(2024, 1, 11)));
        assert_eq!(events[0].raw_start, "20240110");
        assert_eq!(events[0].raw_end, "20240112");
    }

    #[test]
    fn missing_end_drops_event() {
        let ics = "BEGIN:VEVENT\nDTSTART:20240110\nEND:VEVENT\n\
                   BEGIN:VEVENT\nDTEND:20240112\nEND:VEVENT";
        assert!(parse_ics(ics).is_empty());
    }

    #[test]
    fn parameters_and_crlf() {
        let ics = "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nUID:abc@airbnb.com\r\n\
                   DTSTAMP:20240215T080910Z\r\nDTSTART;VALUE=DATE:20240301\r\n\
                   DTEND;VALUE=DATE:20240305\r\nSUMMARY:Reserved\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
        let events = parse_ics(ics);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start, EventTime::AllDay(date(2024, 3, 1)));
        assert_eq!(events[0].end, EventTime::AllDay(date(2024, 3, 4)));
        assert_eq!(
            events[0].stamp,
            Some(Utc.with_ymd_and_hms(2024, 2, 15, 8, 9, 10).unwrap())
        );
    }

    #[test]
    fn timed_events() {
        let ics = "BEGIN:VEVENT\nDTSTART:20240301T140000Z\nDTEND:20240303T100000Z\nEND:VEVENT";
        let events = parse_ics(ics);
        assert_eq!(
            events[0].end,
            EventTime::DateTime(Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn garbage_is_ignored() {
        assert!(parse_ics("").is_empty());
        assert!(parse_ics("<html>not a calendar</html>").is_empty());

        let ics = "BEGIN:VEVENT\nthis line has no colon\nDTSTART:soon\nDTSTART:20240301\n\
                   X-WEIRD;;;:\nDTEND:20240302\nEND:VEVENT";
        let events = parse_ics(ics);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start, EventTime::AllDay(date(2024, 3, 1)));
        assert_eq!(events[0].end, EventTime::AllDay(date(2024, 3, 1)));
    }

    #[test]
    fn unterminated_event_is_discarded() {
        let ics = "BEGIN:VEVENT\nDTSTART:20240301\nDTEND:20240302\n\
                   BEGIN:VEVENT\nDTSTART:20240401\nDTEND:20240403\nEND:VEVENT";
        let events = parse_ics(ics);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].raw_start, "20240401");
    }

    #[test]
    fn properties_outside_events_are_ignored() {
        let ics = "BEGIN:VCALENDAR\nDTSTART:20240301\nDTEND:20240302\nEND:VCALENDAR";
        assert!(parse_ics(ics).is_empty());
    }
}

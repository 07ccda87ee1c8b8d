//! OLE automation timestamps: fractional days since 1899-12-30 00:00 UTC,
//! the stamp format text records carry.

use chrono::{DateTime, NaiveDate, Utc};

pub fn ole_time(dt: DateTime<Utc>) -> f64 {
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)
        .expect("valid epoch date")
        .and_hms_opt(0, 0, 0)
        .expect("valid epoch time")
        .and_utc();

    dt.signed_duration_since(base).num_seconds() as f64 / 86400.0
}

pub fn ole_now() -> f64 {
    ole_time(Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn known_instants() {
        let epoch = Utc.with_ymd_and_hms(1899, 12, 30, 0, 0, 0).unwrap();
        assert_eq!(ole_time(epoch), 0.0);

        let y2k = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(ole_time(y2k), 36526.0);

        let noon = Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(ole_time(noon), 36526.5);
    }

    #[test]
    fn now_is_past_2020() {
        assert!(ole_now() > 43830.0);
    }
}

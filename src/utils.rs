 use chrono::{DateTime, FixedOffset, Offset, Utc};

 pub fn now_ts() -> f64 {
     let now = std::time::SystemTime::now()
         .duration_since(std::time::UNIX_EPOCH)
         .unwrap_or_default();
     now.as_secs_f64()
 }

 /// Domestic wall clock for a fixed UTC offset in hours. Out-of-range offsets fall back to UTC.
 pub fn domestic_now(offset_hours: i32) -> DateTime<FixedOffset> {
     let offset = offset_hours
         .checked_mul(3600)
         .and_then(FixedOffset::east_opt)
         .unwrap_or_else(|| Utc.fix());
     Utc::now().with_timezone(&offset)
 }

 /// (`YYYY-MM-DD`, `HH:MM`) stamp used as the ledger key.
 pub fn date_time_stamp(at: &DateTime<FixedOffset>) -> (String, String) {
     (at.format("%Y-%m-%d").to_string(), at.format("%H:%M").to_string())
 }

 /// Whole-unit rounding applied at the persistence boundary (ties go to even).
 pub fn round_unit(x: f64) -> i64 {
     if !x.is_finite() {
         return 0;
     }
     x.round_ties_even() as i64
 }

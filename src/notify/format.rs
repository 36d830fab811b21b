use chrono::{DateTime, Datelike, NaiveDateTime, Timelike};

use crate::types::CandidateListing;

/// Render the alert text for a listing.
pub fn build_message(l: &CandidateListing) -> String {
    let skills = if l.skills.is_empty() {
        "—".to_string()
    } else {
        l.skills.join(", ")
    };

    let mut lines = vec![
        format!("📢 {}", l.title),
        format!("🌐 منبع: {}", l.source),
        format!("💰 بودجه: {}", l.budget_text),
    ];
    if !l.description.is_empty() {
        lines.push(format!("📝 توضیحات: {}", l.description));
    }
    lines.push(format!("🛠 مهارت‌ها: {skills}"));
    if let Some(at) = jalali_timestamp(&l.approved_at) {
        lines.push(format!("✅ تایید شده: {at}"));
    }
    if let Some(at) = jalali_timestamp(&l.bidding_closed_at) {
        lines.push(format!("⏰ پایان مناقصه: {at}"));
    }
    if let Some(bids) = l.bids_count {
        lines.push(format!("📦 تعداد پیشنهادها: {bids}"));
    }
    lines.push(format!("🔗 لینک: {}", l.link));

    lines.join("\n")
}

/// Split `text` into ordered segments of at most `limit` characters.
///
/// Cuts only on `char` boundaries, so concatenating the segments gives back
/// the original text.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut segments = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;
    for ch in text.chars() {
        if count == limit {
            segments.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(ch);
        count += 1;
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

// ---------------------------------------------------------------------------
// Solar Hijri (Jalali) dates
// ---------------------------------------------------------------------------

/// `2024-03-20T10:30:00Z` → `1403/01/01 10:30`. The wall-clock time of the
/// source is kept; no zone conversion. Unparsable input yields `None`.
pub fn jalali_timestamp(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let local = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_local())
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()?;

    let (jy, jm, jd) = gregorian_to_jalali(local.year(), local.month(), local.day());
    Some(format!(
        "{jy:04}/{jm:02}/{jd:02} {:02}:{:02}",
        local.hour(),
        local.minute()
    ))
}

/// Arithmetic Gregorian → Jalali conversion (33-year cycle).
pub fn gregorian_to_jalali(gy: i32, gm: u32, gd: u32) -> (i32, u32, u32) {
    const DAYS_BEFORE_MONTH: [i64; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];

    let gy = gy as i64;
    let gy2 = if gm > 2 { gy + 1 } else { gy };
    let mut days = 355_666 + 365 * gy + (gy2 + 3) / 4 - (gy2 + 99) / 100
        + (gy2 + 399) / 400
        + gd as i64
        + DAYS_BEFORE_MONTH[(gm as usize).clamp(1, 12) - 1];

    let mut jy = -1595 + 33 * (days / 12_053);
    days %= 12_053;
    jy += 4 * (days / 1461);
    days %= 1461;
    if days > 365 {
        jy += (days - 1) / 365;
        days = (days - 1) % 365;
    }

    let (jm, jd) = if days < 186 {
        (1 + days / 31, 1 + days % 31)
    } else {
        (7 + (days - 186) / 30, 1 + (days - 186) % 30)
    };
    (jy as i32, jm as u32, jd as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing() -> CandidateListing {
        CandidateListing {
            source: "ponisha".to_string(),
            external_id: "11".to_string(),
            title: "Rust backend".to_string(),
            link: "https://ponisha.ir/project/11/rust-backend".to_string(),
            budget_text: "تا 150,000,000 تومان".to_string(),
            amount_min: 0,
            amount_max: 150_000_000,
            description: String::new(),
            skills: Vec::new(),
            approved_at: String::new(),
            bidding_closed_at: String::new(),
            bids_count: None,
        }
    }

    #[test]
    fn jalali_known_dates() {
        assert_eq!(gregorian_to_jalali(2024, 3, 20), (1403, 1, 1));
        assert_eq!(gregorian_to_jalali(2024, 3, 19), (1402, 12, 29));
        assert_eq!(gregorian_to_jalali(2024, 4, 20), (1403, 2, 1));
        assert_eq!(gregorian_to_jalali(2023, 9, 23), (1402, 7, 1));
        assert_eq!(gregorian_to_jalali(2025, 1, 1), (1403, 10, 12));
    }

    #[test]
    fn timestamps_render_in_jalali() {
        assert_eq!(
            jalali_timestamp("2024-03-20 10:30:00").as_deref(),
            Some("1403/01/01 10:30")
        );
        assert_eq!(
            jalali_timestamp("2024-04-20T08:05:59+03:30").as_deref(),
            Some("1403/02/01 08:05")
        );
        assert_eq!(jalali_timestamp("yesterday"), None);
        assert_eq!(jalali_timestamp(""), None);
    }

    #[test]
    fn minimal_message_has_placeholder_skills_and_no_optional_lines() {
        let msg = build_message(&listing());
        assert_eq!(
            msg,
            "📢 Rust backend\n\
             🌐 منبع: ponisha\n\
             💰 بودجه: تا 150,000,000 تومان\n\
             🛠 مهارت‌ها: —\n\
             🔗 لینک: https://ponisha.ir/project/11/rust-backend"
        );
    }

    #[test]
    fn full_message_includes_every_line() {
        let mut l = listing();
        l.description = "Marketplace API".to_string();
        l.skills = vec!["Rust".to_string(), "SQL".to_string()];
        l.approved_at = "2024-03-20 10:30:00".to_string();
        l.bidding_closed_at = "not a date".to_string();
        l.bids_count = Some(0);

        let msg = build_message(&l);
        assert!(msg.contains("📝 توضیحات: Marketplace API"));
        assert!(msg.contains("🛠 مهارت‌ها: Rust, SQL"));
        assert!(msg.contains("✅ تایید شده: 1403/01/01 10:30"));
        assert!(!msg.contains("⏰"));
        assert!(msg.contains("📦 تعداد پیشنهادها: 0"));
        assert!(msg.ends_with("🔗 لینک: https://ponisha.ir/project/11/rust-backend"));
    }

    #[test]
    fn split_9000_chars_into_three_ordered_segments() {
        let text: String = (0..9000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let parts = split_message(&text, 4096);
        let lens: Vec<usize> = parts.iter().map(|p| p.chars().count()).collect();
        assert_eq!(lens, vec![4096, 4096, 808]);
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn split_never_cuts_a_multibyte_char() {
        let text = "پروژه‌🦀".repeat(1500);
        let parts = split_message(&text, 4096);
        assert!(parts.len() > 1);
        assert!(parts.iter().all(|p| p.chars().count() <= 4096));
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn short_message_is_a_single_segment() {
        assert_eq!(split_message("سلام", 4096), vec!["سلام".to_string()]);
        assert_eq!(split_message("", 4096), vec![String::new()]);
    }
}

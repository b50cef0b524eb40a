use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use std::sync::OnceLock;

use crate::model::Device;

/// What a camera or app naming convention tells us about a file.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FilenameHints {
    pub timestamp: Option<(NaiveDateTime, &'static str)>,
    pub device: Option<Device>,
}

struct Convention {
    name: &'static str,
    pattern: Regex,
    make: Option<&'static str>,
    model: Option<&'static str>,
}

fn conventions() -> &'static [Convention] {
    static CONVENTIONS: OnceLock<Vec<Convention>> = OnceLock::new();
    CONVENTIONS.get_or_init(|| {
        let rules: [(&str, &str, Option<&str>, Option<&str>); 5] = [
            ("pixel", r"^PXL_(\d{8})_(\d{6})", Some("Google"), Some("Pixel")),
            ("whatsapp", r"^(?:IMG|VID)-(\d{8})-WA\d+", None, None),
            ("dji", r"^DJI_(\d{8})_?(\d{6})?", Some("DJI"), None),
            ("samsung", r"^(\d{8})_(\d{6})(?:_\d+)?\.", Some("Samsung"), None),
            ("generic", r"^(?:IMG|VID|MVIMG)_(\d{8})_(\d{6})", None, None),
        ];
        rules
            .into_iter()
            .map(|(name, pattern, make, model)| Convention {
                name,
                pattern: Regex::new(pattern).expect("static regex"),
                make,
                model,
            })
            .collect()
    })
}

fn parse_date(date: &str, time: Option<&str>) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
    let time = match time {
        Some(t) => NaiveTime::parse_from_str(t, "%H%M%S").ok()?,
        None => NaiveTime::from_hms_opt(0, 0, 0)?,
    };
    (1990..=2100)
        .contains(&date.year())
        .then(|| date.and_time(time))
}

/// Match the file name against known naming conventions.
pub fn hints(file_name: &str) -> FilenameHints {
    for convention in conventions() {
        let Some(caps) = convention.pattern.captures(file_name) else {
            continue;
        };
        let timestamp = caps
            .get(1)
            .and_then(|d| parse_date(d.as_str(), caps.get(2).map(|t| t.as_str())))
            .map(|ts| (ts, convention.name));
        if timestamp.is_none() && convention.make.is_none() {
            continue;
        }
        let device = convention.make.map(|make| Device {
            make: Some(make.to_string()),
            model: convention.model.map(str::to_string),
        });
        return FilenameHints { timestamp, device };
    }

    // iPhone HEIC exports carry no date in the name, but the vendor is clear.
    let upper = file_name.to_ascii_uppercase();
    if upper.starts_with("IMG_") && upper.ends_with(".HEIC") {
        return FilenameHints {
            timestamp: None,
            device: Some(Device {
                make: Some("Apple".to_string()),
                model: Some("iPhone".to_string()),
            }),
        };
    }

    FilenameHints::default()
}

use crate::model::Device;

/// Lowercased vendor prefixes and the canonical name they fold into.
const MAKE_ALIASES: &[(&str, &str)] = &[
    ("apple", "Apple"),
    ("canon", "Canon"),
    ("dji", "DJI"),
    ("eastman kodak", "Kodak"),
    ("kodak", "Kodak"),
    ("fujifilm", "Fujifilm"),
    ("fuji photo film", "Fujifilm"),
    ("google", "Google"),
    ("gopro", "GoPro"),
    ("hasselblad", "Hasselblad"),
    ("huawei", "Huawei"),
    ("leica", "Leica"),
    ("lg electronics", "LG"),
    ("motorola", "Motorola"),
    ("nikon", "Nikon"),
    ("olympus", "Olympus"),
    ("om digital solutions", "OM System"),
    ("oneplus", "OnePlus"),
    ("panasonic", "Panasonic"),
    ("pentax", "Pentax"),
    ("ricoh", "Ricoh"),
    ("samsung", "Samsung"),
    ("sony", "Sony"),
    ("xiaomi", "Xiaomi"),
];

/// Model code prefixes that have a marketing name.
const MODEL_ALIASES: &[(&str, &str)] = &[
    ("SM-S911", "Galaxy S23"),
    ("SM-S916", "Galaxy S23+"),
    ("SM-S918", "Galaxy S23 Ultra"),
    ("SM-S921", "Galaxy S24"),
    ("SM-S926", "Galaxy S24+"),
    ("SM-S928", "Galaxy S24 Ultra"),
];

/// Underscores become spaces, runs of whitespace collapse, NULs go.
fn collapse(raw: &str) -> String {
    raw.replace(['_', '\0'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_placeholder(s: &str) -> bool {
    s.is_empty() || s.eq_ignore_ascii_case("unknown") || s == "-"
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

pub fn normalize_make(raw: &str) -> Option<String> {
    let make = collapse(raw);
    if is_placeholder(&make) {
        return None;
    }
    let lower = make.to_lowercase();
    if let Some((_, canonical)) = MAKE_ALIASES.iter().find(|(prefix, _)| lower.starts_with(prefix)) {
        return Some(canonical.to_string());
    }
    // Shouting vendor strings ("ACME CORP") read better in title case.
    if make.chars().any(char::is_alphabetic) && !make.chars().any(char::is_lowercase) {
        return Some(title_case(&make));
    }
    Some(make)
}

pub fn normalize_model(raw: &str, make: Option<&str>) -> Option<String> {
    let mut model = collapse(raw);
    if is_placeholder(&model) {
        return None;
    }

    if let Some((_, name)) = MODEL_ALIASES
        .iter()
        .find(|(prefix, _)| model.to_uppercase().starts_with(prefix))
    {
        return Some(name.to_string());
    }

    // "Canon EOS R5" under make "Canon" is just "EOS R5".
    if let Some(make) = make {
        let lower_model = model.to_lowercase();
        let lower_make = make.to_lowercase();
        if let Some(rest) = lower_model.strip_prefix(&lower_make) {
            if rest.starts_with(' ') {
                if let Some(stripped) = model.get(lower_make.len()..) {
                    model = stripped.trim().to_string();
                }
            }
        }
    }

    (!is_placeholder(&model)).then_some(model)
}

/// Canonical display form of a raw make/model pair.
pub fn normalize(raw: &Device) -> Option<Device> {
    let make = raw.make.as_deref().and_then(normalize_make);
    let model = raw
        .model
        .as_deref()
        .and_then(|m| normalize_model(m, make.as_deref()));
    (make.is_some() || model.is_some()).then_some(Device { make, model })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(make: &str, model: &str) -> Device {
        Device {
            make: Some(make.to_string()),
            model: Some(model.to_string()),
        }
    }

    #[test]
    fn folds_vendor_aliases() {
        let d = normalize(&device("NIKON CORPORATION", "NIKON D750")).unwrap();
        assert_eq!(d.make.as_deref(), Some("Nikon"));
        assert_eq!(d.model.as_deref(), Some("D750"));

        let d = normalize(&device("samsung", "SM-S911B")).unwrap();
        assert_eq!(d.display_name().as_deref(), Some("Samsung Galaxy S23"));
    }

    #[test]
    fn collapses_whitespace_and_underscores() {
        let d = normalize(&device("Canon ", "Canon  EOS_5D   Mark IV\0")).unwrap();
        assert_eq!(d.display_name().as_deref(), Some("Canon EOS 5D Mark IV"));
    }

    #[test]
    fn unknown_vendor_is_title_cased() {
        assert_eq!(normalize_make("ACME CAMERA CORP").as_deref(), Some("Acme Camera Corp"));
        assert_eq!(normalize_make("Zeiss").as_deref(), Some("Zeiss"));
    }

    #[test]
    fn placeholders_become_absent() {
        assert_eq!(normalize(&device("Unknown", "  ")), None);
    }
}

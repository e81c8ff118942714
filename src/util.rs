//! Small formatting helpers shared by the panel surfaces.

/// Convert a human-readable option name to the camelCase key the host
/// stores form values under.
///
/// ```
/// use pixelbin_watermark_panel::util::camel_case;
///
/// assert_eq!(camel_case("Remove Text"), "removeText");
/// assert_eq!(camel_case("box"), "box");
/// ```
#[must_use]
pub fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, word) in name.split_whitespace().enumerate() {
        let mut chars = word.chars();
        let Some(first) = chars.next() else { continue };
        if i == 0 {
            out.extend(first.to_lowercase());
        } else {
            out.extend(first.to_uppercase());
        }
        out.push_str(chars.as_str());
    }
    out
}

/// Abbreviate a number with SI suffixes for the credits line: `1200` becomes
/// `"1.2K"`, `1_000_000` becomes `"1M"`.
///
/// Values are rounded to the nearest integer first; a single decimal is kept
/// and trailing zeros are dropped.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn abbreviate_number(value: f64) -> String {
    const SI_SYMBOL: [&str; 7] = ["", "K", "M", "G", "T", "P", "E"];

    let rounded = value.round();
    if rounded == 0.0 {
        return "0".to_string();
    }

    let tier = ((rounded.abs().log10() / 3.0).floor().max(0.0) as usize).min(SI_SYMBOL.len() - 1);
    if tier == 0 {
        return format!("{}", rounded as i64);
    }

    let scaled = rounded / 1000f64.powi(tier as i32);
    let formatted = format!("{scaled:.1}");
    let formatted = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{formatted}{}", SI_SYMBOL[tier])
}

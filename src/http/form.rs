//! `application/x-www-form-urlencoded` style body splitting.
//!
//! Only `&` / `=` splitting and `+` to space are handled. Percent escapes
//! such as `%20` are left as-is.

use std::collections::HashMap;

/// Decoded form fields. A key sent without `=` maps to `None`.
pub type FormFields = HashMap<String, Option<String>>;

/// Splits `key=value&key2=value2` into a map.
///
/// Empty segments (`a=1&&b=2`) are skipped and a repeated key keeps the last
/// value. Invalid UTF-8 is replaced rather than rejected.
pub fn urldecode(body: &[u8]) -> FormFields {
    let text = String::from_utf8_lossy(body);

    text.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (plus_to_space(key), Some(plus_to_space(value))),
            None => (plus_to_space(pair), None),
        })
        .collect()
}

fn plus_to_space(s: &str) -> String {
    s.replace('+', " ")
}

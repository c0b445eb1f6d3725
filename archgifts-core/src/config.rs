use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::diagnostics::{Diagnostic, DiagnosticsSink, Severity};
use crate::gifts::{resolve_gift_list, ItemIdResolver};
use crate::{ArchGiftsError, Result};

pub const KEY_APPLY_BUGFIXES: &str = "applyArchBugfixes";
pub const KEY_ADD_GIFTS: &str = "addGiftsToArchCache";
pub const KEY_GIFT_FRAG_AMOUNT: &str = "giftFragAmount";
pub const KEY_GIFT_LIST: &str = "giftList";

pub const DEFAULT_APPLY_BUGFIXES: bool = true;
pub const DEFAULT_ADD_GIFTS: bool = true;
pub const DEFAULT_GIFT_FRAG_AMOUNT: i32 = 10;
pub const MIN_GIFT_FRAG_AMOUNT: i32 = 3;
pub const MAX_GIFT_FRAG_AMOUNT: i32 = 127;

/// Raw, untyped key/value settings as handed over by the mod loader.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            ArchGiftsError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(Self::from_properties_str(&text))
    }

    /// Parses the `.properties` dialect: `#`/`!` comments, `key=value`,
    /// `key:value` or `key value`, backslash escapes and continuation lines
    /// (an odd run of trailing backslashes). Later duplicates win.
    pub fn from_properties_str(src: &str) -> Self {
        let mut settings = Self::new();
        let mut pending = String::new();

        for raw_line in src.lines() {
            let line = raw_line.trim_start();
            if pending.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
                continue;
            }

            let trailing = line.bytes().rev().take_while(|&b| b == b'\\').count();
            if trailing % 2 == 1 {
                pending.push_str(&line[..line.len() - 1]);
                continue;
            }
            pending.push_str(line);

            if let Some((key, value)) = split_property(&pending) {
                settings.insert(key, value);
            }
            pending.clear();
        }

        if let Some((key, value)) = split_property(&pending) {
            settings.insert(key, value);
        }

        settings
    }
}

fn split_property(line: &str) -> Option<(String, String)> {
    let line = line.trim_start();
    if line.is_empty() {
        return None;
    }

    let mut key_end = line.len();
    let mut escaped = false;
    for (idx, c) in line.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '=' || c == ':' || c.is_whitespace() {
            key_end = idx;
            break;
        }
    }

    let (key, rest) = line.split_at(key_end);
    let rest = rest.trim_start();
    let value = rest.strip_prefix(['=', ':']).unwrap_or(rest).trim_start();

    Some((unescape(key), unescape(value)))
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) if hex.len() == 4 => out.push(decoded),
                    _ => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }

    out
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Settings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut settings = Self::new();
        for (k, v) in iter {
            settings.insert(k, v);
        }
        settings
    }
}

/// Sanitized, immutable configuration. `inject_gifts` is only ever true
/// with a non-empty gift list.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Configuration {
    apply_bugfixes: bool,
    inject_gifts: bool,
    gift_fragment_threshold: i32,
    gift_item_ids: Vec<i32>,
}

impl Configuration {
    pub fn apply_bugfixes(&self) -> bool {
        self.apply_bugfixes
    }

    pub fn inject_gifts(&self) -> bool {
        self.inject_gifts
    }

    pub fn gift_fragment_threshold(&self) -> i32 {
        self.gift_fragment_threshold
    }

    pub fn gift_item_ids(&self) -> &[i32] {
        &self.gift_item_ids
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            apply_bugfixes: DEFAULT_APPLY_BUGFIXES,
            inject_gifts: false,
            gift_fragment_threshold: DEFAULT_GIFT_FRAG_AMOUNT,
            gift_item_ids: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Validated {
    pub config: Configuration,
    /// Config warnings and gift-list resolution failures, in input order.
    pub warnings: Vec<Diagnostic>,
}

fn parse_flag(settings: &Settings, key: &str, default: bool, warnings: &mut Vec<Diagnostic>) -> bool {
    let Some(raw) = settings.get(key) else {
        return default;
    };

    let value = raw.trim();
    if value.eq_ignore_ascii_case("true") {
        true
    } else if value.eq_ignore_ascii_case("false") {
        false
    } else {
        warnings.push(Diagnostic::ConfigWarning {
            key: key.to_string(),
            value: raw.to_string(),
            reason: "not a boolean, using false".to_string(),
        });
        false
    }
}

fn clamp_threshold(n: i64) -> i32 {
    n.clamp(MIN_GIFT_FRAG_AMOUNT as i64, MAX_GIFT_FRAG_AMOUNT as i64) as i32
}

fn parse_threshold(settings: &Settings, warnings: &mut Vec<Diagnostic>) -> i32 {
    let Some(raw) = settings.get(KEY_GIFT_FRAG_AMOUNT) else {
        return DEFAULT_GIFT_FRAG_AMOUNT;
    };

    let value = raw.trim();
    let parsed = match value.parse::<i64>() {
        Ok(n) => Some(n),
        Err(_) => {
            // Integers too wide for i64 still clamp to the nearest bound.
            let digits = value.strip_prefix(['+', '-']).unwrap_or(value);
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                Some(if value.starts_with('-') { i64::MIN } else { i64::MAX })
            } else {
                None
            }
        }
    };

    match parsed {
        Some(n) => {
            let clamped = clamp_threshold(n);
            if clamped as i64 != n {
                warnings.push(Diagnostic::ConfigWarning {
                    key: KEY_GIFT_FRAG_AMOUNT.to_string(),
                    value: raw.to_string(),
                    reason: format!(
                        "outside {MIN_GIFT_FRAG_AMOUNT}..={MAX_GIFT_FRAG_AMOUNT}, clamped to {clamped}"
                    ),
                });
            }
            clamped
        }
        None => {
            warnings.push(Diagnostic::ConfigWarning {
                key: KEY_GIFT_FRAG_AMOUNT.to_string(),
                value: raw.to_string(),
                reason: format!("not an integer, using {DEFAULT_GIFT_FRAG_AMOUNT}"),
            });
            DEFAULT_GIFT_FRAG_AMOUNT
        }
    }
}

/// Builds the configuration from raw settings. Never fails: every malformed
/// field is defaulted or clamped and reported once through `sink`.
pub fn validate(
    settings: &Settings,
    resolver: &dyn ItemIdResolver,
    sink: &dyn DiagnosticsSink,
) -> Validated {
    let mut warnings = Vec::new();

    let apply_bugfixes = parse_flag(settings, KEY_APPLY_BUGFIXES, DEFAULT_APPLY_BUGFIXES, &mut warnings);
    let requested_gifts = parse_flag(settings, KEY_ADD_GIFTS, DEFAULT_ADD_GIFTS, &mut warnings);
    let gift_fragment_threshold = parse_threshold(settings, &mut warnings);

    let resolution = resolve_gift_list(settings.get(KEY_GIFT_LIST).unwrap_or(""), resolver);
    warnings.extend(resolution.failures);

    for warning in &warnings {
        warning.report(sink);
    }

    let gift_item_ids = resolution.ids;
    let inject_gifts = if gift_item_ids.is_empty() {
        sink.emit(
            Severity::Error,
            "Unable to parse gift list from properties file. Disabling archaeology gifts.",
        );
        false
    } else {
        sink.emit(
            Severity::Info,
            &format!("{} gift items parsed from properties file.", gift_item_ids.len()),
        );
        requested_gifts
    };

    Validated {
        config: Configuration {
            apply_bugfixes,
            inject_gifts,
            gift_fragment_threshold,
            gift_item_ids,
        },
        warnings,
    }
}

use std::collections::HashMap;

use thiserror::Error;

use crate::diagnostics::Diagnostic;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ResolveError {
    #[error("empty token")]
    Empty,
    #[error("item id {0} is negative")]
    Negative(i64),
    #[error("item id {0} is out of range")]
    OutOfRange(String),
    #[error("unknown item name")]
    UnknownName,
}

/// Maps one gift-list token to an item template id.
pub trait ItemIdResolver {
    fn resolve(&self, token: &str) -> Result<i32, ResolveError>;
}

impl<T: ItemIdResolver + ?Sized> ItemIdResolver for &T {
    fn resolve(&self, token: &str) -> Result<i32, ResolveError> {
        (**self).resolve(token)
    }
}

/// Returns `None` when the token is not numeric at all, so callers can fall
/// back to a name lookup.
fn parse_numeric(token: &str) -> Option<Result<i32, ResolveError>> {
    let digits = token.strip_prefix(['+', '-']).unwrap_or(token);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    Some(match token.parse::<i64>() {
        Ok(n) if n < 0 => Err(ResolveError::Negative(n)),
        Ok(n) => i32::try_from(n).map_err(|_| ResolveError::OutOfRange(token.to_string())),
        Err(_) => Err(ResolveError::OutOfRange(token.to_string())),
    })
}

#[derive(Copy, Clone, Debug, Default)]
pub struct NumericResolver;

impl ItemIdResolver for NumericResolver {
    fn resolve(&self, token: &str) -> Result<i32, ResolveError> {
        if token.is_empty() {
            return Err(ResolveError::Empty);
        }
        parse_numeric(token).unwrap_or(Err(ResolveError::UnknownName))
    }
}

/// Numeric ids plus symbolic template names. Names are matched ignoring
/// case, spaces and underscores, so "statue of Fo" resolves from the token
/// `statueOfFo` or `STATUE_OF_FO`.
#[derive(Clone, Debug, Default)]
pub struct ItemNameTable {
    names: HashMap<String, i32>,
}

pub(crate) fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

impl ItemNameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, id: i32) {
        self.names.entry(normalize_name(name)).or_insert(id);
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<(S, i32)> for ItemNameTable {
    fn from_iter<I: IntoIterator<Item = (S, i32)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (name, id) in iter {
            table.insert(name.as_ref(), id);
        }
        table
    }
}

impl ItemIdResolver for ItemNameTable {
    fn resolve(&self, token: &str) -> Result<i32, ResolveError> {
        if token.is_empty() {
            return Err(ResolveError::Empty);
        }
        if let Some(numeric) = parse_numeric(token) {
            return numeric;
        }
        self.names
            .get(&normalize_name(token))
            .copied()
            .ok_or(ResolveError::UnknownName)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Resolution {
    pub ids: Vec<i32>,
    pub failures: Vec<Diagnostic>,
}

/// Resolves every whitespace-separated token of `raw`. A bad token is
/// recorded and skipped; order and duplicates of the good ones are kept.
pub fn resolve_gift_list(raw: &str, resolver: &dyn ItemIdResolver) -> Resolution {
    let mut resolution = Resolution::default();

    for token in raw.split_whitespace() {
        match resolver.resolve(token) {
            Ok(id) => resolution.ids.push(id),
            Err(e) => resolution.failures.push(Diagnostic::ResolutionFailure {
                token: token.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    resolution
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_order_and_duplicates() {
        let r = resolve_gift_list("  101 102\t101\n", &NumericResolver);
        assert_eq!(r.ids, vec![101, 102, 101]);
        assert!(r.failures.is_empty());
    }

    #[test]
    fn bad_tokens_do_not_abort_the_list() {
        let r = resolve_gift_list("bogus 5 -3 99999999999 7", &NumericResolver);
        assert_eq!(r.ids, vec![5, 7]);
        assert_eq!(r.failures.len(), 3);
        assert!(matches!(
            &r.failures[0],
            Diagnostic::ResolutionFailure { token, .. } if token == "bogus"
        ));
    }

    #[test]
    fn empty_input_has_no_tokens() {
        let r = resolve_gift_list("", &NumericResolver);
        assert!(r.ids.is_empty());
        assert!(r.failures.is_empty());
    }

    #[test]
    fn names_resolve_loosely() {
        let table: ItemNameTable = [("statue of Fo", 900), ("Small Statue", 901)]
            .into_iter()
            .collect();
        assert_eq!(table.resolve("statueOfFo"), Ok(900));
        assert_eq!(table.resolve("SMALL_STATUE"), Ok(901));
        assert_eq!(table.resolve("42"), Ok(42));
        assert_eq!(table.resolve("statueOfVynora"), Err(ResolveError::UnknownName));
    }

    #[test]
    fn numeric_resolver_rejects_names() {
        assert_eq!(NumericResolver.resolve("rock"), Err(ResolveError::UnknownName));
        assert_eq!(NumericResolver.resolve("+12"), Ok(12));
        assert_eq!(NumericResolver.resolve("-1"), Err(ResolveError::Negative(-1)));
    }
}

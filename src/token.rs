//! Tokens and the container family adapter.
//!
//! A [`Token`] is the canonical, totally-ordered identity of a relation or of
//! an extracted value, produced by a caller-supplied codec (or used directly
//! when the application value already is a valid token).
//!
//! [`TokenSet`] is the matched ordered-set container used by every index.
//! Each index picks a [`ContainerFamily`] at registration time:
//! integer-keyed indexes get a dense `i64` set, everything else a generic
//! ordered set. Set algebra between mismatched families promotes to the
//! generic representation rather than failing.
//!
//! # Example
//!
//! ```
//! use relata::{ContainerFamily, Token, TokenSet};
//!
//! let mut set = TokenSet::new(ContainerFamily::Dense);
//! set.insert(Token::Int(1));
//! set.insert(Token::Int(2));
//!
//! let mut other = TokenSet::new(ContainerFamily::Dense);
//! other.insert(Token::Int(2));
//! other.insert(Token::Int(3));
//!
//! let both = set.intersection(&other);
//! assert_eq!(both.len(), 1);
//! assert!(both.contains(&Token::Int(2)));
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A canonical, orderable, storable identity for a relation or an extracted
/// value.
///
/// Tokens are what the catalog stores and compares; the application objects
/// they stand for stay owned by the caller and are recovered through the
/// codec supplied at construction or index registration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Token {
    /// Boolean token.
    Bool(bool),
    /// 64-bit signed integer token.
    Int(i64),
    /// UTF-8 string token.
    String(String),
    /// Raw byte token.
    Bytes(Vec<u8>),
}

impl Token {
    /// Returns the token as an integer if it is one.
    #[inline]
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the token as a string slice if it is one.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the token as a boolean if it is one.
    #[inline]
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the token as raw bytes if it is one.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl From<i64> for Token {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for Token {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Token {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Token {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for Token {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "0x{}", b.iter().map(|x| format!("{x:02x}")).collect::<String>()),
        }
    }
}

/// Which matched container implementation an index uses for its token sets.
///
/// `Dense` is for indexes whose tokens are always [`Token::Int`]; it stores
/// raw `i64` keys, roughly a quarter of the footprint of the generic
/// representation. `Ordered` handles any token domain. The family is a
/// layout choice, not a constraint: a non-integer token inserted into a
/// dense set silently promotes the set to the generic representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContainerFamily {
    /// Dense set keyed by raw `i64`, for integer token domains.
    #[default]
    Dense,
    /// Generic ordered set keyed by [`Token`].
    Ordered,
}

/// An ordered set of tokens with the set algebra every index needs.
///
/// Iteration order is the tokens' natural order within the backing
/// representation; queries guarantee determinism but no ordering beyond
/// that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenSet {
    /// Dense integer-keyed representation.
    Dense(BTreeSet<i64>),
    /// Generic ordered representation.
    Ordered(BTreeSet<Token>),
}

impl TokenSet {
    /// Create an empty set of the given family.
    #[must_use]
    pub fn new(family: ContainerFamily) -> Self {
        match family {
            ContainerFamily::Dense => Self::Dense(BTreeSet::new()),
            ContainerFamily::Ordered => Self::Ordered(BTreeSet::new()),
        }
    }

    /// Build a set of the given family from an iterator of tokens.
    #[must_use]
    pub fn from_tokens(family: ContainerFamily, tokens: impl IntoIterator<Item = Token>) -> Self {
        let mut set = Self::new(family);
        for t in tokens {
            set.insert(t);
        }
        set
    }

    /// The family this set currently uses.
    ///
    /// A dense set that received a non-integer token reports `Ordered`.
    #[must_use]
    pub const fn family(&self) -> ContainerFamily {
        match self {
            Self::Dense(_) => ContainerFamily::Dense,
            Self::Ordered(_) => ContainerFamily::Ordered,
        }
    }

    /// Number of tokens in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Dense(s) => s.len(),
            Self::Ordered(s) => s.len(),
        }
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the set contains the given token.
    #[must_use]
    pub fn contains(&self, token: &Token) -> bool {
        match self {
            Self::Dense(s) => token.as_int().is_some_and(|i| s.contains(&i)),
            Self::Ordered(s) => s.contains(token),
        }
    }

    /// Insert a token. Returns `true` if it was not already present.
    pub fn insert(&mut self, token: Token) -> bool {
        match self {
            Self::Dense(s) => match token {
                Token::Int(i) => s.insert(i),
                other => {
                    self.promote();
                    self.insert(other)
                }
            },
            Self::Ordered(s) => s.insert(token),
        }
    }

    /// Remove a token. Returns `true` if it was present.
    pub fn remove(&mut self, token: &Token) -> bool {
        match self {
            Self::Dense(s) => token.as_int().is_some_and(|i| s.remove(&i)),
            Self::Ordered(s) => s.remove(token),
        }
    }

    /// Remove all tokens.
    pub fn clear(&mut self) {
        match self {
            Self::Dense(s) => s.clear(),
            Self::Ordered(s) => s.clear(),
        }
    }

    /// Insert every token from the iterator.
    pub fn extend(&mut self, tokens: impl IntoIterator<Item = Token>) {
        for t in tokens {
            self.insert(t);
        }
    }

    /// The smallest token, if the set is non-empty.
    #[must_use]
    pub fn first(&self) -> Option<Token> {
        self.iter().next()
    }

    /// Iterate over the tokens in order.
    pub fn iter(&self) -> impl Iterator<Item = Token> + '_ {
        let dense = match self {
            Self::Dense(s) => Some(s.iter().copied().map(Token::Int)),
            Self::Ordered(_) => None,
        };
        let ordered = match self {
            Self::Dense(_) => None,
            Self::Ordered(s) => Some(s.iter().cloned()),
        };
        dense.into_iter().flatten().chain(ordered.into_iter().flatten())
    }

    /// Set union.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Dense(a), Self::Dense(b)) => Self::Dense(a.union(b).copied().collect()),
            _ => Self::Ordered(self.iter().chain(other.iter()).collect()),
        }
    }

    /// Set intersection.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Dense(a), Self::Dense(b)) => Self::Dense(a.intersection(b).copied().collect()),
            _ => {
                let (small, large) = if self.len() <= other.len() { (self, other) } else { (other, self) };
                Self::Ordered(small.iter().filter(|t| large.contains(t)).collect())
            }
        }
    }

    /// Set difference (`self - other`).
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Dense(a), Self::Dense(b)) => Self::Dense(a.difference(b).copied().collect()),
            _ => Self::Ordered(self.iter().filter(|t| !other.contains(t)).collect()),
        }
    }

    /// Whether the two sets share at least one token.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        let (small, large) = if self.len() <= other.len() { (self, other) } else { (other, self) };
        small.iter().any(|t| large.contains(&t))
    }

    fn promote(&mut self) {
        if let Self::Dense(s) = self {
            let tokens = std::mem::take(s);
            *self = Self::Ordered(tokens.into_iter().map(Token::Int).collect());
        }
    }
}

impl Default for TokenSet {
    fn default() -> Self {
        Self::new(ContainerFamily::default())
    }
}

/// Union of arbitrarily many sets, skipping empty ones.
///
/// Falls back to a left fold of binary unions; the dense/dense case stays
/// dense throughout.
#[must_use]
pub fn multiunion<'a>(
    sets: impl IntoIterator<Item = &'a TokenSet>,
    family: ContainerFamily,
) -> TokenSet {
    let mut res: Option<TokenSet> = None;
    for set in sets {
        if set.is_empty() {
            continue;
        }
        res = Some(match res {
            None => set.clone(),
            Some(acc) => acc.union(set),
        });
    }
    res.unwrap_or_else(|| TokenSet::new(family))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn dense(vals: &[i64]) -> TokenSet {
        TokenSet::from_tokens(ContainerFamily::Dense, vals.iter().map(|&i| Token::Int(i)))
    }

    #[test]
    fn token_ordering_is_total() {
        let mut tokens = vec![
            Token::String("b".into()),
            Token::Int(2),
            Token::Bool(true),
            Token::Int(1),
            Token::String("a".into()),
        ];
        tokens.sort();
        assert_eq!(
            tokens,
            vec![
                Token::Bool(true),
                Token::Int(1),
                Token::Int(2),
                Token::String("a".into()),
                Token::String("b".into()),
            ]
        );
    }

    #[test]
    fn dense_set_membership() {
        let set = dense(&[1, 2, 3]);
        assert_eq!(set.len(), 3);
        assert!(set.contains(&Token::Int(2)));
        assert!(!set.contains(&Token::Int(9)));
        assert!(!set.contains(&Token::String("2".into())));
    }

    #[test]
    fn dense_set_promotes_on_non_int() {
        let mut set = dense(&[1, 2]);
        assert!(set.insert(Token::String("x".into())));
        assert_eq!(set.family(), ContainerFamily::Ordered);
        assert!(set.contains(&Token::Int(1)));
        assert!(set.contains(&Token::String("x".into())));
    }

    #[test]
    fn set_algebra_dense() {
        let a = dense(&[1, 2, 3]);
        let b = dense(&[2, 3, 4]);
        assert_eq!(a.union(&b), dense(&[1, 2, 3, 4]));
        assert_eq!(a.intersection(&b), dense(&[2, 3]));
        assert_eq!(a.difference(&b), dense(&[1]));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&dense(&[9])));
    }

    #[test]
    fn set_algebra_mixed_families_promotes() {
        let a = dense(&[1, 2]);
        let b = TokenSet::from_tokens(
            ContainerFamily::Ordered,
            [Token::Int(2), Token::String("x".into())],
        );
        let u = a.union(&b);
        assert_eq!(u.family(), ContainerFamily::Ordered);
        assert_eq!(u.len(), 3);
        let i = a.intersection(&b);
        assert_eq!(i.len(), 1);
        assert!(i.contains(&Token::Int(2)));
    }

    #[test]
    fn multiunion_skips_empty_sets() {
        let a = dense(&[1]);
        let empty = TokenSet::new(ContainerFamily::Dense);
        let b = dense(&[2]);
        let res = multiunion([&a, &empty, &b], ContainerFamily::Dense);
        assert_eq!(res, dense(&[1, 2]));
        assert_eq!(res.family(), ContainerFamily::Dense);
    }

    #[test]
    fn multiunion_of_nothing_is_empty() {
        let res = multiunion([], ContainerFamily::Dense);
        assert!(res.is_empty());
        assert_eq!(res.family(), ContainerFamily::Dense);
    }

    #[test]
    fn iteration_is_sorted() {
        let set = dense(&[3, 1, 2]);
        let tokens: Vec<Token> = set.iter().collect();
        assert_eq!(tokens, vec![Token::Int(1), Token::Int(2), Token::Int(3)]);
    }
}

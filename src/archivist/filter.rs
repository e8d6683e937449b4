//! Entity filters from the `[filters]` config section.
//!
//! A filter answers `True`, `False` or `Undefined` for an entity (and
//! optionally one of its attachments). Lists let later entries override
//! earlier ones, so `["all", {exclude = {type = "channel"}}]` selects every
//! entity except channels.

use crate::remote::{Entity, EntityKind, FileDescriptor};
use anyhow::{Result, anyhow};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    True,
    Undefined,
    False,
}

pub trait EntityFilter {
    fn matches(&self, entity: &Entity, file: Option<&FileDescriptor>) -> MatchResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKeyword {
    All,
    None,
}

/// Byte count written as `1024`, `"512"`, `"10K"` or `"5M"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SuffixedSize(pub i64);

impl SuffixedSize {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (digits, scale) = match raw.as_bytes().last() {
            Some(b'K') => (&raw[..raw.len() - 1], 1024),
            Some(b'M') => (&raw[..raw.len() - 1], 1024 * 1024),
            _ => (raw, 1),
        };
        let n = digits
            .parse::<i64>()
            .map_err(|err| anyhow!("invalid size `{raw}`: {err}"))?;
        Ok(Self(n * scale))
    }
}

impl fmt::Display for SuffixedSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.0;
        if n > 1024 * 1024 {
            write!(f, "{}M", n / (1024 * 1024))
        } else if n > 1024 {
            write!(f, "{}K", n / 1024)
        } else {
            write!(f, "{n}")
        }
    }
}

impl Serialize for SuffixedSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SuffixedSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SizeVisitor;

        impl Visitor<'_> for SizeVisitor {
            type Value = SuffixedSize;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte count or a string like \"10K\" or \"5M\"")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(SuffixedSize(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                i64::try_from(v)
                    .map(SuffixedSize)
                    .map_err(|_| E::custom("size out of range"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                SuffixedSize::parse(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(SizeVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExcludeFilter {
    pub exclude: Box<FilterSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OnlyFilter {
    pub only: Box<FilterSpec>,
    pub with: Box<FilterSpec>,
}

/// Matches when every given attribute matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttrsFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntityKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_max_size: Option<SuffixedSize>,
}

impl AttrsFilter {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn kind(kind: EntityKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }
}

impl fmt::Display for AttrsFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(raw) => f.write_str(&raw),
            Err(_) => write!(f, "{self:?}"),
        }
    }
}

impl EntityFilter for AttrsFilter {
    fn matches(&self, entity: &Entity, file: Option<&FileDescriptor>) -> MatchResult {
        let entity_ok = self.id.is_none_or(|id| id == entity.id)
            && self.title.as_deref().is_none_or(|t| t == entity.title)
            && self.username.as_deref().is_none_or(|u| u == entity.username)
            && self.kind.is_none_or(|k| k == entity.kind);
        let file_ok = match (file, self.media_max_size) {
            (Some(file), Some(max)) => file.size <= max.0,
            _ => true,
        };
        if entity_ok && file_ok {
            MatchResult::True
        } else {
            MatchResult::Undefined
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterSpec {
    Keyword(FilterKeyword),
    Multi(Vec<FilterSpec>),
    Exclude(ExcludeFilter),
    Only(OnlyFilter),
    Attrs(AttrsFilter),
}

impl FilterSpec {
    pub fn all() -> Self {
        Self::Keyword(FilterKeyword::All)
    }

    pub fn none() -> Self {
        Self::Keyword(FilterKeyword::None)
    }

    pub fn is_true(&self, entity: &Entity, file: Option<&FileDescriptor>) -> bool {
        self.matches(entity, file) == MatchResult::True
    }

    /// Visit this filter and every filter nested in it.
    fn visit<'a, F: FnMut(&'a FilterSpec)>(&'a self, f: &mut F) {
        f(self);
        match self {
            Self::Multi(inner) => {
                for spec in inner {
                    spec.visit(f);
                }
            }
            Self::Exclude(exclude) => exclude.exclude.visit(f),
            Self::Only(only) => {
                only.only.visit(f);
                only.with.visit(f);
            }
            Self::Keyword(_) | Self::Attrs(_) => {}
        }
    }

    fn attrs<'a>(&'a self) -> Vec<&'a AttrsFilter> {
        let mut out = Vec::new();
        self.visit(&mut |spec: &'a FilterSpec| {
            if let FilterSpec::Attrs(attrs) = spec {
                out.push(attrs);
            }
        });
        out
    }

    /// Attribute filters that select none of `entities`.
    pub fn unused_attrs<'a>(&'a self, entities: &[Entity]) -> Vec<&'a AttrsFilter> {
        self.attrs()
            .into_iter()
            .filter(|attrs| {
                !entities
                    .iter()
                    .any(|entity| attrs.matches(entity, None) == MatchResult::True)
            })
            .collect()
    }

    pub fn uses_media_max_size(&self) -> bool {
        self.attrs()
            .iter()
            .any(|attrs| attrs.media_max_size.is_some())
    }
}

impl EntityFilter for FilterSpec {
    fn matches(&self, entity: &Entity, file: Option<&FileDescriptor>) -> MatchResult {
        match self {
            Self::Keyword(FilterKeyword::All) => MatchResult::True,
            Self::Keyword(FilterKeyword::None) => MatchResult::False,
            Self::Multi(inner) => inner
                .iter()
                .rev()
                .map(|spec| spec.matches(entity, file))
                .find(|m| *m != MatchResult::Undefined)
                .unwrap_or(MatchResult::Undefined),
            Self::Exclude(exclude) => match exclude.exclude.matches(entity, file) {
                MatchResult::True => MatchResult::False,
                _ => MatchResult::Undefined,
            },
            Self::Only(only) => match only.only.matches(entity, file) {
                MatchResult::True => only.with.matches(entity, file),
                other => other,
            },
            Self::Attrs(attrs) => attrs.matches(entity, file),
        }
    }
}

/// `history_limit` entry: only the newest `limit` messages of a new entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryLimitRule {
    pub limit: i64,
    pub filter: FilterSpec,
}

/// Smallest positive limit whose filter selects `entity`, or 0 for none.
pub fn history_limit_for(rules: &[HistoryLimitRule], entity: &Entity) -> i64 {
    rules
        .iter()
        .filter(|rule| rule.limit > 0 && rule.filter.is_true(entity, None))
        .map(|rule| rule.limit)
        .min()
        .unwrap_or(0)
}

/// Log filters that cannot have the effect their author intended.
pub fn warn_about_filters(
    history: &FilterSpec,
    stories: &FilterSpec,
    media: &FilterSpec,
    history_limit: &[HistoryLimitRule],
    entities: &[Entity],
) -> Vec<String> {
    let mut warnings = Vec::new();
    for attrs in history.unused_attrs(entities) {
        warnings.push(format!("no entities match history filter {attrs}"));
    }
    for attrs in media.unused_attrs(entities) {
        warnings.push(format!("no entities match media filter {attrs}"));
    }
    if history.uses_media_max_size() {
        warnings.push("`media_max_size` has no effect in filters.history".to_string());
    }
    if stories.uses_media_max_size() {
        warnings.push("`media_max_size` has no effect in filters.stories".to_string());
    }
    if history_limit
        .iter()
        .any(|rule| rule.filter.uses_media_max_size())
    {
        warnings.push("`media_max_size` has no effect in filters.history_limit".to_string());
    }
    for warning in &warnings {
        warn!("{warning}");
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::test_support::{channel_entity, group_entity, user_entity};
    use serde_json::json;

    fn spec(raw: &str) -> FilterSpec {
        toml::from_str::<toml::Table>(&format!("f = {raw}"))
            .expect("toml")
            .remove("f")
            .expect("key")
            .try_into()
            .expect("filter")
    }

    fn file(size: i64) -> FileDescriptor {
        FileDescriptor {
            location: json!({}),
            dc_id: 1,
            size,
            file_name: "a.bin".to_string(),
            index: 0,
        }
    }

    #[test]
    fn keywords_and_lists_resolve_by_last_defined() {
        let alice = user_entity(1, "Alice");
        assert!(spec("\"all\"").is_true(&alice, None));
        assert_eq!(spec("\"none\"").matches(&alice, None), MatchResult::False);

        let everyone_but_channels = spec(r#"["all", {exclude = {type = "channel"}}]"#);
        assert!(everyone_but_channels.is_true(&alice, None));
        assert_eq!(
            everyone_but_channels.matches(&channel_entity(2, "News"), None),
            MatchResult::False
        );
        assert_eq!(spec("[]").matches(&alice, None), MatchResult::Undefined);
    }

    #[test]
    fn exclude_never_says_true() {
        let exclude = spec(r#"{exclude = {id = 5}}"#);
        assert_eq!(exclude.matches(&user_entity(5, "x"), None), MatchResult::False);
        assert_eq!(exclude.matches(&user_entity(6, "x"), None), MatchResult::Undefined);
    }

    #[test]
    fn only_with_narrows() {
        let users_named_bob = spec(r#"{only = {type = "user"}, with = {title = "Bob"}}"#);
        assert!(users_named_bob.is_true(&user_entity(1, "Bob"), None));
        assert_eq!(
            users_named_bob.matches(&user_entity(1, "Ann"), None),
            MatchResult::Undefined
        );
        assert_eq!(
            users_named_bob.matches(&group_entity(1, "Bob"), None),
            MatchResult::Undefined
        );
    }

    #[test]
    fn attrs_check_entity_and_file_size() {
        let small_media = spec(r#"{type = "user", media_max_size = "1K"}"#);
        let bob = user_entity(1, "Bob");
        assert!(small_media.is_true(&bob, None));
        assert!(small_media.is_true(&bob, Some(&file(1024))));
        assert_eq!(small_media.matches(&bob, Some(&file(1025))), MatchResult::Undefined);
        assert_eq!(
            small_media.matches(&group_entity(2, "G"), Some(&file(1))),
            MatchResult::Undefined
        );
    }

    #[test]
    fn unknown_attribute_is_rejected() {
        let parsed = toml::from_str::<toml::Table>("f = {colour = \"red\"}")
            .expect("toml")
            .remove("f")
            .expect("key")
            .try_into::<FilterSpec>();
        assert!(parsed.is_err());
    }

    #[test]
    fn sizes_accept_suffixes() {
        assert_eq!(SuffixedSize::parse("10K").expect("k").0, 10 * 1024);
        assert_eq!(SuffixedSize::parse("5M").expect("m").0, 5 * 1024 * 1024);
        assert_eq!(SuffixedSize::parse("77").expect("plain").0, 77);
        assert!(SuffixedSize::parse("5G").is_err());
        assert_eq!(SuffixedSize(3 * 1024 * 1024).to_string(), "3M");
    }

    #[test]
    fn history_limit_takes_smallest_matching() {
        let rules = vec![
            HistoryLimitRule {
                limit: 500,
                filter: FilterSpec::all(),
            },
            HistoryLimitRule {
                limit: 50,
                filter: FilterSpec::Attrs(AttrsFilter::kind(EntityKind::Channel)),
            },
        ];
        assert_eq!(history_limit_for(&rules, &channel_entity(1, "c")), 50);
        assert_eq!(history_limit_for(&rules, &user_entity(1, "u")), 500);
        assert_eq!(history_limit_for(&[], &user_entity(1, "u")), 0);
    }

    #[test]
    fn warnings_name_unused_and_misplaced_attrs() {
        let entities = vec![user_entity(1, "Alice")];
        let history = spec(r#"[{title = "Alice"}, {title = "Ghost", media_max_size = 10}]"#);
        let warnings = warn_about_filters(
            &history,
            &FilterSpec::none(),
            &FilterSpec::none(),
            &[],
            &entities,
        );
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("Ghost"));
        assert!(warnings[1].contains("filters.history"));
    }
}

//! Redirect target resolution.
//!
//! A proposed URL is resolved to one of a few canonical storefront shapes and
//! must point at something that is known to exist. When nothing can be
//! verified the redirect is blocked (`None`) rather than guessed.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use url::Url;

use crate::reranking::term_set;
use crate::types::{CandidateRecord, Classification, ContentType, RecordKind};

const CANONICAL_PATHS: &[&str] = &[
    "/",
    "/account",
    "/account/login",
    "/account/register",
    "/account/addresses",
    "/cart",
    "/collections",
    "/collections/all",
    "/search",
];

const PATH_ALIASES: &[(&str, &str)] = &[
    ("/home", "/"),
    ("/login", "/account/login"),
    ("/signin", "/account/login"),
    ("/sign-in", "/account/login"),
    ("/register", "/account/register"),
    ("/signup", "/account/register"),
    ("/sign-up", "/account/register"),
    ("/profile", "/account"),
    ("/my-account", "/account"),
    ("/account/profile", "/account"),
    ("/shop", "/collections/all"),
    ("/products", "/collections/all"),
];

/// Policy slugs served under `/policies/`.
const POLICY_SLUGS: &[&str] = &[
    "refund-policy",
    "return-policy",
    "privacy-policy",
    "terms-of-service",
    "shipping-policy",
    "contact-information",
    "legal-notice",
    "subscription-policy",
];

/// Loose names accepted only when already under `/policies/`.
const POLICY_ALIASES: &[(&str, &str)] = &[
    ("refund", "refund-policy"),
    ("refunds", "refund-policy"),
    ("returns", "return-policy"),
    ("returns-policy", "return-policy"),
    ("privacy", "privacy-policy"),
    ("terms", "terms-of-service"),
    ("terms-and-conditions", "terms-of-service"),
    ("shipping", "shipping-policy"),
];

/// Stems too generic to identify a handle.
const GENERIC_TERMS: &[&str] = &[
    "collect", "product", "page", "shop", "store", "show", "item", "blog", "post", "look", "find",
    "want", "need", "see", "get", "buy", "all", "new",
];

const ACCOUNT_WORDS: &[&str] = &["account", "profile", "login", "password"];
const BLOG_WORDS: &[&str] = &["blog", "blogs", "article", "articles", "post", "posts", "news", "journal"];

/// Content the resolver may link to: every candidate retrieved this turn.
#[derive(Debug, Clone, Default)]
pub struct AvailableContent {
    records: Vec<CandidateRecord>,
}

impl AvailableContent {
    pub fn new(records: Vec<CandidateRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[CandidateRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn of_kind(&self, kind: RecordKind) -> impl Iterator<Item = &CandidateRecord> {
        self.records.iter().filter(move |r| r.kind == kind)
    }

    fn find_handle(&self, kind: RecordKind, handle: &str) -> Option<&CandidateRecord> {
        self.of_kind(kind)
            .find(|r| r.handle.as_deref().is_some_and(|h| h.eq_ignore_ascii_case(handle)))
    }

    pub fn blog_handles(&self) -> BTreeSet<String> {
        self.of_kind(RecordKind::Post)
            .filter_map(|r| r.blog_handle.clone())
            .collect()
    }
}

/// Which rule produced a resolved path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStep {
    Canonical,
    Policy,
    VerifiedHandle,
    FuzzyHandle,
    QueryHeuristic,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UrlResolver;

impl UrlResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve `proposed` to a verified storefront path, or `None` to block
    /// the redirect.
    pub fn resolve(
        &self,
        proposed: &str,
        utterance: &str,
        classification: Option<&Classification>,
        available: &AvailableContent,
    ) -> Option<String> {
        match self.resolve_with_step(proposed, utterance, classification, available) {
            Some((path, step)) => {
                tracing::debug!(proposed = proposed, resolved = %path, step = ?step, "Redirect resolved");
                Some(path)
            }
            None => {
                tracing::info!(proposed = proposed, "Redirect target could not be verified, blocking");
                None
            }
        }
    }

    pub fn resolve_with_step(
        &self,
        proposed: &str,
        utterance: &str,
        classification: Option<&Classification>,
        available: &AvailableContent,
    ) -> Option<(String, ResolutionStep)> {
        let path = normalize_path(proposed).unwrap_or_default();

        if CANONICAL_PATHS.contains(&path.as_str()) {
            return Some((path, ResolutionStep::Canonical));
        }
        if let Some((_, target)) = PATH_ALIASES.iter().find(|(alias, _)| *alias == path) {
            return Some((target.to_string(), ResolutionStep::Canonical));
        }

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        if let Some(slug) = policy_slug(&segments) {
            return Some((format!("/policies/{}", slug), ResolutionStep::Policy));
        }

        let typed = match segments.as_slice() {
            ["products", handle] | ["collections", _, "products", handle] => {
                Some((RecordKind::Product, *handle))
            }
            ["collections", handle] => Some((RecordKind::Collection, *handle)),
            ["pages", handle] => Some((RecordKind::Page, *handle)),
            ["blogs", _, handle] => Some((RecordKind::Post, *handle)),
            _ => None,
        };

        if let Some((kind, handle)) = typed {
            if let Some(path) = available.find_handle(kind, handle).and_then(|r| r.url_path()) {
                return Some((path, ResolutionStep::VerifiedHandle));
            }
            if let Some(path) = fuzzy_match(kind, handle, utterance, available).and_then(|r| r.url_path()) {
                return Some((path, ResolutionStep::FuzzyHandle));
            }
        }

        if let ["blogs", blog] = segments.as_slice() {
            if available.blog_handles().contains(*blog) {
                return Some((format!("/blogs/{}", blog), ResolutionStep::VerifiedHandle));
            }
        }

        let hint = segments.last().copied().unwrap_or_default();
        query_heuristic(hint, utterance, classification, available)
            .map(|path| (path, ResolutionStep::QueryHeuristic))
    }
}

/// Lowercased path without scheme, host, query, fragment or trailing slash.
pub fn normalize_path(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let path = match Url::parse(raw) {
        Ok(parsed) if parsed.cannot_be_a_base() => return None,
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => {
            let end = raw.find(|c: char| c == '?' || c == '#').unwrap_or(raw.len());
            let relative = raw[..end].trim_start_matches('/');
            // `shop.example.com/pages/faq` without a scheme
            match relative.split_once('/') {
                Some((host, rest)) if host.contains('.') => format!("/{}", rest),
                _ => format!("/{}", relative),
            }
        }
    };

    let trimmed = path.trim_end_matches('/').to_lowercase();
    if trimmed.is_empty() {
        Some("/".to_string())
    } else {
        Some(trimmed)
    }
}

fn canonical_policy(slug: &str) -> Option<&'static str> {
    POLICY_SLUGS.iter().copied().find(|s| *s == slug)
}

fn policy_slug(segments: &[&str]) -> Option<&'static str> {
    match segments {
        ["policies", slug] => canonical_policy(slug).or_else(|| {
            POLICY_ALIASES
                .iter()
                .find(|(alias, _)| alias == slug)
                .map(|(_, target)| *target)
        }),
        ["pages", slug] | [slug] => canonical_policy(slug).or(match *slug {
            "returns-policy" => Some("return-policy"),
            "terms-and-conditions" => Some("terms-of-service"),
            _ => None,
        }),
        _ => None,
    }
}

fn significant_terms(text: &str) -> HashSet<String> {
    term_set(&text.replace(['-', '_'], " "))
        .into_iter()
        .filter(|t| t.len() > 1 && !GENERIC_TERMS.contains(&t.as_str()))
        .collect()
}

/// Best available record of `kind` sharing significant terms with the hint.
///
/// Collections are matched loosely: any term from the hint or the utterance
/// counts. Products, pages and posts must cover more than half of the hint's
/// own terms, so a single shared adjective never swaps one item for another.
/// Jaro-Winkler on the handle breaks ties.
fn fuzzy_match<'a>(
    kind: RecordKind,
    hint: &str,
    utterance: &str,
    available: &'a AvailableContent,
) -> Option<&'a CandidateRecord> {
    let hint_terms = significant_terms(hint);
    let strict = kind != RecordKind::Collection;
    let mut wanted = hint_terms.clone();
    if !strict {
        wanted.extend(significant_terms(utterance));
    }
    if wanted.is_empty() {
        return None;
    }

    available
        .of_kind(kind)
        .filter_map(|record| {
            let handle = record.handle.as_deref()?;
            let mut terms = significant_terms(handle);
            terms.extend(significant_terms(&record.title));
            let shared = terms.intersection(&wanted).count();
            if shared == 0 || (strict && shared * 2 <= hint_terms.len()) {
                return None;
            }
            Some((record, shared, strsim::jaro_winkler(hint, handle)))
        })
        .max_by(|a, b| {
            a.1.cmp(&b.1)
                .then_with(|| a.2.partial_cmp(&b.2).unwrap_or(Ordering::Equal))
                .then_with(|| b.0.id.cmp(&a.0.id))
        })
        .map(|(record, _, _)| record)
}

fn has_plural_noun(utterance: &str) -> bool {
    utterance
        .split(|c: char| !c.is_alphabetic() && c != '\'')
        .map(|w| w.to_lowercase())
        .any(|w| {
            w.len() > 3
                && w.ends_with('s')
                && !w.ends_with("ss")
                && !w.ends_with("us")
                && !w.ends_with("is")
                && !w.ends_with("'s")
        })
}

fn query_heuristic(
    hint: &str,
    utterance: &str,
    classification: Option<&Classification>,
    available: &AvailableContent,
) -> Option<String> {
    let words: Vec<String> = utterance
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();
    let has_word = |list: &[&str]| words.iter().any(|w| list.contains(&w.as_str()));

    let wants_collection = has_plural_noun(utterance)
        || classification.is_some_and(|c| c.content_type == ContentType::Collection);
    if wants_collection {
        if let Some(path) = fuzzy_match(RecordKind::Collection, hint, utterance, available)
            .and_then(|r| r.url_path())
        {
            return Some(path);
        }
    }

    if has_word(ACCOUNT_WORDS) || hint.contains("account") || hint.contains("profile") {
        return Some("/account".to_string());
    }

    if has_word(BLOG_WORDS) || hint.starts_with("blog") {
        let blogs = available.blog_handles();
        if blogs.len() == 1 {
            return blogs.into_iter().next().map(|b| format!("/blogs/{}", b));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: RecordKind, handle: &str, title: &str) -> CandidateRecord {
        CandidateRecord {
            id: format!("{:?}-{}", kind, handle),
            kind,
            handle: Some(handle.to_string()),
            title: title.to_string(),
            text: String::new(),
            blog_handle: (kind == RecordKind::Post).then(|| "journal".to_string()),
            content_type: kind.content_type(),
            category: None,
            sub_category: None,
            score: 0.5,
            dense_score: 0.5,
            sparse_score: 0.0,
        }
    }

    fn store() -> AvailableContent {
        AvailableContent::new(vec![
            record(RecordKind::Collection, "winter-sports-collection", "Winter Sports"),
            record(RecordKind::Collection, "summer-essentials", "Summer Essentials"),
            record(RecordKind::Product, "alpine-parka", "Alpine Parka"),
            record(RecordKind::Page, "about-us", "About us"),
            record(RecordKind::Post, "layering-guide", "How to layer for the cold"),
        ])
    }

    fn collection_classification() -> Classification {
        Classification {
            content_type: ContentType::Collection,
            category: "apparel".into(),
            sub_category: "winter".into(),
            action_intent: crate::types::Action::Redirect,
            context_dependency: Default::default(),
            content_targets: Default::default(),
        }
    }

    #[test]
    fn test_policy_pages_are_normalized() {
        let resolver = UrlResolver::new();
        let available = store();
        assert_eq!(
            resolver.resolve("/pages/return-policy", "", None, &available).as_deref(),
            Some("/policies/return-policy")
        );
        assert_eq!(
            resolver
                .resolve("https://shop.example.com/pages/return-policy?ref=chat", "", None, &available)
                .as_deref(),
            Some("/policies/return-policy")
        );
        assert_eq!(
            resolver.resolve("policies/refunds", "", None, &available).as_deref(),
            Some("/policies/refund-policy")
        );
    }

    #[test]
    fn test_nonexistent_collection_is_blocked() {
        let resolver = UrlResolver::new();
        let resolved = resolver.resolve(
            "/collections/nonexistent-xyz",
            "take me to nonexistent xyz",
            None,
            &store(),
        );
        assert_eq!(resolved, None);
    }

    #[test]
    fn test_winter_gear_resolves_to_existing_collection() {
        let resolver = UrlResolver::new();
        let classification = collection_classification();
        let (path, step) = resolver
            .resolve_with_step(
                "/collections/winter-gear",
                "do you have winter gear",
                Some(&classification),
                &store(),
            )
            .unwrap();
        assert_eq!(path, "/collections/winter-sports-collection");
        assert_eq!(step, ResolutionStep::FuzzyHandle);
    }

    #[test]
    fn test_product_fuzzy_match_needs_most_of_the_handle() {
        let resolver = UrlResolver::new();
        let available = AvailableContent::new(vec![
            record(RecordKind::Product, "red-rain-boots", "Red Rain Boots"),
            record(RecordKind::Product, "alpine-parka", "Alpine Parka"),
        ]);

        assert_eq!(
            resolver.resolve(
                "/products/red-wool-scarf",
                "do you have a red wool scarf",
                None,
                &available
            ),
            None
        );
        assert_eq!(
            resolver.resolve_with_step(
                "/products/alpine-parka-jacket",
                "show me the alpine parka jacket",
                None,
                &available
            ),
            Some(("/products/alpine-parka".to_string(), ResolutionStep::FuzzyHandle))
        );
    }

    #[test]
    fn test_verified_handles_and_canonical_paths() {
        let resolver = UrlResolver::new();
        let available = store();
        assert_eq!(
            resolver.resolve_with_step("/products/alpine-parka/", "", None, &available),
            Some(("/products/alpine-parka".to_string(), ResolutionStep::VerifiedHandle))
        );
        assert_eq!(
            resolver.resolve("/blogs/journal/layering-guide", "", None, &available).as_deref(),
            Some("/blogs/journal/layering-guide")
        );
        assert_eq!(resolver.resolve("/cart", "", None, &available).as_deref(), Some("/cart"));
        assert_eq!(
            resolver.resolve("/login", "", None, &available).as_deref(),
            Some("/account/login")
        );
        assert_eq!(resolver.resolve("mailto:help@example.com", "", None, &available), None);
    }

    #[test]
    fn test_query_vocabulary_heuristics() {
        let resolver = UrlResolver::new();
        let available = store();

        assert_eq!(
            resolver.resolve("/my-details", "where can I update my profile", None, &available).as_deref(),
            Some("/account")
        );
        assert_eq!(
            resolver.resolve("/blog", "show me your blog", None, &available).as_deref(),
            Some("/blogs/journal")
        );
        assert_eq!(
            resolver.resolve("/summer", "any summer dresses", None, &available).as_deref(),
            Some("/collections/summer-essentials")
        );
        assert_eq!(resolver.resolve("/somewhere", "hello there", None, &available), None);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("Products/Alpine-Parka#reviews").as_deref(), Some("/products/alpine-parka"));
        assert_eq!(normalize_path("shop.example.com/pages/faq").as_deref(), Some("/pages/faq"));
        assert_eq!(normalize_path("https://shop.example.com").as_deref(), Some("/"));
        assert_eq!(normalize_path("   "), None);
    }
}

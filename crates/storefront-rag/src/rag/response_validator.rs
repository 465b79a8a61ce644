//! Validation and repair of the model's structured reply.

use serde_json::{Map, Value};

use crate::config::ValidatorConfig;
use crate::rag::permission_gate::{check_action, GateDecision};
use crate::rag::structured_output::{parse_json_object, string_field};
use crate::rag::url_resolver::{AvailableContent, UrlResolver};
use crate::types::{Action, ActionContext, Classification, PermissionSet, ResolvedAction};

const EMPTY_REPLY_MESSAGE: &str = "Sorry, I didn't catch that. Could you rephrase your question?";

const ADDRESS_CHANGE_MESSAGE: &str = "For your security I can't change saved addresses from the chat. You can update them on the Addresses page of your account.";

const ADDRESS_WORDS: &[&str] = &["address", "addresses", "street", "zip", "postcode", "postal"];
const MUTATION_WORDS: &[&str] = &[
    "update", "change", "edit", "add", "delete", "remove", "replace", "set", "new", "modify",
];
const ADDRESS_KEYS: &[&str] = &[
    "address", "address1", "address2", "street", "city", "zip", "postal", "postcode", "province",
    "country",
];

#[derive(Debug, Clone, Default)]
pub struct ResponseValidator {
    config: ValidatorConfig,
    resolver: UrlResolver,
}

impl ResponseValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            resolver: UrlResolver::new(),
        }
    }

    /// Turn a raw model reply into a well-formed, permitted action. Never fails.
    pub fn validate(
        &self,
        raw: &str,
        utterance: &str,
        classification: &Classification,
        available: &AvailableContent,
        permissions: &PermissionSet,
    ) -> ResolvedAction {
        let Some(map) = parse_json_object(raw) else {
            tracing::warn!("Model reply is not structured, answering with raw text");
            let text = raw.trim();
            return ResolvedAction::none(if text.is_empty() { EMPTY_REPLY_MESSAGE } else { text });
        };

        let mut resolved = parse_reply(&map);

        if let GateDecision::Denied { response, .. } =
            check_action(resolved.action, permissions, Some(classification))
        {
            return response;
        }

        if matches!(
            resolved.action,
            Action::Redirect | Action::Scroll | Action::HighlightText
        ) && !permissions.permits(resolved.action)
        {
            tracing::info!(action = %resolved.action, "Navigation action not enabled for site, downgrading");
            return downgrade(resolved);
        }

        match resolved.action {
            Action::Redirect => {
                let proposed = resolved.url.clone().unwrap_or_default();
                match self
                    .resolver
                    .resolve(&proposed, utterance, Some(classification), available)
                {
                    Some(url) => resolved.url = Some(url),
                    None => return downgrade(resolved),
                }
            }
            Action::Scroll | Action::HighlightText => {
                let (text, explicit) = match classification.exact_text() {
                    Some(exact) => (exact.to_string(), true),
                    None => (
                        resolved
                            .scroll_text
                            .clone()
                            .or_else(|| resolved.action_context.exact_text.clone())
                            .unwrap_or_default(),
                        false,
                    ),
                };
                let cleaned = if explicit {
                    collapse_whitespace(&text)
                } else {
                    clean_highlight_text(&text, self.config.highlight_max_words)
                };
                if cleaned.is_empty() {
                    tracing::info!(action = %resolved.action, "No target text, downgrading");
                    return downgrade(resolved);
                }
                if explicit {
                    resolved.action_context.exact_text = Some(cleaned.clone());
                }
                resolved.scroll_text = Some(cleaned);
                resolved.url = None;
            }
            Action::Contact => {
                resolved.action_context.contact_help_form = true;
                resolved.url = None;
            }
            Action::GetOrders
            | Action::TrackOrder
            | Action::CancelOrder
            | Action::ReturnOrder
            | Action::ExchangeOrder => {
                let context = &mut resolved.action_context;
                if context.email.is_none() {
                    context.email = classification.content_targets.get("email").cloned();
                }
                if context.order_id.is_none() {
                    context.order_id = classification.content_targets.get("order_id").cloned();
                }
                resolved.url = None;
            }
            _ => {
                resolved.url = None;
            }
        }

        if resolved.action == Action::AccountManagement
            && is_address_mutation(raw, &resolved.action_context)
        {
            tracing::warn!("Address change requested through account management, downgrading");
            return ResolvedAction::none(ADDRESS_CHANGE_MESSAGE);
        }

        if resolved.answer.is_empty() {
            resolved.answer = EMPTY_REPLY_MESSAGE.to_string();
        }
        resolved
    }
}

fn parse_reply(map: &Map<String, Value>) -> ResolvedAction {
    let action = string_field(map, "action")
        .or_else(|| string_field(map, "action_intent"))
        .map(|a| Action::parse(&a))
        .unwrap_or_default();
    let answer = string_field(map, "answer")
        .or_else(|| string_field(map, "message"))
        .unwrap_or_default();
    let action_context = map
        .get("action_context")
        .filter(|v| v.is_object())
        .and_then(|v| serde_json::from_value::<ActionContext>(v.clone()).ok())
        .unwrap_or_default();

    ResolvedAction {
        action,
        answer,
        url: string_field(map, "url"),
        scroll_text: string_field(map, "scroll_text").or_else(|| string_field(map, "text")),
        action_context,
    }
}

/// Keep the answer, drop the action and anything that would execute it.
fn downgrade(resolved: ResolvedAction) -> ResolvedAction {
    let answer = if resolved.answer.is_empty() {
        EMPTY_REPLY_MESSAGE.to_string()
    } else {
        resolved.answer
    };
    ResolvedAction::none(answer)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip line breaks, collapse whitespace and cut to at most `max_words`
/// words, preferring to end on a sentence boundary.
pub fn clean_highlight_text(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return words.join(" ");
    }
    let head = &words[..max_words];
    let sentence_end = head
        .iter()
        .rposition(|w| w.ends_with(['.', '!', '?']));
    match sentence_end {
        Some(i) => head[..=i].join(" "),
        None => head.join(" "),
    }
}

fn is_address_mutation(raw: &str, context: &ActionContext) -> bool {
    if context
        .extra
        .keys()
        .any(|k| ADDRESS_KEYS.contains(&k.to_lowercase().as_str()))
    {
        return true;
    }
    let lower = raw.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    words.iter().any(|w| ADDRESS_WORDS.contains(w)) && words.iter().any(|w| MUTATION_WORDS.contains(w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CandidateRecord, ContentType, ContextDependency, DenialKind, RecordKind};

    fn classification(content_type: ContentType) -> Classification {
        Classification {
            content_type,
            category: "apparel".into(),
            sub_category: "winter".into(),
            action_intent: Action::None,
            context_dependency: ContextDependency::Low,
            content_targets: Default::default(),
        }
    }

    fn available() -> AvailableContent {
        AvailableContent::new(vec![CandidateRecord {
            id: "c1".into(),
            kind: RecordKind::Collection,
            handle: Some("winter-sports-collection".into()),
            title: "Winter Sports".into(),
            text: String::new(),
            blog_handle: None,
            content_type: Some(ContentType::Collection),
            category: None,
            sub_category: None,
            score: 0.8,
            dense_score: 0.8,
            sparse_score: 0.0,
        }])
    }

    fn validator() -> ResponseValidator {
        ResponseValidator::new(ValidatorConfig::default())
    }

    #[test]
    fn test_unstructured_reply_degrades_to_text() {
        let resolved = validator().validate(
            "We're open 9 to 5 on weekdays.",
            "when are you open",
            &classification(ContentType::Page),
            &available(),
            &PermissionSet::all_enabled(),
        );
        assert_eq!(resolved.action, Action::None);
        assert_eq!(resolved.answer, "We're open 9 to 5 on weekdays.");
    }

    #[test]
    fn test_order_actions_carry_detected_email_and_order_number() {
        let mut classification = classification(ContentType::Page);
        classification.action_intent = Action::TrackOrder;
        classification
            .content_targets
            .insert("email".into(), "sam@example.com".into());
        classification
            .content_targets
            .insert("order_id".into(), "10425".into());

        let resolved = validator().validate(
            r#"{"action": "track_order", "answer": "Let me look that up."}"#,
            "where is #10425, my email is sam@example.com",
            &classification,
            &available(),
            &PermissionSet::all_enabled(),
        );
        assert_eq!(resolved.action, Action::TrackOrder);
        assert_eq!(resolved.action_context.email.as_deref(), Some("sam@example.com"));
        assert_eq!(resolved.action_context.order_id.as_deref(), Some("10425"));

        let resolved = validator().validate(
            r#"{"action": "track_order", "answer": "Checking.", "action_context": {"order_id": "AB-77"}}"#,
            "track it",
            &classification,
            &available(),
            &PermissionSet::all_enabled(),
        );
        assert_eq!(resolved.action_context.order_id.as_deref(), Some("AB-77"));
    }

    #[test]
    fn test_disabled_action_from_model_is_rechecked() {
        let resolved = validator().validate(
            r#"{"action": "cancel_order", "answer": "Done, your order is cancelled."}"#,
            "please stop my purchase",
            &classification(ContentType::Page),
            &available(),
            &PermissionSet::default(),
        );
        assert_eq!(resolved.action, Action::Contact);
        assert!(resolved.action_context.contact_help_form);
        assert_eq!(resolved.action_context.denial, Some(DenialKind::HardDisabled));
    }

    #[test]
    fn test_redirect_is_resolved_or_blocked() {
        let perms = PermissionSet::all_enabled();
        let class = classification(ContentType::Collection);

        let resolved = validator().validate(
            r#"{"action": "redirect", "answer": "Here is our winter range.", "url": "/collections/winter-gear"}"#,
            "do you have winter gear",
            &class,
            &available(),
            &perms,
        );
        assert_eq!(resolved.action, Action::Redirect);
        assert_eq!(resolved.url.as_deref(), Some("/collections/winter-sports-collection"));

        let blocked = validator().validate(
            r#"{"action": "redirect", "answer": "Taking you there.", "url": "/collections/nonexistent-xyz"}"#,
            "take me to nonexistent xyz",
            &classification(ContentType::Page),
            &available(),
            &perms,
        );
        assert_eq!(blocked.action, Action::None);
        assert_eq!(blocked.url, None);
        assert_eq!(blocked.answer, "Taking you there.");
    }

    #[test]
    fn test_navigation_flag_off_keeps_answer() {
        let resolved = validator().validate(
            r#"{"action": "redirect", "answer": "Our winter range is great.", "url": "/collections/winter-sports-collection"}"#,
            "winter stuff",
            &classification(ContentType::Collection),
            &available(),
            &PermissionSet::default(),
        );
        assert_eq!(resolved.action, Action::None);
        assert_eq!(resolved.url, None);
        assert_eq!(resolved.answer, "Our winter range is great.");
    }

    #[test]
    fn test_highlight_text_is_cleaned_and_truncated() {
        let raw = r#"{"action": "highlight_text", "answer": "Here it is.", "scroll_text": "Free shipping\non all orders.  Returns are accepted within thirty days of delivery for unworn items with tags attached"}"#;
        let resolved = validator().validate(
            raw,
            "where does it talk about shipping",
            &classification(ContentType::Page),
            &available(),
            &PermissionSet::all_enabled(),
        );
        assert_eq!(resolved.action, Action::HighlightText);
        assert_eq!(resolved.scroll_text.as_deref(), Some("Free shipping on all orders."));
    }

    #[test]
    fn test_explicit_exact_text_is_not_truncated() {
        let mut class = classification(ContentType::Page);
        let exact = "Orders placed before noon ship the same business day from our warehouse in Denver Colorado USA";
        class
            .content_targets
            .insert(Classification::EXACT_TEXT.into(), exact.into());

        let resolved = validator().validate(
            r#"{"action": "highlight_text", "answer": "Highlighted.", "scroll_text": "Orders placed"}"#,
            "highlight Orders placed before noon ...",
            &class,
            &available(),
            &PermissionSet::all_enabled(),
        );
        assert_eq!(resolved.scroll_text.as_deref(), Some(exact));
        assert_eq!(resolved.action_context.exact_text.as_deref(), Some(exact));
    }

    #[test]
    fn test_address_change_is_downgraded() {
        let resolved = validator().validate(
            r#"{"action": "account_management", "answer": "Updating your address now.", "action_context": {"street": "1 Main St"}}"#,
            "change my shipping address",
            &classification(ContentType::Page),
            &available(),
            &PermissionSet::all_enabled(),
        );
        assert_eq!(resolved.action, Action::None);
        assert_eq!(resolved.answer, ADDRESS_CHANGE_MESSAGE);

        let keywords_only = validator().validate(
            r#"{"action": "account_management", "answer": "I'll update the address on file."}"#,
            "new address",
            &classification(ContentType::Page),
            &available(),
            &PermissionSet::all_enabled(),
        );
        assert_eq!(keywords_only.action, Action::None);

        let allowed = validator().validate(
            r#"{"action": "account_management", "answer": "Opening your account settings."}"#,
            "manage my newsletter preferences",
            &classification(ContentType::Page),
            &available(),
            &PermissionSet::all_enabled(),
        );
        assert_eq!(allowed.action, Action::AccountManagement);
    }

    #[test]
    fn test_clean_highlight_without_sentence_boundary() {
        let text = "one two three four five six";
        assert_eq!(clean_highlight_text(text, 4), "one two three four");
        assert_eq!(clean_highlight_text("  short\n\ntext ", 15), "short text");
    }
}

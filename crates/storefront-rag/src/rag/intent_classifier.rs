//! Intent classification for one shopper turn.
//!
//! Cheap regex/keyword heuristics run first and decide whether the turn
//! continues a previous exchange. The completion service then fills in the
//! structured classification, which is validated before anything downstream
//! sees it.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use crate::error::{ClassificationError, ClassifyError};
use crate::llm::CompletionService;
use crate::rag::structured_output::{parse_json_object, string_field};
use crate::types::{
    Action, Classification, ContentType, ContextDependency, ConversationContext, PageSnapshot,
    Role,
};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b").expect("email regex is valid")
});

/// `#1042`, `order number AB-1042`, a trailing `order 1042`, or a bare 4+ digit
/// reply. A number followed by more words after plain `order` is a quantity.
static ORDER_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:#\s?(\d{3,})\b|\border\s*(?:(?:number|no|id)\b\.?(?:\s+is)?\s*[:#]?|#)\s*([a-z]{0,4}-?\d[a-z0-9-]{2,})\b|\border\s+(\d{4,})\s*(?:[.,!?]|$)|^\s*(\d{4,})\s*$)",
    )
    .expect("order number regex is valid")
});

/// "highlight X", "scroll to X", "scroll down to the X section".
static HIGHLIGHT_SCROLL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)^\s*(?:(?:can|could)\s+you\s+)?(?:please\s+)?(highlight|scroll(?:\s+(?:down|up))?\s+to)\s+(?:the\s+(?:text|words?|phrase|line)\s+)?["'“‘]?(.+?)["'”’]?\s*[.!?]*\s*$"#,
    )
    .expect("highlight regex is valid")
});

const AMBIGUOUS_WORDS: &[&str] = &[
    "it", "this", "that", "these", "those", "they", "them", "one", "same", "yes", "yeah", "yep",
    "no", "nope", "ok", "okay", "sure", "correct", "right",
];

/// Replies shorter than this many words lean on the previous turn.
const SHORT_REPLY_WORDS: usize = 6;

/// Signals detected in the raw utterance before any model call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Heuristics {
    pub ambiguous: bool,
    pub short_reply: bool,
    pub email: Option<String>,
    pub order_number: Option<String>,
    /// Verbatim highlight/scroll target and the action it asks for.
    pub exact_text: Option<(Action, String)>,
}

impl Heuristics {
    pub fn detect(utterance: &str) -> Self {
        let lower = utterance.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
            .collect();

        let ambiguous = words.iter().any(|w| AMBIGUOUS_WORDS.contains(w));
        let short_reply = utterance.split_whitespace().count() < SHORT_REPLY_WORDS;

        let email = EMAIL_RE.find(utterance).map(|m| m.as_str().to_string());

        let order_number = ORDER_NUMBER_RE.captures(utterance).and_then(|caps| {
            (1..=4)
                .find_map(|i| caps.get(i))
                .map(|m| m.as_str().to_string())
        });

        let exact_text = HIGHLIGHT_SCROLL_RE.captures(utterance).and_then(|caps| {
            let verb = caps.get(1)?.as_str().to_lowercase();
            let target = caps.get(2)?.as_str().trim().to_string();
            if target.is_empty() {
                return None;
            }
            let action = if verb.starts_with("highlight") {
                Action::HighlightText
            } else {
                Action::Scroll
            };
            Some((action, target))
        });

        Self {
            ambiguous,
            short_reply,
            email,
            order_number,
            exact_text,
        }
    }

    /// Whether the utterance looks like it supplies details for, or answers,
    /// the previous turn.
    pub fn signals_continuation(&self) -> bool {
        self.ambiguous || self.short_reply || self.email.is_some() || self.order_number.is_some()
    }
}

/// Continuity decision derived from heuristics and the conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuityState {
    pub is_continuation: bool,
    /// Continuable action the turn carries forward, if any.
    pub carried_action: Option<Action>,
    pub previous_action: Option<Action>,
}

impl ContinuityState {
    pub fn evaluate(heuristics: &Heuristics, context: &ConversationContext) -> Self {
        if context.is_empty() {
            return Self {
                is_continuation: false,
                carried_action: None,
                previous_action: None,
            };
        }
        let previous_action = context.previous_action();
        let continuable = previous_action.filter(|a| a.is_continuable());
        let is_continuation = heuristics.signals_continuation() || continuable.is_some();
        let carried_action = continuable.filter(|_| heuristics.signals_continuation());
        Self {
            is_continuation,
            carried_action,
            previous_action,
        }
    }
}

pub struct IntentClassifier {
    completion: Arc<dyn CompletionService>,
}

impl IntentClassifier {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self { completion }
    }

    pub async fn classify(
        &self,
        utterance: &str,
        context: &ConversationContext,
        page: Option<&PageSnapshot>,
    ) -> Result<Classification, ClassifyError> {
        let heuristics = Heuristics::detect(utterance);
        let continuity = ContinuityState::evaluate(&heuristics, context);

        if continuity.is_continuation || heuristics.exact_text.is_some() {
            tracing::debug!(
                ambiguous = heuristics.ambiguous,
                short_reply = heuristics.short_reply,
                email = heuristics.email.is_some(),
                order_number = heuristics.order_number.is_some(),
                exact_text = heuristics.exact_text.is_some(),
                previous_action = ?continuity.previous_action,
                "Classifier heuristics fired"
            );
        }

        let user_prompt = build_user_prompt(utterance, &continuity, context, page);
        let reply = self
            .completion
            .complete(CLASSIFIER_SYSTEM_PROMPT, &user_prompt)
            .await?;

        let classification = parse_classification(&reply, &heuristics, &continuity)?;
        tracing::info!(
            content_type = %classification.content_type,
            category = %classification.category,
            action = %classification.action_intent,
            dependency = ?classification.context_dependency,
            "Utterance classified"
        );
        Ok(classification)
    }
}

const CLASSIFIER_SYSTEM_PROMPT: &str = "You classify shopper messages for an online store.\n\
Reply with ONLY a JSON object with these fields:\n\
- \"type\": one of \"product\", \"collection\", \"post\", \"page\", \"discount\"\n\
- \"category\": short topic label (e.g. \"apparel\", \"shipping\", \"orders\")\n\
- \"sub_category\": narrower label within the category\n\
- \"action_intent\": one of \"none\", \"redirect\", \"scroll\", \"highlight_text\", \"contact\", \
\"get_orders\", \"track_order\", \"cancel_order\", \"return_order\", \"exchange_order\", \"fill_form\", \
\"login\", \"logout\", \"account_management\", \"generate_image\", \"add_to_cart\", \"checkout\"\n\
- \"context_dependency\": \"high\" if the message only makes sense with the previous turns, else \"low\"\n\
- \"content_targets\": object of extracted values such as order_id, email, button_text, exact_text\n\
When the message is marked as a continuation, keep the intent of the ongoing action.";

fn build_user_prompt(
    utterance: &str,
    continuity: &ContinuityState,
    context: &ConversationContext,
    page: Option<&PageSnapshot>,
) -> String {
    let mut prompt = String::new();

    let turns = context.window();
    if !turns.is_empty() {
        prompt.push_str("Recent conversation:\n");
        for turn in turns {
            let role = match turn.role {
                Role::User => "Shopper",
                Role::Assistant => "Assistant",
            };
            prompt.push_str(&format!("{}: {}", role, turn.content));
            if let Some(action) = turn.recorded_action.filter(|a| *a != Action::None) {
                prompt.push_str(&format!(" [action: {}]", action));
            }
            prompt.push('\n');
        }
        prompt.push('\n');
    }

    if let Some(page) = page {
        prompt.push_str("Current page:\n");
        if let Some(ref url) = page.url {
            prompt.push_str(&format!("URL: {}\n", url));
        }
        if let Some(ref title) = page.title {
            prompt.push_str(&format!("Title: {}\n", title));
        }
        if !page.headings.is_empty() {
            prompt.push_str(&format!("Headings: {}\n", page.headings.join(" | ")));
        }
        if !page.buttons.is_empty() {
            prompt.push_str(&format!("Buttons: {}\n", page.buttons.join(" | ")));
        }
        prompt.push('\n');
    }

    prompt.push_str("Message: ");
    prompt.push_str(&enrich_utterance(utterance, continuity));
    prompt
}

/// Prefix the utterance with an explicit continuation marker when the turn
/// continues an earlier exchange.
pub fn enrich_utterance(utterance: &str, continuity: &ContinuityState) -> String {
    if !continuity.is_continuation {
        return utterance.to_string();
    }
    match continuity.previous_action {
        Some(action) => format!(
            "[CONTINUATION of previous action: {}] {}",
            action, utterance
        ),
        None => format!("[CONTINUATION of previous turn] {}", utterance),
    }
}

/// Validate a classifier reply and apply the heuristic overrides.
pub fn parse_classification(
    reply: &str,
    heuristics: &Heuristics,
    continuity: &ContinuityState,
) -> Result<Classification, ClassificationError> {
    let map = parse_json_object(reply)
        .ok_or_else(|| ClassificationError::Malformed(truncate_for_error(reply)))?;

    let raw_type = string_field(&map, "type").ok_or(ClassificationError::MissingField("type"))?;
    let content_type =
        ContentType::parse(&raw_type).ok_or(ClassificationError::InvalidType(raw_type))?;
    let category =
        string_field(&map, "category").ok_or(ClassificationError::MissingField("category"))?;
    let sub_category = string_field(&map, "sub_category")
        .ok_or(ClassificationError::MissingField("sub_category"))?;

    let mut action_intent = string_field(&map, "action_intent")
        .map(|a| Action::parse(&a))
        .unwrap_or_default();

    let mut context_dependency = match string_field(&map, "context_dependency") {
        Some(d) if d.eq_ignore_ascii_case("high") => ContextDependency::High,
        Some(d) if d.eq_ignore_ascii_case("low") => ContextDependency::Low,
        _ if continuity.is_continuation => ContextDependency::High,
        _ => ContextDependency::Low,
    };

    let mut content_targets = map
        .get("content_targets")
        .and_then(Value::as_object)
        .map(targets_to_strings)
        .unwrap_or_default();

    if continuity.is_continuation {
        context_dependency = ContextDependency::High;
    }
    // An explicit intent from the model always wins over the carried one.
    if let Some(carried) = continuity.carried_action {
        if action_intent == Action::None {
            tracing::debug!(carried = %carried, "Keeping in-progress action for continuation turn");
            action_intent = carried;
        }
    }

    if let Some(ref email) = heuristics.email {
        content_targets
            .entry("email".to_string())
            .or_insert_with(|| email.clone());
    }
    if let Some(ref order) = heuristics.order_number {
        content_targets
            .entry("order_id".to_string())
            .or_insert_with(|| order.clone());
    }
    if let Some((action, ref text)) = heuristics.exact_text {
        content_targets.insert(Classification::EXACT_TEXT.to_string(), text.clone());
        if action_intent == Action::None {
            action_intent = action;
        }
    }

    Ok(Classification {
        content_type,
        category,
        sub_category,
        action_intent,
        context_dependency,
        content_targets,
    })
}

fn targets_to_strings(map: &Map<String, Value>) -> BTreeMap<String, String> {
    map.iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::Null => return None,
                Value::String(s) if s.trim().is_empty() => return None,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((key.clone(), text))
        })
        .collect()
}

fn truncate_for_error(reply: &str) -> String {
    reply.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::llm::testing::ScriptedCompletion;
    use crate::types::Turn;

    fn orders_context() -> ConversationContext {
        ConversationContext {
            turns: vec![
                Turn::user("can you show my orders"),
                Turn::assistant("Sure, what's the email on your account?", Action::GetOrders),
            ],
            last_answer: None,
        }
    }

    #[test]
    fn test_detects_email_and_order_numbers() {
        let h = Heuristics::detect("jane@example.com");
        assert_eq!(h.email.as_deref(), Some("jane@example.com"));
        assert!(h.short_reply);

        assert_eq!(
            Heuristics::detect("where is order #10425 please").order_number.as_deref(),
            Some("10425")
        );
        assert_eq!(
            Heuristics::detect("my order number is AB-1042").order_number.as_deref(),
            Some("AB-1042")
        );
        assert_eq!(Heuristics::detect("  58213 ").order_number.as_deref(), Some("58213"));
        assert!(Heuristics::detect("I want 2 scarves in blue and one hat").order_number.is_none());
        assert!(Heuristics::detect("I'd like to order 100 hats").order_number.is_none());
        assert!(Heuristics::detect("order 2000 more stickers").order_number.is_none());
        assert_eq!(
            Heuristics::detect("please cancel my order 1042").order_number.as_deref(),
            Some("1042")
        );
        assert_eq!(
            Heuristics::detect("order no. 5521 hasn't arrived").order_number.as_deref(),
            Some("5521")
        );
    }

    #[test]
    fn test_detects_highlight_and_scroll_targets() {
        let h = Heuristics::detect("highlight \"Free shipping on orders over $50\"");
        assert_eq!(
            h.exact_text,
            Some((Action::HighlightText, "Free shipping on orders over $50".to_string()))
        );

        let s = Heuristics::detect("Please scroll down to the reviews.");
        assert_eq!(s.exact_text, Some((Action::Scroll, "the reviews".to_string())));
    }

    #[test]
    fn test_ambiguity_needs_prior_context() {
        let h = Heuristics::detect("yes that one");
        assert!(h.ambiguous);
        let none = ContinuityState::evaluate(&h, &ConversationContext::default());
        assert!(!none.is_continuation);

        let some = ContinuityState::evaluate(&h, &orders_context());
        assert!(some.is_continuation);
        assert_eq!(some.carried_action, Some(Action::GetOrders));
    }

    #[tokio::test]
    async fn test_bare_email_continues_get_orders() {
        let completion = Arc::new(ScriptedCompletion::new([
            r#"{"type": "page", "category": "account", "sub_category": "email", "action_intent": "none", "context_dependency": "low"}"#,
        ]));
        let classifier = IntentClassifier::new(completion.clone());

        let classification = classifier
            .classify("jane@example.com", &orders_context(), None)
            .await
            .unwrap();

        assert_eq!(classification.action_intent, Action::GetOrders);
        assert_eq!(classification.context_dependency, ContextDependency::High);
        assert_eq!(
            classification.content_targets.get("email").map(String::as_str),
            Some("jane@example.com")
        );
        let prompts = completion.prompts.lock();
        assert!(prompts[0].1.contains("[CONTINUATION of previous action: get_orders]"));
    }

    #[test]
    fn test_explicit_intent_is_not_replaced_by_previous_action() {
        let h = Heuristics::detect("take me to winter jackets");
        let c = ContinuityState::evaluate(&h, &orders_context());
        assert_eq!(c.carried_action, Some(Action::GetOrders));

        let classification = parse_classification(
            r#"{"type": "collection", "category": "apparel", "sub_category": "jackets", "action_intent": "redirect"}"#,
            &h,
            &c,
        )
        .unwrap();
        assert_eq!(classification.action_intent, Action::Redirect);
        assert_eq!(classification.context_dependency, ContextDependency::High);

        let omitted = parse_classification(
            r#"{"type": "page", "category": "orders", "sub_category": "history"}"#,
            &h,
            &c,
        )
        .unwrap();
        assert_eq!(omitted.action_intent, Action::GetOrders);
    }

    #[test]
    fn test_defaults_for_omitted_fields() {
        let h = Heuristics::detect("Tell me about your winter jackets collection");
        let c = ContinuityState::evaluate(&h, &ConversationContext::default());
        let classification = parse_classification(
            r#"{"type": "collections", "category": "apparel", "sub_category": "jackets"}"#,
            &h,
            &c,
        )
        .unwrap();
        assert_eq!(classification.content_type, ContentType::Collection);
        assert_eq!(classification.action_intent, Action::None);
        assert_eq!(classification.context_dependency, ContextDependency::Low);
        assert!(classification.content_targets.is_empty());
    }

    #[test]
    fn test_missing_structure_is_an_error() {
        let h = Heuristics::default();
        let c = ContinuityState::evaluate(&h, &ConversationContext::default());
        assert_eq!(
            parse_classification("I think it's a product", &h, &c),
            Err(ClassificationError::Malformed("I think it's a product".into()))
        );
        assert_eq!(
            parse_classification(r#"{"category": "x", "sub_category": "y"}"#, &h, &c),
            Err(ClassificationError::MissingField("type"))
        );
        assert_eq!(
            parse_classification(r#"{"type": "recipe", "category": "x", "sub_category": "y"}"#, &h, &c),
            Err(ClassificationError::InvalidType("recipe".into()))
        );
        assert_eq!(
            parse_classification(r#"{"type": "page", "category": "x"}"#, &h, &c),
            Err(ClassificationError::MissingField("sub_category"))
        );
    }

    #[test]
    fn test_exact_text_survives_classification() {
        let h = Heuristics::detect("highlight the words Free returns within 30 days");
        let c = ContinuityState::evaluate(&h, &ConversationContext::default());
        let classification = parse_classification(
            r#"{"type": "page", "category": "policy", "sub_category": "returns", "content_targets": {"exact_text": "Free returns"}}"#,
            &h,
            &c,
        )
        .unwrap();
        assert_eq!(classification.action_intent, Action::HighlightText);
        assert_eq!(classification.exact_text(), Some("Free returns within 30 days"));
    }

    #[tokio::test]
    async fn test_completion_failure_is_a_service_error() {
        let completion = Arc::new(ScriptedCompletion::failing(ServiceError::unavailable(
            "completion",
            "connection refused",
        )));
        let classifier = IntentClassifier::new(completion);
        let err = classifier
            .classify("do you sell hats", &ConversationContext::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifyError::Service(ref e) if e.is_unavailable()));
    }
}

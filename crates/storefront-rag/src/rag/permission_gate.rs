//! Action permission gate.
//!
//! A pure check of an action against the site's permission flags. Denials are
//! driven by a static table so the policy can be read and tested on its own.

use regex::Regex;
use std::sync::LazyLock;

use crate::types::{
    Action, ActionContext, Classification, ContextDependency, ConversationContext, DenialKind,
    PermissionSet, ResolvedAction,
};

/// Return, exchange and refund requests always go to a human.
static RETURN_KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:return|returns|returning|returned|exchange|exchanges|exchanging|refund|refunds|refunded)\b")
        .expect("return keyword regex is valid")
});

struct DenialRule {
    action: Action,
    kind: DenialKind,
    message: &'static str,
}

const DENIAL_TABLE: &[DenialRule] = &[
    DenialRule {
        action: Action::CancelOrder,
        kind: DenialKind::HardDisabled,
        message: "I can't cancel orders automatically on this store, but our support team can. I've opened the contact form with your request filled in.",
    },
    DenialRule {
        action: Action::ReturnOrder,
        kind: DenialKind::HardDisabled,
        message: "I can't start returns automatically on this store, but our support team can. I've opened the contact form with your request filled in.",
    },
    DenialRule {
        action: Action::ExchangeOrder,
        kind: DenialKind::HardDisabled,
        message: "I can't arrange exchanges automatically on this store, but our support team can. I've opened the contact form with your request filled in.",
    },
    DenialRule {
        action: Action::GenerateImage,
        kind: DenialKind::ComingSoon,
        message: "Image generation is coming soon. In the meantime I'm happy to help you find products or answer questions.",
    },
    DenialRule {
        action: Action::Login,
        kind: DenialKind::SoftUnsupported,
        message: "Sorry, I can't sign you in from here. You can use the account link at the top of the page, or ask me something else.",
    },
    DenialRule {
        action: Action::Logout,
        kind: DenialKind::SoftUnsupported,
        message: "Sorry, I can't sign you out from here. You can use the account menu at the top of the page, or ask me something else.",
    },
    DenialRule {
        action: Action::TrackOrder,
        kind: DenialKind::SoftUnsupported,
        message: "Sorry, I can't track orders on this store yet. Your shipping confirmation email has a tracking link, or I can help with something else.",
    },
    DenialRule {
        action: Action::GetOrders,
        kind: DenialKind::SoftUnsupported,
        message: "Sorry, I can't look up orders on this store yet. You can find them in your account, or I can help with something else.",
    },
    DenialRule {
        action: Action::AccountManagement,
        kind: DenialKind::SoftUnsupported,
        message: "Sorry, I can't change account settings from here. You can manage them on your account page, or ask me something else.",
    },
    DenialRule {
        action: Action::FillForm,
        kind: DenialKind::SoftUnsupported,
        message: "Sorry, I can't fill in forms for you on this store. I can walk you through it instead.",
    },
    DenialRule {
        action: Action::AddToCart,
        kind: DenialKind::SoftUnsupported,
        message: "Sorry, I can't add items to your cart here. Use the Add to cart button on the product page, or ask me something else.",
    },
    DenialRule {
        action: Action::Checkout,
        kind: DenialKind::SoftUnsupported,
        message: "Sorry, I can't start checkout for you. Open your cart to check out, or ask me something else.",
    },
];

const KEYWORD_OVERRIDE_MESSAGE: &str = "Return, exchange and refund requests are handled by our support team. I've opened the contact form so you can send them the details.";

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Allowed,
    Denied {
        action: Action,
        kind: DenialKind,
        response: ResolvedAction,
    },
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn into_response(self) -> Option<ResolvedAction> {
        match self {
            Self::Allowed => None,
            Self::Denied { response, .. } => Some(response),
        }
    }
}

/// Check a single action against the site flags.
pub fn check_action(
    action: Action,
    permissions: &PermissionSet,
    classification: Option<&Classification>,
) -> GateDecision {
    if permissions.permits(action) {
        return GateDecision::Allowed;
    }
    let Some(rule) = DENIAL_TABLE.iter().find(|rule| rule.action == action) else {
        return GateDecision::Allowed;
    };

    tracing::info!(action = %action, kind = ?rule.kind, "Action denied by site permissions");
    GateDecision::Denied {
        action,
        kind: rule.kind,
        response: denial_response(rule, classification),
    }
}

/// Check the classified intent and, for context-dependent turns, the action
/// carried over from the previous turn.
pub fn check_turn(
    classification: &Classification,
    context: &ConversationContext,
    permissions: &PermissionSet,
) -> GateDecision {
    let decision = check_action(classification.action_intent, permissions, Some(classification));
    if !decision.is_allowed() {
        return decision;
    }
    if classification.context_dependency == ContextDependency::High {
        if let Some(previous) = context.previous_action() {
            return check_action(previous, permissions, Some(classification));
        }
    }
    GateDecision::Allowed
}

/// Return/exchange/refund wording in the raw utterance short-circuits the turn
/// to a contact hand-off, before classification and regardless of flags.
pub fn keyword_override(utterance: &str) -> Option<ResolvedAction> {
    let keyword = RETURN_KEYWORD_RE.find(utterance)?;
    tracing::info!(keyword = keyword.as_str(), "Return keyword override, routing to contact");
    Some(ResolvedAction {
        action: Action::Contact,
        answer: KEYWORD_OVERRIDE_MESSAGE.to_string(),
        url: None,
        scroll_text: None,
        action_context: ActionContext {
            contact_help_form: true,
            prefilled_message: Some(utterance.trim().to_string()),
            ..Default::default()
        },
    })
}

fn denial_response(rule: &DenialRule, classification: Option<&Classification>) -> ResolvedAction {
    match rule.kind {
        DenialKind::HardDisabled => {
            let order_id = classification
                .and_then(|c| c.content_targets.get("order_id"))
                .cloned();
            ResolvedAction {
                action: Action::Contact,
                answer: rule.message.to_string(),
                url: None,
                scroll_text: None,
                action_context: ActionContext {
                    contact_help_form: true,
                    prefilled_message: Some(prefilled_message(rule.action, order_id.as_deref())),
                    denial: Some(rule.kind),
                    order_id,
                    ..Default::default()
                },
            }
        }
        DenialKind::SoftUnsupported | DenialKind::ComingSoon => {
            let mut response = ResolvedAction::none(rule.message);
            response.action_context.denial = Some(rule.kind);
            response
        }
    }
}

fn prefilled_message(action: Action, order_id: Option<&str>) -> String {
    let request = match action {
        Action::CancelOrder => "cancel my order",
        Action::ReturnOrder => "return my order",
        Action::ExchangeOrder => "exchange an item from my order",
        _ => "get help with my order",
    };
    match order_id {
        Some(id) => format!("Hi, I would like to {} (order {}).", request, id),
        None => format!("Hi, I would like to {}.", request),
    }
}

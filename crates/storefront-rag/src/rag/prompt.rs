//! Prompt assembly for the answer-generation call.

use crate::rag::retrieval::RetrievalOutcome;
use crate::types::{
    Action, AssistRequest, Classification, RankedCandidate, Role, SiteConfig, TurnType,
};

const VISIBLE_TEXT_CHARS: usize = 1500;
const CANDIDATE_TEXT_CHARS: usize = 400;

/// Actions the model may propose when the site enables them.
const GATED_ACTIONS: &[Action] = &[
    Action::Redirect,
    Action::Scroll,
    Action::HighlightText,
    Action::GetOrders,
    Action::TrackOrder,
    Action::CancelOrder,
    Action::ReturnOrder,
    Action::ExchangeOrder,
    Action::FillForm,
    Action::Login,
    Action::Logout,
    Action::AccountManagement,
    Action::GenerateImage,
    Action::AddToCart,
    Action::Checkout,
];

/// Build the (system, user) prompt pair for one turn.
pub fn build_prompts(
    request: &AssistRequest,
    classification: &Classification,
    retrieval: &RetrievalOutcome,
    site: &SiteConfig,
) -> (String, String) {
    (
        build_system_prompt(site, request.turn_type),
        build_user_prompt(request, classification, retrieval),
    )
}

pub fn build_system_prompt(site: &SiteConfig, turn_type: TurnType) -> String {
    let mut prompt = String::new();

    let store = if site.store_name.trim().is_empty() {
        "this online store"
    } else {
        site.store_name.trim()
    };
    prompt.push_str("# WHO YOU ARE\n");
    prompt.push_str(&format!("You are the shopping assistant for {}.\n", store));
    prompt.push_str("Answer only from the store content provided. If you don't know, say so.\n\n");

    if let Some(instructions) = site.custom_instructions.as_deref().filter(|s| !s.trim().is_empty()) {
        prompt.push_str("# STORE INSTRUCTIONS\n");
        prompt.push_str(instructions.trim());
        prompt.push_str("\n\n");
    }

    prompt.push_str("# ACTIONS YOU MAY USE\n");
    prompt.push_str("- none: just answer\n");
    prompt.push_str("- contact: open the support contact form\n");
    for action in GATED_ACTIONS {
        if site.permissions.permits(*action) {
            prompt.push_str(&format!("- {}\n", action));
        }
    }
    prompt.push_str("Never propose an action that is not listed.\n\n");

    prompt.push_str("# REPLY FORMAT\n");
    prompt.push_str("Reply with ONLY a JSON object:\n");
    prompt.push_str("{\"action\": \"<action>\", \"answer\": \"<text for the shopper>\", \"url\": \"<path for redirect or null>\", \"scroll_text\": \"<page text for scroll/highlight or null>\", \"action_context\": {}}\n");
    prompt.push_str("For redirects use store paths such as /products/<handle>, /collections/<handle>, /pages/<handle> or /blogs/<blog>/<handle>, taken from the content below.\n");

    if turn_type == TurnType::Voice {
        prompt.push_str("\nThe shopper is speaking. Keep the answer to one or two short sentences that read well aloud, without lists or links.\n");
    }

    prompt
}

pub fn build_user_prompt(
    request: &AssistRequest,
    classification: &Classification,
    retrieval: &RetrievalOutcome,
) -> String {
    let mut prompt = String::new();

    prompt.push_str("# CLASSIFICATION\n");
    prompt.push_str(&format!(
        "type: {}, category: {}, sub_category: {}, intent: {}\n\n",
        classification.content_type,
        classification.category,
        classification.sub_category,
        classification.action_intent
    ));

    let page_url = request
        .page_snapshot
        .as_ref()
        .and_then(|p| p.url.as_deref())
        .or(request.current_page_url.as_deref());
    if page_url.is_some() || request.page_snapshot.is_some() {
        prompt.push_str("# CURRENT PAGE\n");
        if let Some(url) = page_url {
            prompt.push_str(&format!("URL: {}\n", url));
        }
        if let Some(ref page) = request.page_snapshot {
            if let Some(ref title) = page.title {
                prompt.push_str(&format!("Title: {}\n", title));
            }
            if !page.headings.is_empty() {
                prompt.push_str(&format!("Headings: {}\n", page.headings.join(" | ")));
            }
            if !page.buttons.is_empty() {
                prompt.push_str(&format!("Buttons: {}\n", page.buttons.join(" | ")));
            }
            for form in &page.forms {
                prompt.push_str(&format!("Form {}: {}\n", form.name, form.fields.join(", ")));
            }
            let visible = truncate_chars(&page.visible_text, VISIBLE_TEXT_CHARS);
            if !visible.is_empty() {
                prompt.push_str(&format!("Visible text: {}\n", visible));
            }
        }
        prompt.push('\n');
    }

    let turns = request.conversation_context.window();
    if !turns.is_empty() {
        prompt.push_str("# CONVERSATION\n");
        for turn in turns {
            let role = match turn.role {
                Role::User => "Shopper",
                Role::Assistant => "Assistant",
            };
            prompt.push_str(&format!("{}: {}\n", role, turn.content));
        }
        prompt.push('\n');
    }

    prompt.push_str("# STORE CONTENT\n");
    if retrieval.main_results.is_empty() {
        prompt.push_str("(no matching content)\n");
    }
    for result in &retrieval.main_results {
        prompt.push_str(&describe_candidate(result));
    }
    prompt.push('\n');

    if !retrieval.qa_results.is_empty() {
        prompt.push_str("# SIMILAR QUESTIONS\n");
        for result in &retrieval.qa_results {
            prompt.push_str(&format!(
                "Q: {}\nA: {}\n",
                result.record.title,
                truncate_chars(&result.record.text, CANDIDATE_TEXT_CHARS)
            ));
        }
        prompt.push('\n');
    }

    prompt.push_str("# SHOPPER MESSAGE\n");
    prompt.push_str(request.utterance.trim());
    prompt.push('\n');
    prompt
}

fn describe_candidate(result: &RankedCandidate) -> String {
    let record = &result.record;
    let kind = record
        .content_type
        .or_else(|| record.kind.content_type())
        .map(|t| t.as_str())
        .unwrap_or("item");
    let path = record
        .url_path()
        .map(|p| format!(" ({})", p))
        .unwrap_or_default();
    format!(
        "- [{}] {}{}: {}\n",
        kind,
        record.title,
        path,
        truncate_chars(&record.text, CANDIDATE_TEXT_CHARS)
    )
}

fn truncate_chars(text: &str, max: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max {
        collapsed
    } else {
        let mut cut: String = collapsed.chars().take(max).collect();
        cut.push_str("...");
        cut
    }
}

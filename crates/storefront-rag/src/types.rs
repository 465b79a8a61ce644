use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

/// Upper bound on prior turns the pipeline looks at.
pub const MAX_CONTEXT_TURNS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Product,
    Collection,
    Post,
    Page,
    Discount,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Collection => "collection",
            Self::Post => "post",
            Self::Page => "page",
            Self::Discount => "discount",
        }
    }

    /// Lenient parse used on model output ("products", "Blog" ...).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "product" | "products" => Some(Self::Product),
            "collection" | "collections" => Some(Self::Collection),
            "post" | "posts" | "blog" | "article" | "articles" => Some(Self::Post),
            "page" | "pages" => Some(Self::Page),
            "discount" | "discounts" => Some(Self::Discount),
            _ => None,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextDependency {
    High,
    #[default]
    Low,
}

/// Actions the assistant can take on the storefront.
///
/// Deserializes leniently: unknown names collapse to `Action::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    #[default]
    None,
    Redirect,
    Scroll,
    HighlightText,
    Contact,
    GetOrders,
    TrackOrder,
    CancelOrder,
    ReturnOrder,
    ExchangeOrder,
    FillForm,
    Login,
    Logout,
    AccountManagement,
    GenerateImage,
    AddToCart,
    Checkout,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Redirect => "redirect",
            Self::Scroll => "scroll",
            Self::HighlightText => "highlight_text",
            Self::Contact => "contact",
            Self::GetOrders => "get_orders",
            Self::TrackOrder => "track_order",
            Self::CancelOrder => "cancel_order",
            Self::ReturnOrder => "return_order",
            Self::ExchangeOrder => "exchange_order",
            Self::FillForm => "fill_form",
            Self::Login => "login",
            Self::Logout => "logout",
            Self::AccountManagement => "account_management",
            Self::GenerateImage => "generate_image",
            Self::AddToCart => "add_to_cart",
            Self::Checkout => "checkout",
        }
    }

    pub fn parse(value: &str) -> Self {
        let normalized = value.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "" | "none" | "null" | "no_action" => Self::None,
            "redirect" | "navigate" | "navigation" => Self::Redirect,
            "scroll" | "scroll_to" => Self::Scroll,
            "highlight_text" | "highlight" => Self::HighlightText,
            "contact" | "contact_support" | "support" => Self::Contact,
            "get_orders" | "list_orders" | "orders" => Self::GetOrders,
            "track_order" | "order_status" | "track" => Self::TrackOrder,
            "cancel_order" | "cancel" => Self::CancelOrder,
            "return_order" | "return" | "refund" => Self::ReturnOrder,
            "exchange_order" | "exchange" => Self::ExchangeOrder,
            "fill_form" | "form" => Self::FillForm,
            "login" | "log_in" | "sign_in" => Self::Login,
            "logout" | "log_out" | "sign_out" => Self::Logout,
            "account_management" | "account" => Self::AccountManagement,
            "generate_image" | "image_generation" => Self::GenerateImage,
            "add_to_cart" => Self::AddToCart,
            "checkout" => Self::Checkout,
            other => {
                tracing::debug!(action = other, "Unknown action name, treating as none");
                Self::None
            }
        }
    }

    /// Actions that span several turns while the user supplies details.
    pub fn is_continuable(&self) -> bool {
        matches!(
            self,
            Self::GetOrders
                | Self::TrackOrder
                | Self::ReturnOrder
                | Self::CancelOrder
                | Self::ExchangeOrder
                | Self::FillForm
        )
    }

    /// Site flag that authorizes this action, if any.
    pub fn permission_flag(&self) -> Option<PermissionFlag> {
        match self {
            Self::None | Self::Contact => None,
            Self::Redirect => Some(PermissionFlag::Redirect),
            Self::Scroll => Some(PermissionFlag::Scroll),
            Self::HighlightText => Some(PermissionFlag::Highlight),
            Self::GetOrders => Some(PermissionFlag::GetOrders),
            Self::TrackOrder => Some(PermissionFlag::TrackOrder),
            Self::CancelOrder => Some(PermissionFlag::Cancel),
            Self::ReturnOrder => Some(PermissionFlag::Return),
            Self::ExchangeOrder => Some(PermissionFlag::Exchange),
            Self::FillForm => Some(PermissionFlag::FillForm),
            Self::Login => Some(PermissionFlag::Login),
            Self::Logout => Some(PermissionFlag::Logout),
            Self::AccountManagement => Some(PermissionFlag::AccountManagement),
            Self::GenerateImage => Some(PermissionFlag::GenerateImage),
            Self::AddToCart => Some(PermissionFlag::AddToCart),
            Self::Checkout => Some(PermissionFlag::Checkout),
        }
    }
}

impl From<String> for Action {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<Action> for String {
    fn from(value: Action) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-turn classification of the user's utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub category: String,
    pub sub_category: String,
    pub action_intent: Action,
    pub context_dependency: ContextDependency,
    /// Extracted slot values (order id, button text, exact highlight text ...).
    #[serde(default)]
    pub content_targets: BTreeMap<String, String>,
}

impl Classification {
    pub const EXACT_TEXT: &'static str = "exact_text";

    /// Text the user explicitly asked to highlight or scroll to.
    pub fn exact_text(&self) -> Option<&str> {
        self.content_targets
            .get(Self::EXACT_TEXT)
            .map(|s| s.as_str())
            .filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_action: Option<Action>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            recorded_action: None,
        }
    }

    pub fn assistant(content: impl Into<String>, action: Action) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            recorded_action: Some(action),
        }
    }
}

/// Read-only window over the caller's stored conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationContext {
    #[serde(default)]
    pub turns: Vec<Turn>,
    /// Summary of the most recent assistant answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_answer: Option<String>,
}

impl ConversationContext {
    /// The last `MAX_CONTEXT_TURNS` turns, oldest first.
    pub fn window(&self) -> &[Turn] {
        let start = self.turns.len().saturating_sub(MAX_CONTEXT_TURNS);
        &self.turns[start..]
    }

    pub fn recent(&self, n: usize) -> &[Turn] {
        let window = self.window();
        &window[window.len().saturating_sub(n)..]
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty() && self.last_answer.is_none()
    }

    /// Action recorded on the most recent assistant turn, if it was a real action.
    pub fn previous_action(&self) -> Option<Action> {
        self.window()
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant)
            .and_then(|t| t.recorded_action)
            .filter(|a| *a != Action::None)
    }

    /// The answer summary, falling back to the last assistant turn.
    pub fn last_answer_text(&self) -> Option<&str> {
        self.last_answer.as_deref().or_else(|| {
            self.window()
                .iter()
                .rev()
                .find(|t| t.role == Role::Assistant)
                .map(|t| t.content.as_str())
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormSnapshot {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Structured capture of the page the shopper is looking at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub visible_text: String,
    #[serde(default)]
    pub headings: Vec<String>,
    #[serde(default)]
    pub buttons: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub forms: Vec<FormSnapshot>,
}

/// Index/value pairs over the hashed lexical vocabulary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    /// One-term placeholder used when lexical statistics are unavailable.
    pub fn degenerate() -> Self {
        Self {
            indices: vec![0],
            values: vec![1.0],
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.indices == [0] && self.values == [1.0]
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Sum of products over shared indices. Indices need not be sorted.
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        let lookup: HashMap<u32, f32> = small
            .indices
            .iter()
            .copied()
            .zip(small.values.iter().copied())
            .collect();
        large
            .indices
            .iter()
            .zip(&large.values)
            .filter_map(|(idx, value)| lookup.get(idx).map(|w| w * value))
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Product,
    Collection,
    Post,
    Page,
    Discount,
    Qa,
}

impl RecordKind {
    pub fn content_type(&self) -> Option<ContentType> {
        match self {
            Self::Product => Some(ContentType::Product),
            Self::Collection => Some(ContentType::Collection),
            Self::Post => Some(ContentType::Post),
            Self::Page => Some(ContentType::Page),
            Self::Discount => Some(ContentType::Discount),
            Self::Qa => None,
        }
    }
}

impl From<ContentType> for RecordKind {
    fn from(value: ContentType) -> Self {
        match value {
            ContentType::Product => Self::Product,
            ContentType::Collection => Self::Collection,
            ContentType::Post => Self::Post,
            ContentType::Page => Self::Page,
            ContentType::Discount => Self::Discount,
        }
    }
}

/// One retrievable unit returned by the vector index for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: String,
    pub kind: RecordKind,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub blog_handle: Option<String>,
    /// Classification metadata stored alongside the record.
    #[serde(default)]
    pub content_type: Option<ContentType>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub sub_category: Option<String>,
    pub score: f32,
    #[serde(default)]
    pub dense_score: f32,
    #[serde(default)]
    pub sparse_score: f32,
}

impl CandidateRecord {
    /// Stable key used to de-duplicate result sets.
    pub fn dedup_key(&self) -> &str {
        self.handle
            .as_deref()
            .filter(|h| !h.is_empty())
            .unwrap_or(&self.id)
    }

    /// Canonical storefront path for this record, when it has one.
    pub fn url_path(&self) -> Option<String> {
        let handle = self.handle.as_deref().filter(|h| !h.is_empty())?;
        match self.kind {
            RecordKind::Product => Some(format!("/products/{}", handle)),
            RecordKind::Collection => Some(format!("/collections/{}", handle)),
            RecordKind::Page => Some(format!("/pages/{}", handle)),
            RecordKind::Post => self
                .blog_handle
                .as_deref()
                .map(|blog| format!("/blogs/{}/{}", blog, handle)),
            RecordKind::Discount | RecordKind::Qa => None,
        }
    }
}

/// A candidate after lane reranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub record: CandidateRecord,
    pub rerank_score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MetadataFilter {
    pub content_type: Option<ContentType>,
    pub category: Option<String>,
}

impl MetadataFilter {
    pub fn matches(&self, record: &CandidateRecord) -> bool {
        if let Some(ct) = self.content_type {
            if record.content_type != Some(ct) && record.kind.content_type() != Some(ct) {
                return false;
            }
        }
        if let Some(ref category) = self.category {
            match record.category {
                Some(ref c) if c.eq_ignore_ascii_case(category) => {}
                _ => return false,
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionFlag {
    Cancel,
    Return,
    Exchange,
    Redirect,
    Scroll,
    Highlight,
    GetOrders,
    TrackOrder,
    Login,
    Logout,
    AccountManagement,
    FillForm,
    GenerateImage,
    AddToCart,
    Checkout,
}

/// Per-site switches authorizing automated actions. Everything is off by default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PermissionSet {
    pub allow_auto_cancel: bool,
    pub allow_auto_return: bool,
    pub allow_auto_exchange: bool,
    pub allow_auto_redirect: bool,
    pub allow_auto_scroll: bool,
    pub allow_auto_highlight: bool,
    pub allow_auto_get_orders: bool,
    pub allow_auto_track_order: bool,
    pub allow_auto_login: bool,
    pub allow_auto_logout: bool,
    pub allow_auto_account_management: bool,
    pub allow_auto_fill_form: bool,
    pub allow_auto_generate_image: bool,
    pub allow_auto_add_to_cart: bool,
    pub allow_auto_checkout: bool,
}

impl PermissionSet {
    pub fn all_enabled() -> Self {
        Self {
            allow_auto_cancel: true,
            allow_auto_return: true,
            allow_auto_exchange: true,
            allow_auto_redirect: true,
            allow_auto_scroll: true,
            allow_auto_highlight: true,
            allow_auto_get_orders: true,
            allow_auto_track_order: true,
            allow_auto_login: true,
            allow_auto_logout: true,
            allow_auto_account_management: true,
            allow_auto_fill_form: true,
            allow_auto_generate_image: true,
            allow_auto_add_to_cart: true,
            allow_auto_checkout: true,
        }
    }

    pub fn allows(&self, flag: PermissionFlag) -> bool {
        match flag {
            PermissionFlag::Cancel => self.allow_auto_cancel,
            PermissionFlag::Return => self.allow_auto_return,
            PermissionFlag::Exchange => self.allow_auto_exchange,
            PermissionFlag::Redirect => self.allow_auto_redirect,
            PermissionFlag::Scroll => self.allow_auto_scroll,
            PermissionFlag::Highlight => self.allow_auto_highlight,
            PermissionFlag::GetOrders => self.allow_auto_get_orders,
            PermissionFlag::TrackOrder => self.allow_auto_track_order,
            PermissionFlag::Login => self.allow_auto_login,
            PermissionFlag::Logout => self.allow_auto_logout,
            PermissionFlag::AccountManagement => self.allow_auto_account_management,
            PermissionFlag::FillForm => self.allow_auto_fill_form,
            PermissionFlag::GenerateImage => self.allow_auto_generate_image,
            PermissionFlag::AddToCart => self.allow_auto_add_to_cart,
            PermissionFlag::Checkout => self.allow_auto_checkout,
        }
    }

    /// Whether `action` may be performed on this site. Unflagged actions always pass.
    pub fn permits(&self, action: Action) -> bool {
        action.permission_flag().map_or(true, |flag| self.allows(flag))
    }
}

/// Site configuration read from the store for one turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    #[serde(default)]
    pub store_name: String,
    #[serde(default)]
    pub permissions: PermissionSet,
    #[serde(default)]
    pub custom_instructions: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    HardDisabled,
    SoftUnsupported,
    ComingSoon,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionContext {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub contact_help_form: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefilled_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial: Option<DenialKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact_text: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// The decided outcome of a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAction {
    pub action: Action,
    pub answer: String,
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_text: Option<String>,
    #[serde(default)]
    pub action_context: ActionContext,
}

impl ResolvedAction {
    pub fn none(answer: impl Into<String>) -> Self {
        Self {
            action: Action::None,
            answer: answer.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnType {
    #[default]
    Text,
    Voice,
}

/// Inbound request from the serving layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistRequest {
    pub utterance: String,
    pub site_id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub turn_type: TurnType,
    #[serde(default)]
    pub conversation_context: ConversationContext,
    #[serde(default)]
    pub current_page_url: Option<String>,
    #[serde(default)]
    pub page_snapshot: Option<PageSnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalDiagnostics {
    pub main_results: Vec<RankedCandidate>,
    pub qa_results: Vec<RankedCandidate>,
    pub classification: Option<Classification>,
}

/// Outbound result handed back to the serving layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistResponse {
    pub turn_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub action: Action,
    pub answer: String,
    pub category: Option<String>,
    pub sub_category: Option<String>,
    pub page_reference: Option<String>,
    pub scroll_text: Option<String>,
    #[serde(rename = "type")]
    pub content_type: Option<ContentType>,
    pub url: Option<String>,
    pub action_context: ActionContext,
    pub diagnostics: RetrievalDiagnostics,
}

impl AssistResponse {
    pub fn from_resolved(
        resolved: ResolvedAction,
        page_reference: Option<String>,
        diagnostics: RetrievalDiagnostics,
    ) -> Self {
        let classification = diagnostics.classification.as_ref();
        Self {
            turn_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            action: resolved.action,
            answer: resolved.answer,
            category: classification.map(|c| c.category.clone()),
            sub_category: classification.map(|c| c.sub_category.clone()),
            page_reference,
            scroll_text: resolved.scroll_text,
            content_type: classification.map(|c| c.content_type),
            url: resolved.url,
            action_context: resolved.action_context,
            diagnostics,
        }
    }
}

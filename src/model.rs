//! Wire model and host-supplied context.
//!
//! Field names and nesting are a cross-platform contract: the Android
//! client sends the same JSON. Values the client cannot measure are sent as
//! explicit `null`, never omitted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One tracked action as posted to the ingestion API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub distributor: String,
    pub url: String,
    /// Fresh per envelope, except time-spent updates which reuse the visit's id.
    pub event_id: Uuid,
    /// Drawn from the shared install-wide counter at build time.
    pub sequence_number: u64,
    /// `YYYY-MM-DDTHH:mm:ss.sssZ`
    pub event_timestamp: String,
    pub event_type: EventType,
    pub event_data: EventData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Pageview,
    Click,
    Heatmap,
    Churnpoint,
    Timespent,
}

impl EventType {
    /// Whether emitting this event counts as a session touch.
    ///
    /// Background flushes and time-spent patches reuse the existing session
    /// metadata instead of inflating the visit count.
    pub fn touches_session(self) -> bool {
        matches!(self, EventType::Pageview | EventType::Click)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Pageview => "pageview",
            EventType::Click => "click",
            EventType::Heatmap => "heatmap",
            EventType::Churnpoint => "churnpoint",
            EventType::Timespent => "timespent",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Event data
// ---------------------------------------------------------------------------

/// Type-specific payload. The first five blocks are always present; the
/// optional blocks appear only for the event types that carry them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    pub session_metadata: SessionMetadata,
    pub performance_timing: PerformanceTiming,
    pub network_state: NetworkState,
    pub page: PageInfo,
    pub user: UserInfo,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benefit: Option<Benefit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ClickMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<ElementInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heatmap: Option<Vec<HeatmapPoint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_spent: Option<TimeSpentInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub session_id: String,
    pub first_touch_at: String,
    pub last_touch_at: String,
    pub total_visits: u64,
    /// Only set on time-spent events.
    pub total_time_spent: Option<u64>,
}

/// Browser timing APIs have no mobile equivalent; always null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceTiming {
    pub page_load_time: Option<f64>,
    pub dom_content_loaded: Option<f64>,
    pub first_paint: Option<f64>,
    pub first_contentful_paint: Option<f64>,
}

/// Network-quality APIs are unavailable on the client; always null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkState {
    pub effective_type: Option<String>,
    pub downlink: Option<f64>,
    pub rtt: Option<f64>,
    pub save_data: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// URL bytes, standard base64, `=` padding stripped.
    pub page_id: String,
    pub url: String,
    pub title: String,
    pub referrer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub user_id: Option<String>,
    pub user_agent: String,
    pub platform: String,
    pub os_version: String,
    pub app_version: String,
    pub language: String,
    pub timezone: String,
    pub screen: Size,
    pub viewport: Size,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Benefit {
    #[serde(rename = "benefitId")]
    pub id: String,
    #[serde(rename = "benefitName")]
    pub name: String,
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickMetadata {
    pub timestamp: String,
    pub viewport: Size,
    /// Page coordinates are a browser concept; both sides are always null.
    pub coordinates: Coordinates,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: Option<i32>,
    pub y: Option<i32>,
}

/// The tapped UI element, described in DOM terms for parity with web.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementInfo {
    pub tag_name: String,
    pub id: String,
    pub classes: Vec<String>,
    pub text: String,
    pub data_attributes: BTreeMap<String, String>,
    pub bounding_rect: Option<Rect>,
}

impl ElementInfo {
    pub fn new(tag_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            tag_name: tag_name.into(),
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data_attributes.insert(key.into(), value.into());
        self
    }

    pub fn bounding_rect(mut self, rect: Rect) -> Self {
        self.bounding_rect = Some(rect);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

// ---------------------------------------------------------------------------
// Heatmap
// ---------------------------------------------------------------------------

/// One pointer sample. Immutable once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeatmapPoint {
    #[serde(rename = "type")]
    pub kind: PointKind,
    pub x: i32,
    pub y: i32,
    /// Epoch milliseconds.
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointKind {
    Click,
    Move,
}

// ---------------------------------------------------------------------------
// Time spent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSpentInfo {
    pub start_time: String,
    pub end_time: String,
    pub duration_seconds: u64,
    pub reason: UpdateReason,
}

/// Why a time-spent update was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateReason {
    Periodic,
    Exit,
    Navigate,
    Background,
}

impl std::fmt::Display for UpdateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UpdateReason::Periodic => "periodic",
            UpdateReason::Exit => "exit",
            UpdateReason::Navigate => "navigate",
            UpdateReason::Background => "background",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Host context
// ---------------------------------------------------------------------------

/// The page the user is looking at, as reported by the host UI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageContext {
    pub url: String,
    pub title: String,
    pub referrer: Option<String>,
    /// Set for benefit detail pages.
    pub benefit: Option<Benefit>,
}

impl PageContext {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            referrer: None,
            benefit: None,
        }
    }

    pub fn with_benefit(mut self, benefit: Benefit) -> Self {
        self.benefit = Some(benefit);
        self
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    /// Stable identity used to correlate time-spent updates for one subject.
    pub fn subject_key(&self) -> String {
        match &self.benefit {
            Some(benefit) => format!("benefit:{}", benefit.id),
            None => format!("page:{}", self.url),
        }
    }
}

/// Device and user facts collected once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceContext {
    pub user_id: Option<String>,
    pub user_agent: String,
    pub platform: String,
    pub os_version: String,
    pub app_version: String,
    pub language: String,
    pub timezone: String,
    pub screen: Size,
    pub viewport: Size,
}

impl Default for DeviceContext {
    fn default() -> Self {
        Self {
            user_id: None,
            user_agent: concat!("dist-tracker/", env!("CARGO_PKG_VERSION")).to_string(),
            platform: std::env::consts::OS.to_string(),
            os_version: String::new(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            language: "en".to_string(),
            timezone: "UTC".to_string(),
            screen: Size::default(),
            viewport: Size::default(),
        }
    }
}

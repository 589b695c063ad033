//! Envelope construction.
//!
//! Pure mapping from stamp, session snapshot, page/device context and the
//! type-specific detail into the wire envelope. No I/O, no clock reads.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::*;
use crate::session::SessionSnapshot;

/// Identity and ordering fields stamped onto every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    pub event_id: Uuid,
    pub sequence_number: u64,
    pub timestamp: DateTime<Utc>,
}

/// What happened, with the data only that event type carries.
#[derive(Debug, Clone, PartialEq)]
pub enum EventDetail {
    Pageview,
    Click {
        element: ElementInfo,
    },
    Heatmap {
        points: Vec<HeatmapPoint>,
    },
    Churnpoint,
    Timespent {
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        seconds: u64,
        reason: UpdateReason,
    },
}

impl EventDetail {
    pub fn event_type(&self) -> EventType {
        match self {
            EventDetail::Pageview => EventType::Pageview,
            EventDetail::Click { .. } => EventType::Click,
            EventDetail::Heatmap { .. } => EventType::Heatmap,
            EventDetail::Churnpoint => EventType::Churnpoint,
            EventDetail::Timespent { .. } => EventType::Timespent,
        }
    }
}

/// Builds envelopes for one distributor and device.
#[derive(Debug, Clone)]
pub struct EventPayloadBuilder {
    distributor: String,
    device: DeviceContext,
}

impl EventPayloadBuilder {
    pub fn new(distributor: impl Into<String>, device: DeviceContext) -> Self {
        Self {
            distributor: distributor.into(),
            device,
        }
    }

    pub fn device(&self) -> &DeviceContext {
        &self.device
    }

    pub fn build(
        &self,
        stamp: Stamp,
        session: &SessionSnapshot,
        page: &PageContext,
        detail: EventDetail,
    ) -> EventEnvelope {
        let event_type = detail.event_type();
        let mut data = EventData {
            session_metadata: SessionMetadata {
                session_id: session.session_id.clone(),
                first_touch_at: format_timestamp(session.first_touch_at),
                last_touch_at: format_timestamp(session.last_touch_at),
                total_visits: session.total_visits,
                total_time_spent: None,
            },
            performance_timing: PerformanceTiming::default(),
            network_state: NetworkState::default(),
            page: PageInfo {
                page_id: page_id(&page.url),
                url: page.url.clone(),
                title: page.title.clone(),
                referrer: page.referrer.clone(),
            },
            user: self.user_info(),
            benefit: page.benefit.clone(),
            metadata: None,
            element: None,
            heatmap: None,
            time_spent: None,
        };

        match detail {
            EventDetail::Pageview | EventDetail::Churnpoint => {}
            EventDetail::Click { element } => {
                data.metadata = Some(ClickMetadata {
                    timestamp: format_timestamp(stamp.timestamp),
                    viewport: self.device.viewport,
                    coordinates: Coordinates::default(),
                });
                data.element = Some(element);
            }
            EventDetail::Heatmap { points } => {
                data.heatmap = Some(points);
            }
            EventDetail::Timespent {
                started_at,
                ended_at,
                seconds,
                reason,
            } => {
                data.session_metadata.total_time_spent = Some(seconds);
                data.time_spent = Some(TimeSpentInfo {
                    start_time: format_timestamp(started_at),
                    end_time: format_timestamp(ended_at),
                    duration_seconds: seconds,
                    reason,
                });
            }
        }

        EventEnvelope {
            distributor: self.distributor.clone(),
            url: page.url.clone(),
            event_id: stamp.event_id,
            sequence_number: stamp.sequence_number,
            event_timestamp: format_timestamp(stamp.timestamp),
            event_type,
            event_data: data,
        }
    }

    fn user_info(&self) -> UserInfo {
        let d = &self.device;
        UserInfo {
            user_id: d.user_id.clone(),
            user_agent: d.user_agent.clone(),
            platform: d.platform.clone(),
            os_version: d.os_version.clone(),
            app_version: d.app_version.clone(),
            language: d.language.clone(),
            timezone: d.timezone.clone(),
            screen: d.screen,
            viewport: d.viewport,
        }
    }
}

/// Page id: the URL's bytes in standard base64 without `=` padding.
pub fn page_id(url: &str) -> String {
    STANDARD_NO_PAD.encode(url.as_bytes())
}

/// UTC with millisecond precision and a `Z` suffix.
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// A one-off calendar event as provided by the content layer.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub date: NaiveDate,
    /// Display form, e.g. "10:00 AM"; parsed leniently by the schedule engine.
    pub time: Option<String>,
    pub location: Option<String>,
    pub image: Option<String>,
    pub content: Option<String>,
}

/// Read-only access to CMS-managed records. The core only needs events;
/// pastors, ministries, and sermons stay behind the rendering layer.
pub trait CmsClient: Send + Sync {
    fn list_events(&self, limit: Option<usize>) -> Vec<Event>;
    fn get_event(&self, slug: &str) -> Option<Event>;
}

/// In-process content source used until a headless CMS is wired in. The
/// rendering layer treats it exactly like a remote client.
pub struct StaticCms {
    events: Vec<Event>,
}

impl StaticCms {
    pub fn new() -> Self {
        Self {
            events: seed_events(),
        }
    }

    pub fn with_events(events: Vec<Event>) -> Self {
        Self { events }
    }
}

impl Default for StaticCms {
    fn default() -> Self {
        Self::new()
    }
}

impl CmsClient for StaticCms {
    fn list_events(&self, limit: Option<usize>) -> Vec<Event> {
        let mut events = self.events.clone();
        events.sort_by_key(|e| e.date);
        match limit {
            Some(n) => events.into_iter().take(n).collect(),
            None => events,
        }
    }

    fn get_event(&self, slug: &str) -> Option<Event> {
        self.events.iter().find(|e| e.slug == slug).cloned()
    }
}

fn seed_events() -> Vec<Event> {
    vec![
        Event {
            id: "1".to_string(),
            slug: "annual-thanksgiving".to_string(),
            title: "Annual Thanksgiving".to_string(),
            description: "A whole-congregation day of gratitude and celebration.".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 11, 22).unwrap_or_default(),
            time: Some("10:00 AM".to_string()),
            location: Some("Main auditorium".to_string()),
            image: Some("/images/thanksgiving.webp".to_string()),
            content: None,
        },
        Event {
            id: "2".to_string(),
            slug: "christmas-carol-night".to_string(),
            title: "Christmas Carol Night".to_string(),
            description: "An evening of carols, candlelight, and community.".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 12, 18).unwrap_or_default(),
            time: Some("6:30 PM".to_string()),
            location: Some("Main auditorium".to_string()),
            image: Some("/images/carol-night.webp".to_string()),
            content: None,
        },
        Event {
            id: "3".to_string(),
            slug: "easter-convention".to_string(),
            title: "Easter Convention".to_string(),
            description: "Three days of worship and teaching over the Easter weekend.".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 4, 3).unwrap_or_default(),
            time: Some("9:00 AM".to_string()),
            location: Some("Main auditorium".to_string()),
            image: Some("/images/easter.webp".to_string()),
            content: None,
        },
    ]
}

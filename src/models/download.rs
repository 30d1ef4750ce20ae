use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::urls;

/// Per-item overrides. Empty fields inherit the global settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemSettings {
    #[serde(default)]
    pub saveas: String,
    #[serde(rename = "outputPath", default)]
    pub output_path: String,
}

/// One queued download. The id is generated at creation and never changes;
/// only the override settings may be edited afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: String,
    pub url: String,
    pub settings: ItemSettings,
}

/// Wire shape of a WorkItem inside the persisted state blob. Ids are not
/// stored; a restart invalidates them anyway, so imports mint fresh ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredItem {
    pub url: String,
    pub settings: ItemSettings,
}

impl WorkItem {
    pub fn new(url: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: urls::set_as_web_player_url(url),
            settings: ItemSettings::default(),
        }
    }

    pub fn from_stored(stored: StoredItem) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: stored.url,
            settings: stored.settings,
        }
    }

    pub fn to_stored(&self) -> StoredItem {
        StoredItem {
            url: self.url.clone(),
            settings: self.settings.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_item_forces_web_player_mode() {
        let item = WorkItem::new("https://contoso.sharepoint.com/sites/a/video.mp4");
        assert!(item.url.contains("web=1"));
    }

    #[test]
    fn new_items_get_distinct_ids() {
        let a = WorkItem::new("https://contoso.sharepoint.com/x");
        let b = WorkItem::new("https://contoso.sharepoint.com/x");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn stored_item_uses_wire_field_names() {
        let item = WorkItem {
            id: "x".into(),
            url: "https://contoso.sharepoint.com/x?web=1".into(),
            settings: ItemSettings {
                saveas: "lecture".into(),
                output_path: "/tmp/out".into(),
            },
        };
        let json = serde_json::to_string(&item.to_stored()).unwrap();
        assert!(json.contains("\"saveas\":\"lecture\""));
        assert!(json.contains("\"outputPath\":\"/tmp/out\""));
    }

    #[test]
    fn import_regenerates_id() {
        let stored: StoredItem =
            serde_json::from_str(r#"{"url":"https://x/sharepoint/a?web=1","settings":{}}"#)
                .unwrap();
        let a = WorkItem::from_stored(stored.clone());
        let b = WorkItem::from_stored(stored);
        assert_ne!(a.id, b.id);
        assert_eq!(a.url, b.url);
    }
}

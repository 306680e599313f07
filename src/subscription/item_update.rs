/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/5/25
******************************************************************************/

use serde::Serialize;
use std::collections::HashMap;

/// The values of one item after an update, plus what the update changed.
///
/// Fields are keyed by name when the subscription was made with a field list, and
/// by their 1-based position (`"1"`, `"2"`, ...) when made with a field schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemUpdate {
    /// Name of the item, when the subscription used an item list.
    pub item_name: Option<String>,
    /// 1-based position of the item in the list or group.
    pub item_pos: usize,
    /// Current value of every field; `None` is a null value.
    pub fields: HashMap<String, Option<String>>,
    /// Fields whose value changed with this update.
    pub changed_fields: HashMap<String, Option<String>>,
    /// Whether the update belongs to the initial snapshot.
    pub is_snapshot: bool,
}

impl ItemUpdate {
    /// Current value of a field; `None` both for null values and unknown fields.
    pub fn get_value(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_deref())
    }

    /// Current value of a field of a schema-based subscription, by 1-based position.
    pub fn get_value_by_pos(&self, pos: usize) -> Option<&str> {
        self.get_value(&pos.to_string())
    }

    pub fn is_value_changed(&self, field: &str) -> bool {
        self.changed_fields.contains_key(field)
    }

    pub fn get_changed_fields(&self) -> &HashMap<String, Option<String>> {
        &self.changed_fields
    }

    pub fn get_fields(&self) -> &HashMap<String, Option<String>> {
        &self.fields
    }

    /// JSON rendering of the update, for logging and bridging.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update() -> ItemUpdate {
        let mut fields = HashMap::new();
        fields.insert("bid".to_string(), Some("10.5".to_string()));
        fields.insert("ask".to_string(), None);
        let mut changed_fields = HashMap::new();
        changed_fields.insert("bid".to_string(), Some("10.5".to_string()));
        ItemUpdate {
            item_name: Some("item1".to_string()),
            item_pos: 1,
            fields,
            changed_fields,
            is_snapshot: true,
        }
    }

    #[test]
    fn test_values() {
        let update = update();
        assert_eq!(update.get_value("bid"), Some("10.5"));
        assert_eq!(update.get_value("ask"), None);
        assert_eq!(update.get_value("missing"), None);
        assert!(update.is_value_changed("bid"));
        assert!(!update.is_value_changed("ask"));
    }

    #[test]
    fn test_to_json() {
        let json: serde_json::Value = serde_json::from_str(&update().to_json()).unwrap();
        assert_eq!(json["item_name"], "item1");
        assert_eq!(json["fields"]["bid"], "10.5");
        assert!(json["fields"]["ask"].is_null());
        assert_eq!(json["is_snapshot"], true);
    }
}

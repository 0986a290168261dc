use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigError;

/// One configured trigger phrase and the action it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    phrase: String,
    folded: String,
    action: String,
}

impl Trigger {
    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    pub fn action(&self) -> &str {
        &self.action
    }
}

/// Ordered mapping from trigger phrase to action identifier (a sound file path).
///
/// Insertion order is the match priority. Phrases are case-folded once on insert;
/// two phrases that fold to the same string may coexist, the earlier one wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerTable {
    entries: Vec<Trigger>,
}

impl TriggerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a trigger. Empty (or whitespace-only) phrases are rejected because they
    /// would match every message.
    pub fn insert(
        &mut self,
        phrase: impl Into<String>,
        action: impl Into<String>,
    ) -> Result<(), ConfigError> {
        let phrase = phrase.into();
        if phrase.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "triggers",
                reason: "trigger phrase must not be empty".into(),
            });
        }
        let folded = phrase.to_lowercase();
        self.entries.push(Trigger {
            phrase,
            folded,
            action: action.into(),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trigger> {
        self.entries.iter()
    }

    /// First trigger (in insertion order) whose folded phrase occurs in the folded text.
    pub fn find(&self, text: &str) -> Option<&Trigger> {
        let folded = text.to_lowercase();
        self.entries.iter().find(|t| folded.contains(&t.folded))
    }
}

/// Return the action bound to the first trigger contained in `text`, ignoring case.
///
/// Substring match, not word match: `"hi"` fires on `"this"`.
pub fn match_trigger<'a>(text: &str, table: &'a TriggerTable) -> Option<&'a str> {
    table.find(text).map(Trigger::action)
}

impl Serialize for TriggerTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for t in &self.entries {
            map.serialize_entry(&t.phrase, &t.action)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TriggerTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(TableVisitor)
    }
}

/// Reads a map in document order, which plain `HashMap` would lose.
struct TableVisitor;

impl<'de> Visitor<'de> for TableVisitor {
    type Value = TriggerTable;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of trigger phrase to sound file")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<TriggerTable, A::Error> {
        let mut table = TriggerTable::new();
        while let Some((phrase, action)) = access.next_entry::<String, String>()? {
            table
                .insert(phrase, action)
                .map_err(<A::Error as serde::de::Error>::custom)?;
        }
        Ok(table)
    }
}

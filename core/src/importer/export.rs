//! Shape of the chat-export document. Every field is optional: a missing or
//! null field reads as empty, never as an error.

use serde::{Deserialize, Deserializer};

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportThread {
    #[serde(deserialize_with = "null_as_default")]
    pub channel: ExportChannel,
    pub exported_at: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub messages: Vec<ExportMessage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportChannel {
    #[serde(deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(deserialize_with = "lenient_id")]
    pub category_id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportUser {
    #[serde(deserialize_with = "lenient_id")]
    pub id: Option<String>,
    pub name: Option<String>,
    pub nickname: Option<String>,
    pub avatar_url: Option<String>,
    pub is_bot: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportMessage {
    #[serde(deserialize_with = "lenient_id")]
    pub id: Option<String>,
    pub author: Option<ExportUser>,
    pub content: Option<String>,
    pub timestamp: Option<String>,
    pub reference: Option<ExportReference>,
    #[serde(deserialize_with = "null_as_default")]
    pub attachments: Vec<ExportAttachment>,
    #[serde(deserialize_with = "null_as_default")]
    pub reactions: Vec<ExportReaction>,
    #[serde(deserialize_with = "null_as_default")]
    pub mentions: Vec<ExportUser>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportReference {
    #[serde(deserialize_with = "lenient_id")]
    pub message_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportAttachment {
    pub url: Option<String>,
    pub file_name: Option<String>,
    pub file_size_bytes: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportReaction {
    #[serde(deserialize_with = "null_as_default")]
    pub emoji: ExportEmoji,
    #[serde(deserialize_with = "null_as_default")]
    pub users: Vec<ExportUser>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportEmoji {
    pub name: Option<String>,
    pub image_url: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Text(String),
    Number(u64),
}

/// Ids are numeric strings in practice, but bare numbers are accepted too.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<IdRepr>::deserialize(deserializer)?
        .map(|id| match id {
            IdRepr::Text(text) => text,
            IdRepr::Number(num) => num.to_string(),
        })
        .filter(|id| !id.trim().is_empty()))
}

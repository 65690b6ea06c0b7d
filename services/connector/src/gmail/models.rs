//! Wire models for the Gmail REST API (v1). Only the fields the sync
//! protocol reads are mapped; everything else is ignored on deserialize.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub email_address: Option<String>,
    pub history_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadList {
    #[serde(default)]
    pub threads: Vec<ThreadStub>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadStub {
    pub id: String,
    #[serde(default)]
    pub snippet: String,
    pub history_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryList {
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    pub next_page_token: Option<String>,
    /// The latest marker on the mailbox, reported with every page.
    pub history_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(default)]
    pub messages_added: Vec<MessageRef>,
    #[serde(default)]
    pub messages_deleted: Vec<MessageRef>,
    #[serde(default)]
    pub labels_added: Vec<MessageRef>,
    #[serde(default)]
    pub labels_removed: Vec<MessageRef>,
}

impl HistoryEntry {
    /// Thread ids touched by any event in this entry.
    pub fn touched_thread_ids(&self) -> impl Iterator<Item = &str> {
        self.messages_added
            .iter()
            .chain(&self.messages_deleted)
            .chain(&self.labels_added)
            .chain(&self.labels_removed)
            .filter_map(|r| r.message.thread_id.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub message: MessageStub,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStub {
    pub id: String,
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub payload: Option<MessagePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartBody {
    pub data: Option<String>,
    #[serde(default)]
    pub size: i64,
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRow {
    pub user_id: String,
    pub username: Option<String>,
    pub nickname: Option<String>,
    pub avatar_url: Option<String>,
    pub is_bot: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadRow {
    pub thread_id: String,
    pub category_id: Option<String>,
    pub name: Option<String>,
    pub exported_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRow {
    pub message_id: String,
    pub thread_id: String,
    pub author_id: String,
    pub content: Option<String>,
    pub timestamp: Option<String>,
    pub reply_to_msg_id: Option<String>,
}

/// Display fields of a user as embedded in aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRef {
    pub user_id: String,
    pub username: Option<String>,
    pub nickname: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmojiCount {
    pub emoji_name: Option<String>,
    pub emoji_url: Option<String>,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCount {
    pub day: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyCount {
    pub hour: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordWeight {
    pub text: String,
    pub weight: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopUser {
    pub user: UserRef,
    pub msg_count: i64,
    pub top_emojis: Vec<EmojiCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopThread {
    pub thread: ThreadRow,
    pub msg_count: i64,
    pub op_user: Option<UserRef>,
    pub top_emoji: Option<EmojiCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotMessage {
    pub message: MessageRow,
    pub author: Option<UserRef>,
    pub thread_name: Option<String>,
    pub total_reactions: i64,
    pub detailed_reactions: Vec<EmojiCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HomepageBundle {
    pub total_msgs: i64,
    pub total_threads: i64,
    pub total_users: i64,
    pub chart_daily: Vec<DailyCount>,
    pub chart_hourly: Vec<HourlyCount>,
    pub top_users: Vec<TopUser>,
    pub top_threads: Vec<TopThread>,
    pub top_hot_msgs: Vec<HotMessage>,
    pub server_word_cloud: Vec<WordWeight>,
    pub server_word_rank: Vec<WordWeight>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user: UserRef,
    pub msg_count: i64,
    pub top_emoji_urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionPartner {
    pub user: UserRef,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub message: MessageRow,
    pub thread_name: Option<String>,
    pub total_reactions: i64,
    pub detailed_reactions: Vec<EmojiCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenedThread {
    pub thread_id: String,
    pub name: Option<String>,
    pub created_at: Option<String>,
    pub reply_count: i64,
    pub first_content: Option<String>,
    pub top_emoji: Option<EmojiCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user: UserRow,
    pub merged_ids: Vec<String>,
    pub msg_count: i64,
    pub reaction_received_count: i64,
    pub top_emojis_given: Vec<EmojiCount>,
    pub top_emojis_received: Vec<EmojiCount>,
    pub interactions_incoming: Vec<InteractionPartner>,
    pub interactions_outgoing: Vec<InteractionPartner>,
    pub chart_daily: Vec<DailyCount>,
    pub chart_hourly: Vec<HourlyCount>,
    pub word_cloud: Vec<WordWeight>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadActivity {
    pub thread_id: String,
    pub name: Option<String>,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserReport {
    pub user_id: String,
    pub join_date: Option<String>,
    pub most_active_day: Option<DailyCount>,
    pub latest_late_msg: Option<UserMessage>,
    pub most_replied_thread: Option<ThreadActivity>,
    pub most_active_topic: Option<ThreadActivity>,
    pub most_liked_msg: Option<UserMessage>,
    pub top_friend_incoming: Option<InteractionPartner>,
    pub top_friend_outgoing: Option<InteractionPartner>,
    pub word_cloud: Vec<WordWeight>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeEdge {
    pub target_id: String,
    pub parent_id: String,
    pub parent_name: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub id: i64,
    pub requester_id: String,
    pub requester_name: Option<String>,
    pub target_id: String,
    pub target_name: Option<String>,
    pub status: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveStats {
    pub threads: i64,
    pub messages: i64,
    pub users: i64,
    pub reactions: i64,
    pub attachments: i64,
    pub mentions: i64,
}

/// Someone who opened the site, keyed by their own account id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteVisitor {
    pub user_id: String,
    pub username: Option<String>,
    pub nickname: Option<String>,
    pub avatar_url: Option<String>,
    pub last_visit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileViewer {
    pub viewer_user_id: String,
    pub viewer_name: Option<String>,
    pub viewer_avatar: Option<String>,
    pub viewed_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileViews {
    /// Distinct viewers, each counted once.
    pub view_count: i64,
    pub recent: Vec<ProfileViewer>,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Users & auth ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub avatar_url: String,
    pub bio: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub bio: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProfile {
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user: User,
    pub posts: Vec<PostSummary>,
    pub post_count: i64,
    pub total_views: i64,
}

// ── Posts ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    #[default]
    Draft,
    Published,
}

impl PostStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Published => "published",
        }
    }
}

impl std::str::FromStr for PostStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "draft" => Ok(PostStatus::Draft),
            "published" => Ok(PostStatus::Published),
            other => Err(format!("unknown post status `{other}`")),
        }
    }
}

/// A full essay, as returned by the detail endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub author_id: i64,
    /// Either a plain JSON string or a block document (`{"blocks": [...]}`).
    pub content: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub views: i64,
    pub like_count: i64,
    pub tags: Vec<String>,
    pub status: PostStatus,
    pub read_time_minutes: u32,
}

/// Listing shape: everything but the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostSummary {
    pub id: i64,
    pub title: String,
    pub author_id: i64,
    pub author_name: Option<String>,
    pub excerpt: String,
    pub created_at: DateTime<Utc>,
    pub views: i64,
    pub like_count: i64,
    pub tags: Vec<String>,
    pub read_time_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePost {
    pub title: String,
    pub content: serde_json::Value,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: PostStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePost {
    pub title: Option<String>,
    pub content: Option<serde_json::Value>,
    pub tags: Option<Vec<String>>,
    pub status: Option<PostStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordView {
    /// Opaque per-browser key for anonymous readers.
    pub viewer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewResponse {
    pub views: i64,
    pub counted: bool,
}

// ── Likes ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikeResponse {
    pub like_count: i64,
    pub liked: bool,
}

// ── Comments ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub user_id: i64,
    pub body: String,
    pub parent_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A comment with its resolved author and its (recursive) replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: Comment,
    pub author: Option<User>,
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    /// Number of nodes in this subtree, including `self`.
    pub fn subtree_size(&self) -> usize {
        1 + self.replies.iter().map(CommentNode::subtree_size).sum::<usize>()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateComment {
    pub body: String,
    pub parent_id: Option<i64>,
}

// ── Achievements ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementHolder {
    pub user_id: i64,
    pub name: String,
    pub avatar_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: String,
    pub title: String,
    pub description: String,
    pub icon: String,
    /// Empty when nobody holds the record yet.
    pub holders: Vec<AchievementHolder>,
    pub value: String,
}

// ── External feed ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedPost {
    pub title: String,
    pub author: Option<String>,
    pub url: String,
    pub published: Option<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

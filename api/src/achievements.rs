use std::collections::HashMap;

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use essayist_shared::{Achievement, AchievementHolder, Comment, PostStatus, PostSummary, User};

use crate::store::Store;
use crate::AppState;

/// The three leaderboard categories, in response order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    MostPosts,
    MostViewed,
    MostComments,
}

impl Category {
    fn id(self) -> &'static str {
        match self {
            Category::MostPosts => "most-posts",
            Category::MostViewed => "most-viewed",
            Category::MostComments => "most-comments",
        }
    }

    fn title(self) -> &'static str {
        match self {
            Category::MostPosts => "Prolific Writer",
            Category::MostViewed => "Crowd Favourite",
            Category::MostComments => "Conversationalist",
        }
    }

    fn icon(self) -> &'static str {
        match self {
            Category::MostPosts => "feather",
            Category::MostViewed => "eye",
            Category::MostComments => "message-circle",
        }
    }

    fn empty_description(self) -> &'static str {
        match self {
            Category::MostPosts => "No essays have been published yet",
            Category::MostViewed => "No essays have been read yet",
            Category::MostComments => "No comments have been written yet",
        }
    }

    /// Nobody holds the record.
    pub fn vacant(self) -> Achievement {
        self.award(Vec::new(), self.empty_description().to_string(), 0)
    }

    fn award(self, holders: Vec<AchievementHolder>, description: String, value: i64) -> Achievement {
        Achievement {
            id: self.id().to_string(),
            title: self.title().to_string(),
            description,
            icon: self.icon().to_string(),
            holders,
            value: format_thousands(value),
        }
    }
}

/// The part of a post the leaderboard looks at.
#[derive(Debug, Clone)]
pub struct PostTally {
    pub id: i64,
    pub author_id: i64,
    pub title: String,
    pub views: i64,
    pub created_at: DateTime<Utc>,
    pub status: PostStatus,
}

impl From<&PostSummary> for PostTally {
    fn from(summary: &PostSummary) -> Self {
        Self {
            id: summary.id,
            author_id: summary.author_id,
            title: summary.title.clone(),
            views: summary.views,
            created_at: summary.created_at,
            status: PostStatus::Published,
        }
    }
}

/// Every user sharing the highest published-post count holds the record.
/// A maximum of zero awards nobody.
pub fn most_posts_written(users: &[User], posts: &[PostTally]) -> Achievement {
    let mut counts: HashMap<i64, i64> = HashMap::new();
    for post in posts.iter().filter(|p| p.status == PostStatus::Published) {
        *counts.entry(post.author_id).or_default() += 1;
    }

    let count_of = |user: &User| counts.get(&user.id).copied().unwrap_or(0);
    let max = users.iter().map(count_of).max().unwrap_or(0);
    if max == 0 {
        return Category::MostPosts.vacant();
    }

    let mut holders: Vec<AchievementHolder> = users
        .iter()
        .filter(|user| count_of(*user) == max)
        .map(holder)
        .collect();
    holders.sort_by_key(|h| h.user_id);

    let noun = if max == 1 { "essay" } else { "essays" };
    Category::MostPosts.award(holders, format!("Published {max} {noun}"), max)
}

/// The author of the single most-viewed published post. Equal view counts
/// go to the earlier post.
pub fn most_viewed_post(users: &[User], posts: &[PostTally]) -> Achievement {
    let top = posts
        .iter()
        .filter(|p| p.status == PostStatus::Published)
        .min_by(|a, b| {
            b.views
                .cmp(&a.views)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
    let Some(top) = top else {
        return Category::MostViewed.vacant();
    };

    let holders = users
        .iter()
        .find(|user| user.id == top.author_id)
        .map(holder)
        .into_iter()
        .collect();
    let description = format!("Wrote \"{}\", the most-read essay", top.title);
    Category::MostViewed.award(holders, description, top.views)
}

/// The single user with the most comments across every post. Equal
/// tallies go to the lower user id.
pub fn most_comments_written(users: &[User], comments: &[Comment]) -> Achievement {
    let mut tallies: HashMap<i64, i64> = HashMap::new();
    for comment in comments {
        *tallies.entry(comment.user_id).or_default() += 1;
    }

    let top = tallies
        .into_iter()
        .min_by(|(a_id, a_count), (b_id, b_count)| b_count.cmp(a_count).then(a_id.cmp(b_id)));
    let Some((user_id, count)) = top else {
        return Category::MostComments.vacant();
    };

    let holders = users
        .iter()
        .find(|user| user.id == user_id)
        .map(holder)
        .into_iter()
        .collect();
    let noun = if count == 1 { "comment" } else { "comments" };
    Category::MostComments.award(holders, format!("Wrote {count} {noun}"), count)
}

/// Computes all three categories from one concurrent read of each
/// collection. A category whose reads fail is reported vacant instead of
/// failing the whole board.
pub async fn collect_achievements(store: &Store) -> Vec<Achievement> {
    let (users, posts, comments) =
        tokio::join!(store.list_users(), store.list_published(), store.all_comments());
    let tallies = posts.map(|posts| posts.iter().map(PostTally::from).collect::<Vec<_>>());

    let users = users.as_ref();
    let tallies = tallies.as_ref();
    let comments = comments.as_ref();

    let by_posts = users.and_then(|users| tallies.map(|tallies| most_posts_written(users, tallies)));
    let by_views = users.and_then(|users| tallies.map(|tallies| most_viewed_post(users, tallies)));
    let by_comments =
        users.and_then(|users| comments.map(|comments| most_comments_written(users, comments)));

    [
        (Category::MostPosts, by_posts),
        (Category::MostViewed, by_views),
        (Category::MostComments, by_comments),
    ]
    .into_iter()
    .map(|(category, result)| {
        result.unwrap_or_else(|err| {
            tracing::warn!(category = category.id(), error = %err, "achievement unavailable");
            category.vacant()
        })
    })
    .collect()
}

/// GET /api/achievements
pub async fn get_achievements(State(state): State<AppState>) -> Json<Vec<Achievement>> {
    Json(collect_achievements(&state.store).await)
}

fn holder(user: &User) -> AchievementHolder {
    AchievementHolder {
        user_id: user.id,
        name: user.name.clone(),
        avatar_url: user.avatar_url.clone(),
    }
}

/// `1234567` → `"1,234,567"`.
pub fn format_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        grouped.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    fn user(id: i64, name: &str) -> User {
        User {
            id,
            name: name.into(),
            avatar_url: format!("https://example.com/{name}.png"),
            bio: String::new(),
            created_at: at(0),
        }
    }

    fn post(id: i64, author_id: i64, views: i64, status: PostStatus) -> PostTally {
        PostTally {
            id,
            author_id,
            title: format!("essay {id}"),
            views,
            created_at: at(id * 10),
            status,
        }
    }

    fn comment(id: i64, user_id: i64, post_id: i64) -> Comment {
        Comment {
            id,
            post_id,
            user_id,
            body: "nice".into(),
            parent_id: None,
            created_at: at(id),
        }
    }

    fn holder_ids(achievement: &Achievement) -> Vec<i64> {
        achievement.holders.iter().map(|h| h.user_id).collect()
    }

    #[test]
    fn no_published_posts_means_no_prolific_writer() {
        let users = vec![user(1, "ada"), user(2, "grace")];
        let posts = vec![post(1, 1, 0, PostStatus::Draft)];
        let award = most_posts_written(&users, &posts);
        assert!(award.holders.is_empty());
        assert_eq!(award.value, "0");
    }

    #[test]
    fn unique_leader_holds_most_posts() {
        let users = vec![user(1, "ada"), user(2, "grace")];
        let posts = vec![
            post(1, 1, 0, PostStatus::Published),
            post(2, 2, 0, PostStatus::Published),
            post(3, 2, 0, PostStatus::Published),
            post(4, 1, 0, PostStatus::Draft),
            post(5, 1, 0, PostStatus::Draft),
        ];
        let award = most_posts_written(&users, &posts);
        assert_eq!(holder_ids(&award), vec![2]);
        assert_eq!(award.value, "2");
        assert_eq!(award.id, "most-posts");
    }

    #[test]
    fn tied_writers_all_hold_most_posts() {
        let users = vec![user(2, "grace"), user(1, "ada")];
        let posts = vec![
            post(1, 1, 0, PostStatus::Published),
            post(2, 2, 0, PostStatus::Published),
        ];
        let award = most_posts_written(&users, &posts);
        assert_eq!(holder_ids(&award), vec![1, 2]);
        assert_eq!(award.value, "1");
        assert_eq!(award.description, "Published 1 essay");
    }

    #[test]
    fn most_viewed_ignores_drafts() {
        let users = vec![user(1, "a"), user(2, "b")];
        let posts = vec![
            post(1, 1, 5, PostStatus::Published),
            post(2, 2, 9, PostStatus::Published),
            post(3, 2, 2, PostStatus::Draft),
            post(4, 1, 50, PostStatus::Draft),
        ];
        let award = most_viewed_post(&users, &posts);
        assert_eq!(holder_ids(&award), vec![2]);
        assert_eq!(award.value, "9");
        assert!(award.description.contains("essay 2"));
    }

    #[test]
    fn most_viewed_without_posts_is_vacant() {
        let award = most_viewed_post(&[user(1, "a")], &[]);
        assert!(award.holders.is_empty());
        assert_eq!(award.value, "0");
    }

    #[test]
    fn most_viewed_ties_go_to_the_earlier_post() {
        let users = vec![user(1, "a"), user(2, "b")];
        let posts = vec![
            post(2, 2, 7, PostStatus::Published),
            post(1, 1, 7, PostStatus::Published),
        ];
        assert_eq!(holder_ids(&most_viewed_post(&users, &posts)), vec![1]);
    }

    #[test]
    fn views_are_formatted_with_separators() {
        let users = vec![user(1, "a")];
        let posts = vec![post(1, 1, 1_234_567, PostStatus::Published)];
        assert_eq!(most_viewed_post(&users, &posts).value, "1,234,567");
    }

    #[test]
    fn comment_tally_spans_every_post() {
        let users = vec![user(1, "a"), user(2, "b")];
        let comments = vec![
            comment(1, 1, 10),
            comment(2, 2, 10),
            comment(3, 2, 11),
            comment(4, 2, 12),
            comment(5, 1, 12),
        ];
        let award = most_comments_written(&users, &comments);
        assert_eq!(holder_ids(&award), vec![2]);
        assert_eq!(award.value, "3");
    }

    #[test]
    fn no_comments_means_no_conversationalist() {
        let award = most_comments_written(&[user(1, "a")], &[]);
        assert!(award.holders.is_empty());
        assert_eq!(award.value, "0");
    }

    #[test]
    fn comment_ties_go_to_the_lower_user_id() {
        let users = vec![user(1, "a"), user(2, "b")];
        let comments = vec![comment(1, 2, 10), comment(2, 1, 10)];
        assert_eq!(holder_ids(&most_comments_written(&users, &comments)), vec![1]);
    }

    #[test]
    fn thousands_grouping() {
        assert_eq!(format_thousands(0), "0");
        assert_eq!(format_thousands(999), "999");
        assert_eq!(format_thousands(1000), "1,000");
        assert_eq!(format_thousands(-12345), "-12,345");
    }

    #[tokio::test]
    async fn board_is_computed_from_the_store() {
        use crate::db;
        use crate::store::{NewPost, NewUser};

        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("board.db");
        let pool = db::open_pool(path.to_str().expect("utf-8 path")).expect("pool");
        db::run_migrations(&pool).expect("migrations");
        let store = Store::new(pool);

        let mut ids = Vec::new();
        for name in ["ada", "grace"] {
            let created = store
                .create_user(NewUser {
                    name: name.into(),
                    email: format!("{name}@example.com"),
                    password_hash: "hash".into(),
                    avatar_url: String::new(),
                    bio: String::new(),
                })
                .await
                .expect("user");
            ids.push(created.id);
        }
        let post = store
            .create_post(
                ids[1],
                NewPost {
                    title: "On Trees".into(),
                    content: serde_json::json!("a short essay"),
                    tags: Vec::new(),
                    status: PostStatus::Published,
                },
            )
            .await
            .expect("post");
        store
            .create_comment(post.id, ids[0], "nice".into(), None)
            .await
            .expect("comment");

        let board = collect_achievements(&store).await;
        let categories: Vec<&str> = board.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(categories, vec!["most-posts", "most-viewed", "most-comments"]);
        assert_eq!(holder_ids(&board[0]), vec![ids[1]]);
        assert_eq!(holder_ids(&board[1]), vec![ids[1]]);
        assert_eq!(board[1].value, "0");
        assert_eq!(holder_ids(&board[2]), vec![ids[0]]);
    }
}

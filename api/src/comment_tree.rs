//! Turns the flat comment list of a post into a reply forest.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;

use essayist_shared::{Comment, CommentNode, User};
use futures_util::future::join_all;

use crate::error::ApiResult;

/// Resolves comment authors. Implemented by the store; tests use fakes.
pub trait AuthorLookup {
    fn find_user(&self, id: i64) -> impl Future<Output = ApiResult<Option<User>>> + Send;
}

/// Resolves every author concurrently, then assembles the forest.
///
/// Never fails: an author that cannot be resolved leaves `author: None`.
pub async fn build_comment_tree<L>(lookup: &L, comments: Vec<Comment>) -> Vec<CommentNode>
where
    L: AuthorLookup + Sync,
{
    let authors = resolve_authors(lookup, &comments).await;
    assemble(comments, &authors)
}

pub async fn resolve_authors<L>(lookup: &L, comments: &[Comment]) -> HashMap<i64, User>
where
    L: AuthorLookup + Sync,
{
    let ids: BTreeSet<i64> = comments.iter().map(|c| c.user_id).collect();
    let lookups = ids
        .into_iter()
        .map(|id| async move { (id, lookup.find_user(id).await) });

    let mut authors = HashMap::new();
    for (id, result) in join_all(lookups).await {
        match result {
            Ok(Some(user)) => {
                authors.insert(id, user);
            }
            Ok(None) => tracing::debug!(user_id = id, "comment author no longer exists"),
            Err(err) => {
                tracing::warn!(user_id = id, error = %err, "failed to resolve comment author")
            }
        }
    }
    authors
}

/// Builds the forest from already-resolved authors.
///
/// A comment is a reply only when its parent is another comment in
/// `comments`; anything else is a root. Roots come newest first, replies
/// oldest first, equal timestamps ordered by id. Every input comment appears
/// exactly once in the output.
pub fn assemble(comments: Vec<Comment>, authors: &HashMap<i64, User>) -> Vec<CommentNode> {
    let ids: HashSet<i64> = comments.iter().map(|c| c.id).collect();
    let mut children: HashMap<i64, Vec<Comment>> = HashMap::new();
    let mut roots = Vec::new();

    for comment in comments {
        match comment.parent_id {
            Some(parent) if parent != comment.id && ids.contains(&parent) => {
                children.entry(parent).or_default().push(comment);
            }
            _ => roots.push(comment),
        }
    }

    let mut forest: Vec<CommentNode> = roots
        .into_iter()
        .map(|root| attach(root, &mut children, authors))
        .collect();

    // Leftovers hang off a parent cycle. Promote the oldest member of each
    // cycle to a root, which pulls the rest of the cycle in as its replies.
    while let Some(stranded) = take_oldest(&mut children) {
        forest.push(attach(stranded, &mut children, authors));
    }

    forest.sort_by(|a, b| {
        (b.comment.created_at, b.comment.id).cmp(&(a.comment.created_at, a.comment.id))
    });
    forest
}

fn attach(
    comment: Comment,
    children: &mut HashMap<i64, Vec<Comment>>,
    authors: &HashMap<i64, User>,
) -> CommentNode {
    let mut replies: Vec<CommentNode> = children
        .remove(&comment.id)
        .unwrap_or_default()
        .into_iter()
        .map(|reply| attach(reply, children, authors))
        .collect();
    replies.sort_by_key(|node| (node.comment.created_at, node.comment.id));

    CommentNode {
        author: authors.get(&comment.user_id).cloned(),
        comment,
        replies,
    }
}

fn take_oldest(children: &mut HashMap<i64, Vec<Comment>>) -> Option<Comment> {
    let (parent, id) = children
        .iter()
        .flat_map(|(parent, siblings)| siblings.iter().map(move |c| (*parent, c)))
        .min_by_key(|(_, c)| (c.created_at, c.id))
        .map(|(parent, c)| (parent, c.id))?;

    let siblings = children.get_mut(&parent)?;
    let pos = siblings.iter().position(|c| c.id == id)?;
    let comment = siblings.remove(pos);
    if siblings.is_empty() {
        children.remove(&parent);
    }
    Some(comment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    fn comment(id: i64, parent_id: Option<i64>, t: i64) -> Comment {
        Comment {
            id,
            post_id: 1,
            user_id: 100 + id,
            body: format!("comment {id}"),
            parent_id,
            created_at: at(t),
        }
    }

    fn user(id: i64) -> User {
        User {
            id,
            name: format!("user{id}"),
            avatar_url: String::new(),
            bio: String::new(),
            created_at: at(0),
        }
    }

    fn ids(nodes: &[CommentNode]) -> Vec<i64> {
        nodes.iter().map(|n| n.comment.id).collect()
    }

    fn total(nodes: &[CommentNode]) -> usize {
        nodes.iter().map(CommentNode::subtree_size).sum()
    }

    struct FakeLookup {
        users: HashMap<i64, User>,
        failing: HashSet<i64>,
    }

    impl AuthorLookup for FakeLookup {
        fn find_user(&self, id: i64) -> impl Future<Output = ApiResult<Option<User>>> + Send {
            let result = if self.failing.contains(&id) {
                Err(ApiError::Decode("store unavailable".into()))
            } else {
                Ok(self.users.get(&id).cloned())
            };
            async move { result }
        }
    }

    #[test]
    fn roots_newest_first_with_replies_attached() {
        let comments = vec![
            comment(1, None, 10),
            comment(2, Some(1), 20),
            comment(3, None, 30),
        ];
        let forest = assemble(comments, &HashMap::new());

        assert_eq!(ids(&forest), vec![3, 1]);
        assert_eq!(ids(&forest[1].replies), vec![2]);
        assert!(forest[0].replies.is_empty());
    }

    #[test]
    fn replies_are_oldest_first() {
        let comments = vec![
            comment(1, None, 10),
            comment(4, Some(1), 50),
            comment(2, Some(1), 20),
            comment(3, Some(1), 40),
        ];
        let forest = assemble(comments, &HashMap::new());
        assert_eq!(ids(&forest[0].replies), vec![2, 3, 4]);
    }

    #[test]
    fn dangling_and_self_parents_become_roots() {
        let comments = vec![
            comment(1, None, 10),
            comment(2, Some(99), 20),
            comment(3, Some(3), 30),
        ];
        let forest = assemble(comments, &HashMap::new());
        assert_eq!(ids(&forest), vec![3, 2, 1]);
        assert_eq!(total(&forest), 3);
    }

    #[test]
    fn nesting_is_kept_at_any_depth() {
        let comments = vec![
            comment(1, None, 10),
            comment(2, Some(1), 20),
            comment(3, Some(2), 30),
            comment(4, Some(3), 40),
        ];
        let forest = assemble(comments, &HashMap::new());
        assert_eq!(ids(&forest), vec![1]);
        let deepest = &forest[0].replies[0].replies[0].replies;
        assert_eq!(ids(deepest), vec![4]);
    }

    #[test]
    fn parent_cycles_do_not_lose_comments() {
        let comments = vec![
            comment(1, None, 10),
            comment(2, Some(3), 20),
            comment(3, Some(2), 30),
            comment(4, Some(3), 40),
        ];
        let forest = assemble(comments, &HashMap::new());

        assert_eq!(total(&forest), 4);
        // 2 is the oldest cycle member, so it is promoted.
        assert_eq!(ids(&forest), vec![2, 1]);
        assert_eq!(ids(&forest[0].replies), vec![3]);
        assert_eq!(ids(&forest[0].replies[0].replies), vec![4]);
    }

    #[test]
    fn ordering_holds_for_a_mixed_thread() {
        let comments = vec![
            comment(1, None, 50),
            comment(2, Some(1), 70),
            comment(3, None, 10),
            comment(4, Some(1), 60),
            comment(5, Some(404), 55),
            comment(6, Some(3), 15),
            comment(7, None, 50),
        ];
        let forest = assemble(comments, &HashMap::new());

        assert_eq!(total(&forest), 7);
        for pair in forest.windows(2) {
            assert!(pair[0].comment.created_at >= pair[1].comment.created_at);
        }
        fn check_replies(node: &CommentNode) {
            for pair in node.replies.windows(2) {
                assert!(pair[0].comment.created_at <= pair[1].comment.created_at);
            }
            node.replies.iter().for_each(check_replies);
        }
        forest.iter().for_each(check_replies);
        // Equal timestamps: higher id first among roots.
        assert_eq!(ids(&forest), vec![5, 7, 1, 3]);
    }

    #[tokio::test]
    async fn unresolvable_authors_degrade_to_none() {
        let lookup = FakeLookup {
            users: HashMap::from([(101, user(101))]),
            failing: HashSet::from([103]),
        };
        let comments = vec![
            comment(1, None, 10),
            comment(2, Some(1), 20),
            comment(3, None, 30),
        ];
        let forest = build_comment_tree(&lookup, comments).await;

        assert_eq!(ids(&forest), vec![3, 1]);
        assert!(forest[0].author.is_none());
        assert_eq!(forest[1].author.as_ref().map(|u| u.id), Some(101));
        assert!(forest[1].replies[0].author.is_none());
    }

    #[tokio::test]
    async fn empty_input_builds_an_empty_forest() {
        let lookup = FakeLookup {
            users: HashMap::new(),
            failing: HashSet::new(),
        };
        assert!(build_comment_tree(&lookup, Vec::new()).await.is_empty());
    }
}

use tracing::{error, instrument};

use crate::forum::{Forum, ADMIN_UID};
use crate::model::Identity;
use crate::publisher::PublishError;
use crate::settings::{AuthorMapping, SyncConfig};

/// Forum username for an author's display name; first exact match wins.
pub fn author_username<'a>(authors: &'a [AuthorMapping], name: &str) -> Option<&'a str> {
    authors
        .iter()
        .find(|a| a.name == name)
        .map(|a| a.user.as_str())
}

/// Resolve who a post for `author` should be created as. Users lacking the
/// topic-create privilege in the target category are replaced by the admin.
#[instrument(skip_all, fields(author = %author))]
pub async fn resolve(forum: &Forum, cfg: &SyncConfig, author: &str) -> Result<Identity, PublishError> {
    let username = author_username(&cfg.authors, author).unwrap_or(cfg.user_name.as_str());
    let uid = forum
        .users
        .uid_by_username(username)
        .await
        .map_err(|source| PublishError::Lookup {
            username: username.to_string(),
            source,
        })?;

    let privileges = forum
        .privileges
        .category_privileges(cfg.category, uid)
        .await
        .map_err(|source| PublishError::Host {
            step: "privileges",
            source,
        })?;

    if privileges.topics_create {
        return Ok(Identity {
            uid,
            can_create_topics: true,
        });
    }

    error!(
        uid,
        cid = cfg.category,
        "User {} does not have permission to create topics in Category {}, posting as User {}",
        uid,
        cfg.category,
        ADMIN_UID
    );
    Ok(Identity {
        uid: ADMIN_UID,
        can_create_topics: false,
    })
}

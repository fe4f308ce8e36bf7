use crate::model::{FeedEntry, Identity, PostRequest};
use crate::settings::SyncConfig;

/// Build the topic for one feed entry. Pure.
pub fn transform(cfg: &SyncConfig, entry: &FeedEntry, identity: &Identity) -> PostRequest {
    let mut tags: Vec<String> = if cfg.tags.is_empty() {
        Vec::new()
    } else {
        cfg.tags.split(',').map(str::to_string).collect()
    };

    let mut content = format!(
        "{}\n\nBy {}",
        entry.link.as_deref().unwrap_or_default(),
        entry.author
    );
    if let Some(term) = entry.category.as_deref().filter(|t| !t.is_empty()) {
        content.push_str(" in ");
        content.push_str(term);
        if cfg.tag_with_category {
            tags.push(term.to_string());
        }
    }
    content.push_str(" on ");
    content.push_str(&entry.published.format("%Y-%m-%d").to_string());

    PostRequest {
        uid: identity.uid,
        title: entry.title.clone(),
        content,
        cid: cfg.category,
        tags,
    }
}

#![allow(dead_code)]

use serde_json::Value;
use tether_store::{NormalizedResource, RelationshipValue, ResourceReference, Store, StoreConfig};

pub const BLOG: &str = r#"
[types.post.relationships.comments]
kind = "has-many"
type = "comment"
inverse = "post"

[types.post.relationships.author]
kind = "belongs-to"
type = "user"

[types.comment.relationships.post]
kind = "belongs-to"
type = "post"
inverse = "comments"

[types.user.relationships.profile]
kind = "belongs-to"
type = "profile"
inverse = "user"

[types.profile.relationships.user]
kind = "belongs-to"
type = "user"
inverse = "profile"
"#;

pub fn blog_store() -> Store {
    let config = StoreConfig::from_toml_str(BLOG).expect("blog config should parse");
    Store::new(config).expect("blog config should validate")
}

pub fn comment(id: &str) -> ResourceReference {
    ResourceReference::new("comment", id)
}

pub fn post_with_comments(id: &str, comments: &[&str]) -> NormalizedResource {
    NormalizedResource::new("post", id).with_relationship(
        "comments",
        RelationshipValue::many(comments.iter().map(|c| comment(c))),
    )
}

pub fn document(value: Value) -> RelationshipValue {
    serde_json::from_value(value).expect("relationship document should parse")
}

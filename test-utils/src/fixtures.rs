//! Test fixtures with sample data.
//!
//! The posts contract mirrors a consumer of a JSONPlaceholder-style posts
//! API: a list endpoint served with `each_like` and a single-post endpoint
//! served with `like`.

use pact_engine::matchers::{MatchSpec, each_like, like};
use pact_engine::{ContractDocument, Interaction, InteractionBuilder, RequestSpec, ResponseSpec};
use serde_json::{Value, json};

/// Consumer name used by the posts fixtures.
pub const POSTS_CONSUMER: &str = "test-app-consumer";

/// Provider name used by the posts fixtures.
pub const POSTS_PROVIDER: &str = "jsonplaceholder-provider";

/// Provider state the posts fixtures require.
pub const POSTS_EXIST: &str = "posts exist";

/// Shape of a single post.
#[must_use]
pub fn post_shape() -> MatchSpec {
    MatchSpec::object([
        ("userId", like(1)),
        ("id", like(1)),
        ("title", like("Sample Post Title")),
        ("body", like("Sample post content here")),
    ])
}

/// A post as the real provider would return it.
#[must_use]
pub fn sample_post(id: i64) -> Value {
    json!({
        "userId": 7,
        "id": id,
        "title": format!("Real Title {id}"),
        "body": "Real body",
    })
}

/// `GET /posts` returning at least one post.
#[must_use]
pub fn list_posts_interaction() -> Interaction {
    InteractionBuilder::new()
        .given(POSTS_EXIST)
        .upon_receiving("a request to get all posts")
        .with_request(RequestSpec::get("/posts").with_header("Accept", "application/json"))
        .will_respond_with(
            ResponseSpec::new(200)
                .with_header("Content-Type", "application/json")
                .with_body(each_like(post_shape())),
        )
        .build()
        .unwrap_or_else(|e| panic!("fixture interaction is invalid: {e}"))
}

/// `GET /posts/1` with a type-like body and no provider state.
#[must_use]
pub fn get_post_interaction() -> Interaction {
    InteractionBuilder::new()
        .upon_receiving("get post 1")
        .with_request(RequestSpec::get("/posts/1"))
        .will_respond_with(
            ResponseSpec::new(200)
                .with_body(like(json!({"id": 1, "title": "x", "body": "y", "userId": 1}))),
        )
        .build()
        .unwrap_or_else(|e| panic!("fixture interaction is invalid: {e}"))
}

/// Same as [`get_post_interaction`] but gated on [`POSTS_EXIST`].
#[must_use]
pub fn get_post_with_state_interaction() -> Interaction {
    let mut interaction = get_post_interaction();
    interaction.provider_state = Some(POSTS_EXIST.to_string());
    interaction
}

/// Contract with the list endpoint only.
#[must_use]
pub fn posts_contract() -> ContractDocument {
    ContractDocument::new(POSTS_CONSUMER, POSTS_PROVIDER).with_interaction(list_posts_interaction())
}

/// Contract holding exactly `interaction`.
#[must_use]
pub fn single_interaction_contract(interaction: Interaction) -> ContractDocument {
    ContractDocument::new(POSTS_CONSUMER, POSTS_PROVIDER).with_interaction(interaction)
}

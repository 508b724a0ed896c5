use async_graphql::{EmptySubscription, Schema};

use super::mutations::MutationRoot;
use super::queries::QueryRoot;

pub type RpcSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

/// Build the procedure schema. Request data (state, viewer, cookies) is
/// attached per request in [`super::execute`].
pub fn build_schema() -> RpcSchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .limit_depth(12)
        .finish()
}

//! Thin convenience layer over the `mongodb` driver, in the shape the
//! rest of the workspace expects (`find_collect`, a `DbClient` handle
//! with one `Collection<T>` per entity). The actual relational/document
//! schema design is an external concern (spec §1); this module only
//! gives the Job Store and Stack Store a durable, typed place to read
//! and write.

pub use bson;
pub use mongodb;

use anyhow::Context;
use futures_util::TryStreamExt;
use mongodb::{
  bson::Document,
  options::{ClientOptions, FindOptions},
  Client, Collection,
};
use serde::{Serialize, de::DeserializeOwned};

pub async fn client(uri: &str) -> anyhow::Result<Client> {
  let options = ClientOptions::parse(uri)
    .await
    .context("failed to parse MongoDB connection uri")?;
  Client::with_options(options)
    .context("failed to construct MongoDB client")
}

/// Collects every document matching `filter`, in the teacher's
/// `find_collect` idiom.
pub async fn find_collect<T>(
  collection: &Collection<T>,
  filter: impl Into<Option<Document>>,
  options: impl Into<Option<FindOptions>>,
) -> anyhow::Result<Vec<T>>
where
  T: Send + Sync + DeserializeOwned + Unpin + Serialize,
{
  let cursor = collection
    .find(filter.into().unwrap_or_default())
    .with_options(options.into())
    .await
    .context("failed to execute find")?;
  cursor
    .try_collect()
    .await
    .context("failed to collect find cursor")
}

use anyhow::{Context, Result};
use opendal::{services::S3, Operator};

use crate::fs::backend::S3Provider;

/// Build an operator for AWS S3 or an S3-compatible store.
///
/// Without explicit keys OpenDAL falls back to the standard AWS
/// credential chain (environment, shared credentials file, instance
/// profile).
pub fn build_operator(
    bucket: &str,
    region: &str,
    access_key: Option<&str>,
    secret_key: Option<&str>,
    provider: &S3Provider,
    root: Option<&str>,
) -> Result<Operator> {
    let mut builder = S3::default().bucket(bucket).region(region);

    if let (Some(access_key), Some(secret_key)) = (access_key, secret_key) {
        builder = builder
            .access_key_id(access_key)
            .secret_access_key(secret_key);
    }

    // Set custom endpoint for S3-compatible providers
    if let Some(endpoint) = provider.endpoint(region) {
        builder = builder.endpoint(&endpoint);
    }

    if let Some(root) = root {
        builder = builder.root(root);
    }

    let operator = Operator::new(builder)
        .with_context(|| format!("Failed to configure {} bucket {}", provider.display_name(), bucket))?
        .finish();

    Ok(operator)
}

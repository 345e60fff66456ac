use anyhow::{Context, Result};
use opendal::{services::Webdav, Operator};

/// Build an operator for a WebDAV server (Nextcloud, Jianguoyun, Synology, ...).
pub fn build_operator(
    endpoint: &str,
    username: Option<&str>,
    password: Option<&str>,
    root: Option<&str>,
) -> Result<Operator> {
    let mut builder = Webdav::default().endpoint(endpoint);

    if let Some(username) = username {
        builder = builder.username(username);
    }
    if let Some(password) = password {
        builder = builder.password(password);
    }
    if let Some(root) = root {
        builder = builder.root(root);
    }

    let operator = Operator::new(builder)
        .with_context(|| format!("Failed to configure WebDAV endpoint {}", endpoint))?
        .finish();

    Ok(operator)
}

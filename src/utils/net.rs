use url::Url;

use crate::{DEFAULT_API_HOST, error::NxchatResult};

/// Fill in the default host, drop the trailing slash and add a scheme when missing
pub fn normalize_base_url(base_url: &str) -> String {
    let mut base_url = base_url.trim().to_string();

    if base_url.is_empty() {
        base_url = DEFAULT_API_HOST.to_string();
    }

    while base_url.ends_with('/') {
        base_url.pop();
    }

    if !base_url.starts_with("http") {
        base_url = format!("https://{base_url}");
    }

    base_url
}

pub fn join_url(base_url: &str, path: &str) -> NxchatResult<Url> {
    let url = Url::parse(&format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    ))?;

    Ok(url)
}

//! Provider-wide credentials applied to every upstream request.

use reqwest::RequestBuilder;

use crate::config::AuthConfig;

/// Adds an `Authorization` header for `auth`. Basic wins over bearer.
pub(crate) fn apply_auth(request: RequestBuilder, auth: &AuthConfig) -> RequestBuilder {
    if let Some(basic) = &auth.basic {
        return request.basic_auth(&basic.username, Some(&basic.password));
    }
    if let Some(bearer) = &auth.bearer {
        return request.bearer_auth(&bearer.token);
    }
    request
}

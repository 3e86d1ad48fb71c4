//! Naming, URL and header helpers shared by the transaction engine.

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

use crate::error::{Error, Result};

/// Package suffix used by service providers for client-side interface copies.
const CLIENT_PACKAGE_SUFFIX: &str = ".client";

/// Session cookie as set by Java application servers, e.g. `JSESSIONID=...`.
static SESSION_COOKIE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Za-z0-9_]*SESSIONID=[^;]+)").expect("valid session cookie pattern"));

/// Builds the request path for a remote method:
/// qualified class name with dots as slashes, then `/method.rmi`.
pub fn method_path(class_name: &str, method_name: &str) -> Result<String> {
    if class_name.is_empty() {
        return Err(Error::InvalidArgument("Class name is empty".into()));
    }
    if method_name.is_empty() {
        return Err(Error::InvalidArgument("Method name is empty".into()));
    }
    Ok(format!("{}/{}.rmi", class_name.replace('.', "/"), method_name))
}

/// Parses the implementation URL, making sure the path ends with a slash
/// so method paths are appended rather than substituted.
pub fn implementation_url(url: &str) -> Result<Url> {
    if url.is_empty() {
        return Err(Error::InvalidArgument("Implementation URL is empty".into()));
    }
    if url.ends_with('/') {
        Ok(Url::parse(url)?)
    } else {
        Ok(Url::parse(&format!("{}/", url))?)
    }
}

/// Unqualified name of a dotted type name.
pub fn simple_name(qualified: &str) -> &str {
    qualified.rsplit('.').next().unwrap_or(qualified)
}

/// Maps a class declared in a `.client` package to its parent package,
/// e.g. `com.foo.client.Service` to `com.foo.Service`.
pub fn remote_class_name(class_name: &str) -> String {
    match class_name.rsplit_once('.') {
        Some((package, name)) if package.ends_with(CLIENT_PACKAGE_SUFFIX) => {
            let package = &package[..package.len() - CLIENT_PACKAGE_SUFFIX.len()];
            if package.is_empty() {
                name.to_string()
            } else {
                format!("{}.{}", package, name)
            }
        }
        _ => class_name.to_string(),
    }
}

/// Extracts the `NAMESESSIONID=value` pair from a `Set-Cookie` header value.
pub fn session_cookie(set_cookie: &str) -> Option<&str> {
    SESSION_COOKIE
        .captures(set_cookie)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().trim())
}

/// Fresh random multipart boundary.
pub fn boundary() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Media type without parameters, lower-cased.
pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// JSON test for error bodies; a missing content type counts as JSON, the protocol default.
pub fn is_json(content_type: Option<&str>) -> bool {
    match content_type {
        None => true,
        Some(content_type) => content_type.starts_with("application/json"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_path_uses_slashes() {
        assert_eq!(method_path("comp.prj.Class", "method").unwrap(), "comp/prj/Class/method.rmi");
    }

    #[test]
    fn method_path_rejects_empty_names() {
        assert!(matches!(method_path("", "method"), Err(Error::InvalidArgument(_))));
        assert!(matches!(method_path("comp.prj.Class", ""), Err(Error::InvalidArgument(_))));
        assert!(matches!(method_path("", ""), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn implementation_url_normalizes_trailing_slash() {
        for url in ["http://localhost/app", "http://localhost/app/"] {
            let base = implementation_url(url).unwrap();
            assert_eq!(
                base.join("comp/prj/Class/method.rmi").unwrap().as_str(),
                "http://localhost/app/comp/prj/Class/method.rmi"
            );
        }
        assert!(implementation_url("").is_err());
    }

    #[test]
    fn simple_name_of_qualified_type() {
        assert_eq!(simple_name("java.io.IOException"), "IOException");
        assert_eq!(simple_name("IOException"), "IOException");
    }

    #[test]
    fn client_package_maps_to_parent() {
        assert_eq!(remote_class_name("com.foo.client.Service"), "com.foo.Service");
        assert_eq!(remote_class_name("com.foo.Service"), "com.foo.Service");
        assert_eq!(remote_class_name("com.clientele.Service"), "com.clientele.Service");
        assert_eq!(remote_class_name("Service"), "Service");
    }

    #[test]
    fn session_cookie_pattern() {
        assert_eq!(
            session_cookie("JSESSIONID=8A1B2C; Path=/app; HttpOnly"),
            Some("JSESSIONID=8A1B2C")
        );
        assert_eq!(session_cookie("theme=dark; Path=/"), None);
    }

    #[test]
    fn media_type_strips_parameters() {
        assert_eq!(media_type("Application/JSON; charset=UTF-8"), "application/json");
        assert_eq!(media_type("text/xml"), "text/xml");
    }

    #[test]
    fn json_content_type() {
        assert!(is_json(Some("application/json")));
        assert!(is_json(Some("application/json; charset=UTF-8")));
        assert!(is_json(None));
        assert!(!is_json(Some("")));
        assert!(!is_json(Some("application/xml")));
    }

    #[test]
    fn boundaries_differ() {
        assert_ne!(boundary(), boundary());
    }
}

pub mod url_validation;
pub use url_validation::{UrlValidationError, validate_resolver_url, validate_session_target};

//! OAuth protocol constants
//!
//! Values that must match the token endpoint wire format, plus the local
//! expiry policy applied to stored access tokens.

use std::time::Duration;

/// Seconds subtracted from the server-reported token lifetime. A token is
/// considered expired this long before it actually expires, so one handed to
/// a caller will not lapse mid-use.
pub const EXPIRY_SAFETY_OFFSET_SECS: i64 = 600; // 10 minutes

/// Connect timeout for token endpoint requests.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Read timeout for token endpoint requests.
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// `grant_type` for the authorization code exchange.
pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";

/// `grant_type` for the refresh token exchange.
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";

/// Default `response_type` for installed applications.
pub const DEFAULT_RESPONSE_TYPE: &str = "code";

/// Default `access_type`; "offline" asks the server for a refresh token.
pub const DEFAULT_ACCESS_TYPE: &str = "offline";

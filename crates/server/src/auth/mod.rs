mod identity;
mod login;
mod middleware;
mod provider;

pub use identity::{IdentityClaims, IdentityError};
pub use login::{CompletedLogin, LoginError, LoginService, RefreshedTokens};
pub use middleware::{
    RequestContext, SESSION_COOKIE, require_session, session_cookie, session_id_from_jar,
};
pub use provider::{AuthorizationProvider, OAuthClient, ProviderRegistry, TokenSet};

pub mod api_key;
pub mod audit;
pub mod auth;
pub mod error;
pub mod maintenance;
pub mod password_policy;
pub mod rate_limit;
pub mod rbac;
pub mod session;
pub mod store_access;
pub mod two_factor;

pub use api_key::{ApiKeyService, ApiKeyVerification, IssuedApiKey};
pub use audit::AuditService;
pub use auth::{AuthService, LoginOutcome};
pub use error::ServiceError;
pub use password_policy::{PasswordPolicyService, PasswordStrength, PasswordValidation};
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use rbac::RbacService;
pub use session::{SessionService, SessionTokens};
pub use store_access::StoreAccessService;
pub use two_factor::{TwoFactorService, TwoFactorSetup};

pub mod api_key;
pub mod audit;
pub mod login_attempt;
pub mod otp_token;
pub mod password_policy;
pub mod role;
pub mod store;
pub mod two_factor;
pub mod user;

pub use api_key::ApiKey;
pub use audit::{AuditEvent, AuditPage, AuditQuery, AuditSeverity};
pub use login_attempt::{LoginAttempt, LoginFailureReason};
pub use otp_token::{OtpPurpose, OtpToken};
pub use password_policy::{PasswordHistory, PasswordPolicy};
pub use role::{EffectivePermission, Permission, Role, RolePermission, RoleRank, UserRoleAssignment};
pub use store::{Store, UserStore};
pub use two_factor::{TwoFactorAuth, TwoFactorMethod, TwoFactorState};
pub use user::{SanitizedUser, User};

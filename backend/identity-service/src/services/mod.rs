/// Service layer for identity-service
///
/// Session flows and the collaborators they depend on:
/// - Send sign-in code (user directory lookup + email)
/// - Sign in (code redemption -> token pair)
/// - Refresh (single-use rotation)
/// - Sign out (revocation)
pub mod email;
pub mod refresh;
pub mod send_code;
pub mod signin;
pub mod signout;
pub mod user_directory;

pub use email::{EmailSender, SmtpEmailSender};
pub use refresh::RefreshService;
pub use send_code::SendCodeService;
pub use signin::SignInService;
pub use signout::SignOutService;
pub use user_directory::{GrpcUserDirectory, UserDirectory, UserProfile};

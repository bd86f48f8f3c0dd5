pub mod directory;
pub mod error;
pub mod gate;
pub mod verifier;

pub use directory::{IdentityDirectory, OpenDirectory, StaticDirectory};
pub use error::{AuthError, VerifyError};
pub use gate::AuthGate;
pub use verifier::{JwtVerifier, TokenClaims, TokenVerifier, VerifiedToken};

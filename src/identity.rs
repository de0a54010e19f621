//! Process-wide identity tags
//!
//! Retry failures carry a controller identity and a space tag so that error
//! reports from concurrent holotree spaces can be told apart. The embedding
//! application sets these once at startup; library code only reads them.

use std::sync::OnceLock;

/// Identity of the process operating on the holotree
#[derive(Debug, Clone)]
pub struct Identity {
    /// Controller identity (who is driving this process)
    pub controller: String,
    /// Space tag (which holotree space is being operated on)
    pub space: String,
}

static IDENTITY: OnceLock<Identity> = OnceLock::new();

/// Set the process identity. Returns false if it was already set.
pub fn set(controller: impl Into<String>, space: impl Into<String>) -> bool {
    IDENTITY
        .set(Identity {
            controller: controller.into(),
            space: space.into(),
        })
        .is_ok()
}

/// Current process identity, defaulting to `user`/`default`.
pub fn get() -> &'static Identity {
    IDENTITY.get_or_init(|| Identity {
        controller: "user".to_string(),
        space: "default".to_string(),
    })
}

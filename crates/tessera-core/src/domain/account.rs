//! Hooks into the metaverse account layer.

/// What the domain handler needs from the account layer when a domain
/// refuses a login
pub trait AccountServices: Send {
    /// Check for an access token and prompt for a login if there is none
    fn check_and_signal_for_access_token(&mut self);

    /// Replace the keypair used to sign connect requests
    fn generate_new_user_keypair(&mut self);
}

/// Account layer for anonymous sessions; only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct AnonymousAccount;

impl AccountServices for AnonymousAccount {
    fn check_and_signal_for_access_token(&mut self) {
        tracing::info!("Domain requires a metaverse login, but this session is anonymous");
    }

    fn generate_new_user_keypair(&mut self) {
        tracing::info!("Keypair regeneration requested for an anonymous session");
    }
}

//! Console code acquisition
//!
//! For redirect URIs nothing can listen on (another machine, out-of-band):
//! the user opens the consent URL anywhere and pastes back either the final
//! redirect URL or the bare code.

use std::io::BufRead;

use oauth_credentials::{AuthorizationRequest, CodeAcquirer, CodeDelivery, RedirectOutcome};
use tracing::warn;

#[derive(Debug, Default)]
pub struct ConsoleAcquirer;

impl CodeAcquirer for ConsoleAcquirer {
    fn acquire(&self, request: AuthorizationRequest, delivery: CodeDelivery) {
        eprintln!(
            "Open this URL in a browser to authorize:\n\n  {}\n\n\
             Then paste the URL you were redirected to (or just the code):",
            request.url()
        );
        // Stdin blocks, so read on a dedicated thread and return right away.
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            match read_code(stdin.lock()) {
                Some(code) => delivery.deliver(code),
                None => delivery.abandon(),
            }
        });
    }
}

/// Read one line and extract an authorization code from it.
pub fn read_code(mut input: impl BufRead) -> Option<String> {
    let mut line = String::new();
    if let Err(e) = input.read_line(&mut line) {
        warn!(error = %e, "failed to read authorization code");
        return None;
    }
    code_from_input(&line)
}

/// A pasted redirect URL yields its `code` parameter; anything else that is
/// not a URL is taken as the code itself.
pub fn code_from_input(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if !input.contains("://") {
        return Some(input.to_string());
    }
    match oauth_credentials::parse_redirect(input) {
        RedirectOutcome::Code(code) => Some(code),
        RedirectOutcome::Denied(error) => {
            warn!(%error, "authorization denied");
            None
        }
        RedirectOutcome::Pending => {
            warn!("pasted URL carries neither a code nor an error");
            None
        }
    }
}

use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use signal_hook::consts::{SIGINT, SIGTERM};

/// Route Ctrl-C and SIGTERM to the engine's cancel token.
///
/// The first signal only sets the token, so the running pass is discarded or
/// execution stops dispatching and the journal stays consistent.
pub fn install(token: Arc<AtomicBool>) -> io::Result<()> {
    signal_hook::flag::register(SIGINT, Arc::clone(&token))?;
    signal_hook::flag::register(SIGTERM, token)?;
    Ok(())
}

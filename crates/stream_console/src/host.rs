use chat_stream::{Session, SessionError, SessionUpdate};

use crate::app::HostOps;

/// [`HostOps`] backed by a live [`Session`]. History loads are deferred to
/// the event loop since they await a REST round trip.
pub struct SessionHost {
    session: Session,
    history_requested: bool,
    stop_requested: bool,
}

impl SessionHost {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            history_requested: false,
            stop_requested: false,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Runs a pending history load, if one was requested.
    pub async fn load_requested_history(&mut self) -> Option<Result<SessionUpdate, SessionError>> {
        if !std::mem::take(&mut self.history_requested) {
            return None;
        }
        let client = match self.session.blocks_client() {
            Ok(client) => client,
            Err(error) => return Some(Err(error)),
        };
        Some(self.session.load_history(&client).await)
    }
}

impl HostOps for SessionHost {
    fn send_message(&mut self, content: &str) -> Result<(), String> {
        self.session
            .send_message(content)
            .map_err(|error| error.to_string())
    }

    fn cancel(&mut self) -> Result<bool, String> {
        self.session.cancel().map_err(|error| error.to_string())
    }

    fn follow_enabled(&self) -> bool {
        self.session.view().auto_follow
    }

    fn set_follow(&mut self, enabled: bool) {
        self.session.set_auto_follow(enabled);
    }

    fn reconnect(&mut self) -> Result<(), String> {
        self.session.reconnect().map_err(|error| error.to_string())
    }

    fn request_history(&mut self) {
        self.history_requested = true;
    }

    fn request_stop(&mut self) {
        self.stop_requested = true;
    }
}

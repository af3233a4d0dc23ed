use crate::modules::connection::ConnectionManager;
use crate::modules::events::{NoticeLevel, Notifier};
use crate::modules::protocol::ClientCommand;

/// Fire-and-forget command sender.
///
/// Responses are matched to commands by message type only; two overlapping
/// commands of the same kind cannot be told apart.
pub struct CommandDispatcher {
    notifier: Notifier,
}

impl CommandDispatcher {
    pub fn new(notifier: Notifier) -> Self {
        Self { notifier }
    }

    /// True once the serialized command is queued on the transport.
    pub fn send(&self, connection: &mut ConnectionManager, cmd: &ClientCommand) -> bool {
        if !connection.is_connected() {
            self.notifier
                .notice(NoticeLevel::Danger, "Not connected to device");
            return false;
        }
        self.transmit(connection, cmd)
    }

    /// Like `send`, but stays quiet when disconnected.
    pub fn send_best_effort(&self, connection: &mut ConnectionManager, cmd: &ClientCommand) -> bool {
        connection.is_connected() && self.transmit(connection, cmd)
    }

    fn transmit(&self, connection: &mut ConnectionManager, cmd: &ClientCommand) -> bool {
        let payload = match serde_json::to_string(cmd) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("failed to encode {}: {e}", cmd.name());
                return false;
            }
        };
        tracing::debug!("sending: {payload}");
        match connection.transmit(payload) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("{} not sent: {e}", cmd.name());
                false
            }
        }
    }
}

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::net::channel::{ChannelId, ChannelListener};
use crate::net::packet::Fields;
use crate::net::shared::SendError;
use crate::net::switch::OpenListener;
use crate::identity::HashName;
use crate::node::Node;

/// Work pushed at the reactor from application threads. The queue is the
/// only cross-thread structure; the reactor drains it on wake-up and owns
/// every other piece of state.
pub enum Command {
    OpenLine {
        node: Node,
        completion: Box<dyn OpenListener>,
    },
    OpenChannel {
        line: HashName,
        id: ChannelId,
        kind: String,
        listener: Box<dyn ChannelListener>,
    },
    ChannelSend {
        line: HashName,
        id: ChannelId,
        fields: Fields,
        body: Vec<u8>,
        end: bool,
    },
    CloseChannel {
        line: HashName,
        id: ChannelId,
    },
    Stop,
}

/// Multi-producer handle onto the reactor's command queue. Pushing never
/// blocks; a full queue surfaces `Backpressure` to the caller.
#[derive(Clone)]
pub struct CommandQueue {
    tx: Sender<Command>,
    wake: mio::SetReadiness,
}

impl CommandQueue {
    pub fn push(&self, command: Command) -> Result<(), SendError> {
        self.tx.try_send(command).map_err(|err| match err {
            TrySendError::Full(_) => SendError::Backpressure,
            TrySendError::Disconnected(_) => SendError::SwitchStopped,
        })?;

        // A failed wake is not a lost command: the reactor also drains the
        // queue on its housekeeping tick.
        drop(self.wake.set_readiness(mio::Ready::readable()));

        Ok(())
    }

    /// Clears the wake-up readiness. Called by the reactor before draining
    /// so a racing push re-arms it instead of getting lost.
    pub(crate) fn clear_wake(&self) {
        drop(self.wake.set_readiness(mio::Ready::empty()));
    }
}

/// Builds the bounded command queue and the `Registration` the reactor
/// registers for wake-ups.
pub fn command_queue(capacity: usize) -> (CommandQueue, Receiver<Command>, mio::Registration) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let (registration, wake) = mio::Registration::new2();

    (CommandQueue { tx, wake }, rx, registration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_backpressure_when_full() {
        let (queue, _rx, _registration) = command_queue(1);

        queue.push(Command::Stop).unwrap();

        match queue.push(Command::Stop) {
            Err(SendError::Backpressure) => (),
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_push_fails_after_receiver_drop() {
        let (queue, rx, _registration) = command_queue(4);
        drop(rx);

        match queue.push(Command::Stop) {
            Err(SendError::SwitchStopped) => (),
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_commands_drain_in_order() {
        let (queue, rx, _registration) = command_queue(4);

        queue
            .push(Command::CloseChannel {
                line: crate::identity::HashName::from_bytes([1u8; 32]),
                id: [1u8; 16],
            })
            .unwrap();
        queue.push(Command::Stop).unwrap();

        match rx.try_recv().unwrap() {
            Command::CloseChannel { id, .. } => assert_eq!(id, [1u8; 16]),
            _ => panic!("Out of order drain"),
        }
        match rx.try_recv().unwrap() {
            Command::Stop => (),
            _ => panic!("Out of order drain"),
        }
    }
}

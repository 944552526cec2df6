use crossbeam_channel::{bounded, Receiver, Sender};

use crate::resource::Checksum;

/// Typed progress events emitted by the backup and restore pipelines.
/// Workers push into a bounded channel; a single consumer owns the receiver
/// for the command's duration. Cancellation drops the sender, closing the
/// channel.
#[derive(Debug, Clone)]
pub enum Event {
    DirectoryOk { path: String },
    FileOk { path: String, size: u64 },
    FileError { path: String, error: String },
    PackfileFlushed { checksum: Checksum, size: u64 },
    SnapshotCommitted { identifier: Checksum },
}

pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub fn channel() -> (Sender<Event>, Receiver<Event>) {
    bounded(EVENT_CHANNEL_CAPACITY)
}

/// Best-effort send; progress reporting never blocks or fails the pipeline.
pub(crate) fn emit(sender: Option<&Sender<Event>>, event: Event) {
    if let Some(sender) = sender {
        let _ = sender.try_send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_consumer_is_harmless() {
        let (sender, receiver) = channel();
        drop(receiver);
        emit(
            Some(&sender),
            Event::DirectoryOk {
                path: "/".to_string(),
            },
        );
    }

    #[test]
    fn events_arrive_in_order() {
        let (sender, receiver) = channel();
        emit(Some(&sender), Event::FileOk { path: "/a".into(), size: 1 });
        emit(Some(&sender), Event::DirectoryOk { path: "/".into() });
        drop(sender);

        let collected: Vec<Event> = receiver.iter().collect();
        assert_eq!(collected.len(), 2);
        assert!(matches!(&collected[0], Event::FileOk { path, .. } if path == "/a"));
    }
}

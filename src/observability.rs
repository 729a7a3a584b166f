use biometrics::{Collector, Counter, Moments};

pub(crate) static DATAGRAMS_MALFORMED: Counter = Counter::new("slcp.datagrams.malformed");
pub(crate) static DATAGRAMS_IGNORED: Counter = Counter::new("slcp.datagrams.ignored");
pub(crate) static SEND_ERRORS: Counter = Counter::new("slcp.send_errors");

pub(crate) static DISCOVERY_ANNOUNCEMENTS: Counter =
    Counter::new("slcp.discovery.announcements");
pub(crate) static DISCOVERY_JOINS: Counter = Counter::new("slcp.discovery.joins");
pub(crate) static DISCOVERY_LEAVES: Counter = Counter::new("slcp.discovery.leaves");
pub(crate) static DISCOVERY_WHO_REPLIES: Counter = Counter::new("slcp.discovery.who_replies");
pub(crate) static DISCOVERY_KNOWN_USERS: Counter = Counter::new("slcp.discovery.known_users");

pub(crate) static MESSAGES_SENT: Counter = Counter::new("slcp.network.messages_sent");
pub(crate) static MESSAGES_RECEIVED: Counter = Counter::new("slcp.network.messages_received");
pub(crate) static AUTOREPLIES_SENT: Counter = Counter::new("slcp.network.autoreplies");

pub(crate) static IMAGES_SENT: Counter = Counter::new("slcp.transfer.images_sent");
pub(crate) static IMAGES_RECEIVED: Counter = Counter::new("slcp.transfer.images_received");
pub(crate) static IMAGE_BYTES: Counter = Counter::new("slcp.transfer.bytes");
pub(crate) static TRANSFER_ERRORS: Counter = Counter::new("slcp.transfer.errors");
pub(crate) static TRANSFER_DURATION: Moments =
    Moments::new("slcp.transfer.duration_seconds");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&DATAGRAMS_MALFORMED);
    collector.register_counter(&DATAGRAMS_IGNORED);
    collector.register_counter(&SEND_ERRORS);

    collector.register_counter(&DISCOVERY_ANNOUNCEMENTS);
    collector.register_counter(&DISCOVERY_JOINS);
    collector.register_counter(&DISCOVERY_LEAVES);
    collector.register_counter(&DISCOVERY_WHO_REPLIES);
    collector.register_counter(&DISCOVERY_KNOWN_USERS);

    collector.register_counter(&MESSAGES_SENT);
    collector.register_counter(&MESSAGES_RECEIVED);
    collector.register_counter(&AUTOREPLIES_SENT);

    collector.register_counter(&IMAGES_SENT);
    collector.register_counter(&IMAGES_RECEIVED);
    collector.register_counter(&IMAGE_BYTES);
    collector.register_counter(&TRANSFER_ERRORS);
    collector.register_moments(&TRANSFER_DURATION);
}

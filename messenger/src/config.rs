//! Construction-time configuration for a [`Messenger`](crate::Messenger).

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    queue::{PendingQueue, WeakPendingQueue},
    state::{MessengerState, StateChangeCallback},
};

/// Tunables for link handling and delivery tracking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessengerOptions {
    /// How long a message may stay in flight before it is reported as timed out.
    #[serde(rename = "event_send_timeout_secs", with = "secs")]
    pub send_timeout: Duration,

    /// How long both links may take to attach before the start is abandoned.
    #[serde(rename = "link_attach_timeout_secs", with = "secs")]
    pub link_attach_timeout: Duration,

    /// How long to wait for detach confirmations before considering the links closed.
    #[serde(rename = "link_detach_timeout_secs", with = "secs")]
    pub link_detach_timeout: Duration,

    /// Upper bound on pending messages sent, and incoming messages
    /// dispatched, per `do_work` call.
    pub max_sends_per_cycle: usize,

    /// Consecutive rejected or timed-out sends tolerated before the messenger
    /// fails. `None` never fails on send errors.
    pub max_send_error_count: Option<u32>,
}

impl Default for MessengerOptions {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(600),
            link_attach_timeout: Duration::from_secs(300),
            link_detach_timeout: Duration::from_secs(300),
            max_sends_per_cycle: 16,
            max_send_error_count: Some(10),
        }
    }
}

impl MessengerOptions {
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_link_timeouts(mut self, attach: Duration, detach: Duration) -> Self {
        self.link_attach_timeout = attach;
        self.link_detach_timeout = detach;
        self
    }

    pub fn with_max_sends_per_cycle(mut self, max: usize) -> Self {
        self.max_sends_per_cycle = max;
        self
    }

    pub fn with_max_send_error_count(mut self, max: Option<u32>) -> Self {
        self.max_send_error_count = max;
        self
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    use serde::de::Error;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if value.subsec_nanos() == 0 {
            serializer.serialize_u64(value.as_secs())
        } else {
            serializer.serialize_f64(value.as_secs_f64())
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

/// Everything [`Messenger::create`](crate::Messenger::create) needs.
///
/// `device_id`, `host_fqdn` and `pending_queue` are required. The strings are
/// copied during creation. The queue is held weakly: the owner keeps it alive
/// for as long as the messenger should drain it.
pub struct MessengerConfig<'a, M> {
    pub device_id: Option<&'a str>,
    pub host_fqdn: Option<&'a str>,
    pub pending_queue: Option<WeakPendingQueue<M>>,
    pub on_state_changed: Option<StateChangeCallback>,
    pub options: MessengerOptions,
}

impl<M> Default for MessengerConfig<'_, M> {
    fn default() -> Self {
        Self {
            device_id: None,
            host_fqdn: None,
            pending_queue: None,
            on_state_changed: None,
            options: MessengerOptions::default(),
        }
    }
}

impl<'a, M> MessengerConfig<'a, M> {
    pub fn new(device_id: &'a str, host_fqdn: &'a str, pending_queue: &PendingQueue<M>) -> Self {
        Self {
            device_id: Some(device_id),
            host_fqdn: Some(host_fqdn),
            pending_queue: Some(pending_queue.downgrade()),
            ..Default::default()
        }
    }

    pub fn with_state_callback(
        mut self,
        callback: impl FnMut(MessengerState, MessengerState) + 'static,
    ) -> Self {
        self.on_state_changed = Some(Box::new(callback));
        self
    }

    pub fn with_options(mut self, options: MessengerOptions) -> Self {
        self.options = options;
        self
    }
}

impl<M> fmt::Debug for MessengerConfig<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessengerConfig")
            .field("device_id", &self.device_id)
            .field("host_fqdn", &self.host_fqdn)
            .field("pending_queue", &self.pending_queue)
            .field("on_state_changed", &self.on_state_changed.is_some())
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_load_from_seconds_with_defaults() {
        let options: MessengerOptions = serde_json::from_str(
            r#"{ "event_send_timeout_secs": 30, "max_sends_per_cycle": 4 }"#,
        )
        .expect("valid options");

        assert_eq!(options.send_timeout, Duration::from_secs(30));
        assert_eq!(options.max_sends_per_cycle, 4);
        assert_eq!(options.link_attach_timeout, Duration::from_secs(300));
        assert_eq!(options.max_send_error_count, Some(10));
    }

    #[test]
    fn options_serialize_durations_as_seconds() {
        let options = MessengerOptions::default()
            .with_send_timeout(Duration::from_secs(45))
            .with_max_send_error_count(None);
        let json = serde_json::to_value(&options).expect("serializable");

        assert_eq!(json["event_send_timeout_secs"], 45);
        assert_eq!(json["link_detach_timeout_secs"], 300);
        assert!(json["max_send_error_count"].is_null());
    }

    #[test]
    fn sub_second_timeouts_survive_a_round_trip() {
        let options = MessengerOptions::default().with_send_timeout(Duration::from_millis(500));
        let json = serde_json::to_string(&options).expect("serializable");
        let loaded: MessengerOptions = serde_json::from_str(&json).expect("loadable");

        assert_eq!(loaded.send_timeout, Duration::from_millis(500));
        assert_eq!(loaded, options);
    }

    #[test]
    fn negative_timeouts_are_refused() {
        let loaded = serde_json::from_str::<MessengerOptions>(r#"{ "event_send_timeout_secs": -1 }"#);
        assert!(loaded.is_err());
    }

    #[test]
    fn new_fills_required_fields() {
        let queue: PendingQueue<String> = PendingQueue::new();
        let config = MessengerConfig::new("dev-1", "hub.example.net", &queue);

        assert_eq!(config.device_id, Some("dev-1"));
        assert_eq!(config.host_fqdn, Some("hub.example.net"));
        assert!(config.pending_queue.is_some());
        assert!(config.on_state_changed.is_none());
    }
}

//! Subscriptions, client messages and MPN requests carried over a live session.

mod common;

use common::Harness;
use lightstreamer_session::ConnectionOptions;
use lightstreamer_session::client::{ClientMessageListener, Transport};
use lightstreamer_session::mpn::{MpnDevice, MpnPlatform};
use lightstreamer_session::subscription::{
    RequestedMaxFrequency, Subscription, SubscriptionListener, SubscriptionMode,
};
use parking_lot::Mutex;
use std::sync::Arc;

#[cfg(test)]
mod tests {
    use super::*;

    type Log = Arc<Mutex<Vec<String>>>;

    struct SubscriptionRecorder(Log);

    impl SubscriptionListener for SubscriptionRecorder {
        fn on_subscription(&mut self) {
            self.0.lock().push("subscribed".to_string());
        }

        fn on_unsubscription(&mut self) {
            self.0.lock().push("unsubscribed".to_string());
        }

        fn on_real_max_frequency(&mut self, frequency: Option<f64>) {
            self.0.lock().push(format!("frequency:{:?}", frequency));
        }
    }

    struct MessageRecorder(Log);

    impl ClientMessageListener for MessageRecorder {
        fn on_abort(&mut self, original_message: &str, sent_on_network: bool) {
            self.0
                .lock()
                .push(format!("abort:{}:{}", original_message, sent_on_network));
        }

        fn on_processed(&mut self, original_message: &str, response: &str) {
            self.0
                .lock()
                .push(format!("processed:{}:{}", original_message, response));
        }
    }

    fn quote_subscription(log: &Log) -> Subscription {
        let subscription = Subscription::new(
            SubscriptionMode::Merge,
            Some(vec!["item1".to_string()]),
            Some(vec!["bid".to_string(), "ask".to_string()]),
        )
        .expect("valid subscription");
        subscription.add_listener(Box::new(SubscriptionRecorder(Arc::clone(log))));
        subscription
    }

    /// Add, reconfigure and delete travel as control frames on the WebSocket.
    #[test]
    fn test_subscription_lifecycle_over_ws() {
        let h = Harness::new(ConnectionOptions::default());
        let log: Log = Arc::default();
        let subscription = quote_subscription(&log);

        // subscribed before the session exists: sent once it does
        h.client.subscribe(&subscription).expect("subscribe");
        assert!(subscription.is_active());
        let socket = h.open_ws_session();
        assert!(
            socket
                .last_sent()
                .starts_with("control\r\nLS_reqId=1&LS_op=add&LS_subId=1&LS_mode=MERGE")
        );

        socket.callbacks.on_message("REQOK,1\r\nSUBOK,1,1,2\r\nCONF,1,unlimited\r\n");
        assert!(subscription.is_subscribed());

        subscription
            .set_requested_max_frequency(Some(RequestedMaxFrequency::Limited(2.5)))
            .expect("limited frequency");
        assert_eq!(
            socket.last_sent(),
            "control\r\nLS_reqId=2&LS_op=reconf&LS_subId=1&LS_requested_max_frequency=2.5"
        );
        socket.callbacks.on_message("REQOK,2\r\nCONF,1,2.5\r\n");

        h.client.unsubscribe(&subscription).expect("unsubscribe");
        assert_eq!(
            socket.last_sent(),
            "control\r\nLS_reqId=3&LS_op=delete&LS_subId=1"
        );
        socket.callbacks.on_message("REQOK,3\r\nUNSUB,1\r\n");
        h.take_events();

        assert!(!subscription.is_active());
        assert!(h.client.get_subscriptions().is_empty());
        assert_eq!(
            *log.lock(),
            vec![
                "subscribed",
                "frequency:None",
                "frequency:Some(2.5)",
                "unsubscribed",
            ]
        );
    }

    /// Unsubscribing a subscription that is not active is refused.
    #[test]
    fn test_unsubscribe_inactive_fails() {
        let h = Harness::new(ConnectionOptions::default());
        let log: Log = Arc::default();
        let subscription = quote_subscription(&log);
        assert!(h.client.unsubscribe(&subscription).is_err());
        h.client.subscribe(&subscription).expect("subscribe");
        assert!(h.client.subscribe(&subscription).is_err());
    }

    /// Messages: aborted without a session unless queued, processed on MSGDONE.
    #[test]
    fn test_messages_over_ws() {
        let h = Harness::new(ConnectionOptions::default());
        let log: Log = Arc::default();

        h.client.send_message(
            "dropped",
            None,
            None,
            Some(Box::new(MessageRecorder(Arc::clone(&log)))),
            false,
        );
        h.client.send_message(
            "queued",
            Some("Seq"),
            None,
            Some(Box::new(MessageRecorder(Arc::clone(&log)))),
            true,
        );
        let socket = h.open_ws_session();
        assert_eq!(
            socket.last_sent(),
            "msg\r\nLS_reqId=1&LS_message=queued&LS_sequence=Seq&LS_msg_prog=1"
        );

        h.client.send_message(
            "hello",
            Some("Seq"),
            None,
            Some(Box::new(MessageRecorder(Arc::clone(&log)))),
            false,
        );
        assert_eq!(
            socket.last_sent(),
            "msg\r\nLS_reqId=2&LS_message=hello&LS_sequence=Seq&LS_msg_prog=2"
        );

        socket
            .callbacks
            .on_message("REQOK,1\r\nREQOK,2\r\nMSGDONE,Seq,1,\r\nMSGDONE,Seq,2,ok\r\n");
        h.take_events();
        assert_eq!(
            *log.lock(),
            vec![
                "abort:dropped:false",
                "processed:queued:",
                "processed:hello:ok",
            ]
        );
    }

    /// Over HTTP each control request is a separate call; the next one waits
    /// for the previous response to end.
    #[test]
    fn test_http_control_channel() {
        let mut options = ConnectionOptions::default();
        options.set_forced_transport(Some(Transport::HttpStreaming));
        let h = Harness::new(options);
        h.client.connect().expect("connect");
        h.request(0)
            .callbacks
            .on_message("CONOK,S2,50000,5000,*\r\nLOOP,0\r\n");
        let stream = h.request(1);
        stream.callbacks.on_message("CONOK,S2,50000,5000,*\r\n");
        assert_eq!(
            h.statuses(),
            vec!["CONNECTING", "CONNECTED:STREAM-SENSING", "CONNECTED:HTTP-STREAMING"]
        );

        let log: Log = Arc::default();
        let subscription = quote_subscription(&log);
        h.client.subscribe(&subscription).expect("subscribe");
        assert_eq!(h.request_count(), 3);
        let control = h.request(2);
        assert_eq!(
            control.url,
            "http://push.example.com/lightstreamer/control.txt?LS_protocol=TLCP-2.5.0"
        );
        assert!(
            control
                .body
                .starts_with("LS_session=S2&LS_reqId=1&LS_op=add&LS_subId=1&LS_mode=MERGE")
        );

        h.client.send_message(
            "hello",
            Some("Seq"),
            None,
            Some(Box::new(MessageRecorder(Arc::clone(&log)))),
            false,
        );
        assert_eq!(h.request_count(), 3);

        control.callbacks.on_message("REQOK,1\r\n");
        control.callbacks.on_done();
        assert_eq!(h.request_count(), 4);
        let message = h.request(3);
        assert_eq!(
            message.url,
            "http://push.example.com/lightstreamer/msg.txt?LS_protocol=TLCP-2.5.0"
        );
        assert_eq!(
            message.body,
            "LS_session=S2&LS_reqId=2&LS_message=hello&LS_sequence=Seq&LS_msg_prog=1"
        );

        stream
            .callbacks
            .on_message("SUBOK,1,1,2\r\nMSGDONE,Seq,1,\r\n");
        h.take_events();
        assert!(subscription.is_subscribed());
        assert_eq!(*log.lock(), vec!["subscribed", "processed:hello:"]);
    }

    /// Device registration and the internal items the device needs afterwards.
    #[test]
    fn test_mpn_device_registration() {
        let h = Harness::new(ConnectionOptions::default());
        let socket = h.open_ws_session();
        let device = MpnDevice::new("tok", "app", MpnPlatform::Apple).expect("device");

        h.client.register_for_mpn(device.clone());
        assert_eq!(
            socket.last_sent(),
            "control\r\nLS_reqId=1&LS_op=register&PN_type=Apple&PN_appId=app&PN_deviceToken=tok"
        );

        socket
            .callbacks
            .on_message("REQOK,1\r\nMPNREG,dev-1,ADAPTER\r\n");
        assert_eq!(device.get_device_id().as_deref(), Some("dev-1"));
        let frame = socket.last_sent();
        assert!(frame.starts_with("control\r\n"));
        assert!(frame.contains("LS_subId=1&LS_mode=MERGE&LS_group=DEV-dev-1"));
        assert!(frame.contains("LS_subId=2&LS_mode=COMMAND&LS_group=SUBS-dev-1"));
        // internal subscriptions are not user subscriptions
        assert!(h.client.get_subscriptions().is_empty());

        h.client.reset_mpn_badge().expect("device registered");
        assert!(socket.last_sent().contains("LS_op=reset_badge&PN_deviceId=dev-1"));
    }

    /// MPN operations need a registered device.
    #[test]
    fn test_mpn_requires_device() {
        let h = Harness::new(ConnectionOptions::default());
        assert!(h.client.reset_mpn_badge().is_err());
        assert!(h.client.get_mpn_subscription_ids().is_empty());
    }
}
